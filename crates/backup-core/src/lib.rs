//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

#![cfg_attr(docsrs, feature(doc_cfg))]

//! # trustedge-backup-core
//!
//! Authenticated reader for the encrypted, framed backup file produced by the
//! Signal Android messenger.
//!
//! This crate covers the hard, security-relevant core: deriving keys from a
//! passphrase, decrypting and authenticating every frame and attached file,
//! decoding the frame wire format, and replaying the recorded SQL statements
//! into an in-memory SQLite database. It does not parse command-line
//! arguments, render message HTML, or format recipient display names — those
//! are thin layers a caller builds on top.
//!
//! ## Quick start
//!
//! ```no_run
//! use trustedge_backup_core::Reader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = Reader::new();
//! reader.open("backup.bin", b"correct horse battery staple")?;
//! reader.materialize_database()?;
//! for recipient in reader.query_recipients()? {
//!     println!("{}", recipient.id);
//! }
//! reader.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`wire`] — the varint/TLV codec one frame's bytes are parsed with.
//! - [`frame`] — the tagged frame union (`Header`, `SqlStatement`, `Attachment`, ...).
//! - [`crypto`] — key derivation, AES-256-CTR, and HMAC-SHA256 frame/file authentication.
//! - [`reader`] — the framed-reader state machine that ties the wire codec and
//!   crypto core into a sequence of decoded frames.
//! - [`locator`] — the `(rowid, attachmentid)` index of where attached files live.
//! - [`db`] — the database materializer and its minimal `SqlEngine` interface.
//! - [`query`] — schema-versioned queries over the materialized database.
//! - [`file_reader`] — on-demand decryption of one attachment, avatar, or sticker.
//! - [`secret`] — the zeroizing wrapper that holds derived key material.
//! - [`error`] — the unified error hierarchy every public operation returns.
//!
//! [`ReaderOptions`] is the one tunable surface: the chunk size used while
//! streaming an attached file, set at construction and carried through every
//! call to [`Reader::open`].

use std::fs::File;
use std::io::Write;
use std::path::Path;

pub mod crypto;
pub mod db;
pub mod error;
pub mod file_reader;
pub mod frame;
pub mod locator;
pub mod query;
pub mod reader;
pub mod secret;
pub mod wire;

pub use error::{BackupError, Result};
pub use frame::Frame;
pub use locator::AttachmentLocator;
pub use secret::KeyMaterial;

use db::{MaterializeOutcome, RusqliteEngine, SqlEngine};
use reader::FrameStream;

/// The one tunable a caller can set on open: the chunk size used when streaming
/// an attachment, avatar, or sticker through [`Reader::write_file`] /
/// [`Reader::file_as_bytes`]. Defaults to 8 KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub chunk_size: usize,
}

impl ReaderOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: file_reader::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Reads one open Signal Android backup file: frame-by-frame decryption,
/// on-demand attachment recovery, and database materialization.
///
/// Owns the file handle, the derived keys, the attachment locator index, and
/// (once [`Reader::materialize_database`] has run) the in-memory SQLite
/// connection. Not safe to share across threads. Dropping the reader — or
/// calling [`Reader::close`] — wipes the cipherkey and MAC key.
pub struct Reader {
    stream: Option<FrameStream<File>>,
    engine: Option<RusqliteEngine>,
    schema_version: i64,
    locators: locator::AttachmentLocators,
    options: ReaderOptions,
}

impl Reader {
    /// Creates an unopened reader with default [`ReaderOptions`]. Call
    /// [`Reader::open`] before anything else.
    pub fn new() -> Self {
        Self {
            stream: None,
            engine: None,
            schema_version: 0,
            locators: locator::AttachmentLocators::new(),
            options: ReaderOptions::default(),
        }
    }

    /// Creates an unopened reader with caller-supplied [`ReaderOptions`].
    pub fn with_options(options: ReaderOptions) -> Self {
        Self {
            options,
            ..Self::new()
        }
    }

    fn stream_mut(&mut self) -> Result<&mut FrameStream<File>> {
        self.stream
            .as_mut()
            .ok_or_else(|| BackupError::InvalidFrame("reader is not open".into()))
    }

    /// Opens `path`, reads the clear Header frame, and derives the cipherkey and
    /// MAC key from `passphrase`. Does not read any encrypted frame yet — the
    /// first [`Reader::next_frame`] call does, and fails with
    /// [`BackupError::AuthFailed`] if the passphrase is wrong.
    pub fn open(&mut self, path: impl AsRef<Path>, passphrase: &[u8]) -> Result<()> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), chunk_size = self.options.chunk_size, "opening backup file");
        let file = File::open(path)?;
        self.stream = Some(FrameStream::open(file, passphrase)?);
        Ok(())
    }

    /// Seeks back to the first encrypted unit and resets the counter to the
    /// header's value.
    pub fn rewind(&mut self) -> Result<()> {
        self.stream_mut()?.rewind()
    }

    /// Reads and authenticates the next frame. If the frame carries a file
    /// blob, the returned locator records where it lives without reading it.
    pub fn next_frame(&mut self) -> Result<(Frame, Option<AttachmentLocator>)> {
        self.stream_mut()?.next_frame()
    }

    /// Decrypts the file at `locator` and writes its plaintext to `sink`, reading
    /// in chunks of `self.options.chunk_size` bytes.
    pub fn write_file<W: Write>(&mut self, locator: &AttachmentLocator, sink: &mut W) -> Result<()> {
        let chunk_size = self.options.chunk_size;
        let stream = self.stream_mut()?;
        let iv_tail = *stream.iv_tail();
        let keys = stream.keys().clone();
        file_reader::write_file(stream.source_mut(), &iv_tail, &keys, locator, chunk_size, sink)
    }

    /// Decrypts the file at `locator` and returns its plaintext.
    pub fn file_as_bytes(&mut self, locator: &AttachmentLocator) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(locator.length as usize);
        self.write_file(locator, &mut out)?;
        Ok(out)
    }

    /// Rewinds and replays every recorded `SqlStatement` into a fresh in-memory
    /// SQLite database, building the attachment locator index along the way.
    /// Idempotent: a second call is a no-op.
    pub fn materialize_database(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        let engine = RusqliteEngine::open_in_memory()?;
        let MaterializeOutcome {
            schema_version,
            locators,
        } = db::materialize(self.stream_mut()?, &engine)?;
        self.schema_version = schema_version;
        self.locators = locators;
        self.engine = Some(engine);
        Ok(())
    }

    fn engine(&self) -> Result<&RusqliteEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| BackupError::NotFound("database has not been materialized yet".into()))
    }

    /// Copies the materialized database out to a file at `path` via SQLite's
    /// online-backup API.
    pub fn write_database(&self, path: impl AsRef<Path>) -> Result<()> {
        self.engine()?.backup_to_file(path.as_ref())
    }

    /// Looks up the locator for `(rowid, attachmentid)`, installed during
    /// materialization.
    pub fn locator(&self, rowid: u64, attachmentid: u64) -> Result<&AttachmentLocator> {
        self.locators
            .get(rowid, attachmentid)
            .ok_or_else(|| BackupError::NotFound(format!("no attachment ({rowid}, {attachmentid})")))
    }

    pub fn query_recipients(&self) -> Result<Vec<query::Recipient>> {
        query::query_recipients(self.engine()?.connection(), self.schema_version)
    }

    pub fn query_threads(&self) -> Result<Vec<query::Thread>> {
        query::query_threads(self.engine()?.connection(), self.schema_version)
    }

    pub fn query_messages(&self, thread_id: i64) -> Result<Vec<query::Message>> {
        query::query_messages(self.engine()?.connection(), self.schema_version, thread_id)
    }

    pub fn query_mentions(&self, message_id: i64) -> Result<Vec<query::Mention>> {
        query::query_mentions(self.engine()?.connection(), message_id)
    }

    /// Releases the file handle, the SQLite connection, and the derived keys.
    /// Equivalent to dropping the reader, spelled out for callers that want an
    /// explicit end-of-lifecycle point.
    pub fn close(self) {
        drop(self)
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}
