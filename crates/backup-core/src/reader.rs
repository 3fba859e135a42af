//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! The framed reader: the input state machine that turns a byte stream into a
//! sequence of decrypted [`Frame`]s and, for file-carrying frames, the location of
//! their ciphertext (never the ciphertext itself — see [`crate::file_reader`]).

use std::io::{Read, Seek, SeekFrom};

use crate::crypto::{self, BackupKeys, Counter, MAC_LEN};
use crate::error::BackupError;
use crate::frame::{self, Frame};
use crate::locator::AttachmentLocator;

const MIN_ENCRYPTED_FRAME_LEN: u32 = MAC_LEN as u32;

fn read_u32be<R: Read>(source: &mut R) -> Result<u32, BackupError> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Sequential, single-pass decoder over one open backup stream.
///
/// Owns the file handle, the derived keys, and the counter. Does not own the
/// attachment index or the materialized database — those belong to the caller,
/// since a `FrameStream` is reread from scratch on every materialization pass
/// (spec.md §4.5).
pub struct FrameStream<R> {
    source: R,
    keys: BackupKeys,
    iv_tail: [u8; 12],
    header_counter: Counter,
    counter: Counter,
    body_start: u64,
    done: bool,
}

impl<R: Read + Seek> FrameStream<R> {
    /// Reads the clear Header frame and derives the cipherkey/MAC key from
    /// `passphrase`. Everything after the header is encrypted.
    pub fn open(mut source: R, passphrase: &[u8]) -> Result<Self, BackupError> {
        let len = read_u32be(&mut source)?;
        let mut buf = vec![0u8; len as usize];
        source.read_exact(&mut buf)?;
        let header = match frame::parse_frame(&buf)? {
            Frame::Header(h) => h,
            _ => return Err(BackupError::InvalidFrame("first frame is not a Header".into())),
        };

        if header.iv.len() != 16 {
            return Err(BackupError::InvalidFrame("header IV must be 16 bytes".into()));
        }
        let header_counter = Counter::from_iv(&header.iv);
        let mut iv_tail = [0u8; 12];
        iv_tail.copy_from_slice(&header.iv[4..16]);

        let keys = BackupKeys::derive(passphrase, header.salt.as_deref())?;
        let body_start = source.stream_position()?;
        tracing::debug!(body_start, "backup header parsed, keys derived");

        Ok(Self {
            source,
            keys,
            iv_tail,
            header_counter,
            counter: header_counter,
            body_start,
            done: false,
        })
    }

    /// Seeks back to the first encrypted unit and resets the counter to the
    /// header's value. The header itself is not reread.
    pub fn rewind(&mut self) -> Result<(), BackupError> {
        self.source.seek(SeekFrom::Start(self.body_start))?;
        self.counter = self.header_counter;
        self.done = false;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reads and authenticates the next encrypted unit, returning its decoded
    /// frame and, if the frame carries a file blob, the blob's location. The
    /// blob itself is skipped over, never read into memory here.
    pub fn next_frame(&mut self) -> Result<(Frame, Option<AttachmentLocator>), BackupError> {
        if self.done {
            return Err(BackupError::Truncated("read past end of stream".into()));
        }

        let total_len = read_u32be(&mut self.source)?;
        if total_len <= MIN_ENCRYPTED_FRAME_LEN {
            return Err(BackupError::InvalidFrame(format!(
                "encrypted frame length {total_len} does not exceed the MAC size"
            )));
        }
        let ciphertext_len = (total_len - MIN_ENCRYPTED_FRAME_LEN) as usize;
        let mut ciphertext = vec![0u8; ciphertext_len];
        self.source.read_exact(&mut ciphertext).map_err(|e| truncated_io(e))?;
        let mut mac = [0u8; MAC_LEN];
        self.source.read_exact(&mut mac).map_err(|e| truncated_io(e))?;

        let plaintext = match crypto::decrypt_frame(&self.keys, &self.iv_tail, self.counter, &ciphertext, &mac) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(counter = ?self.counter, "frame authentication failed");
                return Err(e);
            }
        };
        let frame = frame::parse_frame(&plaintext)?;
        self.counter.increment();

        if frame == Frame::End {
            self.done = true;
            return Ok((frame, None));
        }

        let locator = match frame.file_length() {
            Some(length) => {
                let file_position = self.source.stream_position()?;
                let locator = AttachmentLocator {
                    file_position,
                    length,
                    counter_at_start: self.counter,
                };
                let skip = i64::from(length) + MAC_LEN as i64;
                self.source
                    .seek(SeekFrom::Current(skip))
                    .map_err(|e| truncated_io(e))?;
                self.counter.increment();
                Some(locator)
            }
            None => None,
        };

        Ok((frame, locator))
    }

    pub fn iv_tail(&self) -> &[u8; 12] {
        &self.iv_tail
    }

    pub fn keys(&self) -> &BackupKeys {
        &self.keys
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }
}

fn truncated_io(e: std::io::Error) -> BackupError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BackupError::Truncated(e.to_string())
    } else {
        BackupError::Io(e)
    }
}
