//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Unified error hierarchy for the backup reader.

use thiserror::Error;

/// Top-level error type returned by every public operation on [`crate::Reader`].
#[derive(Error, Debug)]
pub enum BackupError {
    /// Underlying read/seek failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected end of stream inside a frame, file blob, or before the `end` marker.
    #[error("truncated backup: {0}")]
    Truncated(String),

    /// Unknown tag, unknown wire type, duplicate singleton field, length overrun,
    /// missing required sub-field, malformed varint, or a frame length at or below
    /// the MAC size.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Truncated HMAC mismatch on a frame or a file. An incorrect passphrase surfaces
    /// the same way, since it produces a MAC mismatch on the first encrypted frame.
    #[error("authentication failed")]
    AuthFailed,

    /// Cipher or HMAC initialization failure.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Error from the embedded SQL engine; the materialization transaction is abandoned.
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// An attachment locator lookup or recipient lookup missed.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors from the wire codec layer. Every variant folds into
/// [`BackupError::InvalidFrame`] at the frame-parsing boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown field tag {0}")]
    UnknownTag(u32),

    #[error("unknown wire type {0}")]
    UnknownWireType(u32),

    #[error("field {0} set more than once")]
    DuplicateField(&'static str),

    #[error("varint is malformed or exceeds 10 bytes")]
    MalformedVarint,

    #[error("length-delimited field overruns the remaining buffer")]
    LengthOverrun,

    #[error("buffer ended before the expected field could be read")]
    UnexpectedEof,
}

impl From<WireError> for BackupError {
    fn from(e: WireError) -> Self {
        BackupError::InvalidFrame(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
