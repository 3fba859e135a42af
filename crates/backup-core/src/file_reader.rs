//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! On-demand seek + stream-decrypt of one attachment, avatar, or sticker blob.
//!
//! Reading never disturbs the main [`crate::reader::FrameStream`]'s counter: the
//! locator carries its own starting counter, captured when the file-carrying
//! frame was first seen (spec.md §4.7). Reading the same attachment twice is
//! idempotent.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::crypto::{self, BackupKeys, MAC_LEN};
use crate::error::{BackupError, Result};
use crate::locator::AttachmentLocator;

/// Default bytes read per chunk while streaming a file through HMAC and CTR
/// decryption, used when the caller doesn't override it via `ReaderOptions`.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Seeks to `locator.file_position`, decrypts `locator.length` bytes in
/// `chunk_size`-sized reads, and writes the plaintext to `sink`. Verifies the
/// trailing MAC after the last chunk.
pub fn write_file<R: Read + Seek, W: Write>(
    source: &mut R,
    iv_tail: &[u8; 12],
    keys: &BackupKeys,
    locator: &AttachmentLocator,
    chunk_size: usize,
    sink: &mut W,
) -> Result<()> {
    tracing::debug!(length = locator.length, position = locator.file_position, "decrypting attachment");
    source.seek(SeekFrom::Start(locator.file_position))?;
    let mut cipher = crypto::FileCipher::new(keys, iv_tail, locator.counter_at_start);

    let mut remaining = locator.length as usize;
    let mut chunk = vec![0u8; chunk_size.max(1)];
    while remaining > 0 {
        let take = remaining.min(chunk.len());
        let buf = &mut chunk[..take];
        source.read_exact(buf).map_err(truncated_io)?;
        cipher.update(buf);
        sink.write_all(buf)?;
        remaining -= take;
    }

    let mut mac = [0u8; MAC_LEN];
    source.read_exact(&mut mac).map_err(truncated_io)?;
    cipher.finish(&mac)
}

/// Like [`write_file`] but returns the plaintext as a single buffer.
pub fn file_as_bytes<R: Read + Seek>(
    source: &mut R,
    iv_tail: &[u8; 12],
    keys: &BackupKeys,
    locator: &AttachmentLocator,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(locator.length as usize);
    write_file(source, iv_tail, keys, locator, chunk_size, &mut out)?;
    Ok(out)
}

fn truncated_io(e: std::io::Error) -> BackupError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BackupError::Truncated(e.to_string())
    } else {
        BackupError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Counter;
    use std::io::Cursor;

    const PASSPHRASE: &[u8] = b"correct horse battery staple";
    const SALT: &[u8] = b"0123456789abcdef0123456789abcdef";
    const IV_TAIL: [u8; 12] = *b"tail12bytes!";

    fn fixture(plaintext: &[u8], counter: Counter) -> (Cursor<Vec<u8>>, BackupKeys, AttachmentLocator) {
        let keys = BackupKeys::derive(PASSPHRASE, Some(SALT)).unwrap();
        let (ciphertext, mac) = crypto::encrypt_file_for_test(&keys, &IV_TAIL, counter, plaintext);
        let mut bytes = ciphertext;
        bytes.extend_from_slice(&mac);
        let locator = AttachmentLocator {
            file_position: 0,
            length: plaintext.len() as u32,
            counter_at_start: counter,
        };
        (Cursor::new(bytes), keys, locator)
    }

    #[test]
    fn file_as_bytes_recovers_exact_plaintext() {
        let plaintext = b"attachment contents, spanning more than one chunk boundary test";
        let (mut source, keys, locator) = fixture(plaintext, Counter([0, 0, 0, 5]));
        let out = file_as_bytes(&mut source, &IV_TAIL, &keys, &locator, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn file_as_bytes_is_idempotent() {
        let plaintext = b"read me twice";
        let (mut source, keys, locator) = fixture(plaintext, Counter([0, 0, 0, 1]));
        let first = file_as_bytes(&mut source, &IV_TAIL, &keys, &locator, DEFAULT_CHUNK_SIZE).unwrap();
        let second = file_as_bytes(&mut source, &IV_TAIL, &keys, &locator, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_auth() {
        let plaintext = b"tamper with me";
        let (mut source, keys, locator) = fixture(plaintext, Counter([0, 0, 0, 2]));
        let mut bytes = source.into_inner();
        bytes[0] ^= 0x01;
        let mut source = Cursor::new(bytes);
        assert!(matches!(
            file_as_bytes(&mut source, &IV_TAIL, &keys, &locator, DEFAULT_CHUNK_SIZE),
            Err(BackupError::AuthFailed)
        ));
    }

    #[test]
    fn write_file_streams_across_multiple_chunks() {
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(DEFAULT_CHUNK_SIZE * 2 + 37).collect();
        let (mut source, keys, locator) = fixture(&plaintext, Counter([0, 0, 1, 0]));
        let mut out = Vec::new();
        write_file(&mut source, &IV_TAIL, &keys, &locator, DEFAULT_CHUNK_SIZE, &mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn write_file_honors_a_smaller_chunk_size() {
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(37).collect();
        let (mut source, keys, locator) = fixture(&plaintext, Counter([0, 0, 0, 3]));
        let mut out = Vec::new();
        write_file(&mut source, &IV_TAIL, &keys, &locator, 4, &mut out).unwrap();
        assert_eq!(out, plaintext);
    }
}
