//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Index of where each attached file's encrypted bytes live in the backup stream.
//!
//! Built incrementally as [`crate::reader::Reader::next_frame`] walks the stream: a
//! file is never decrypted during the first pass, only located, so a second pass
//! (or a seek) can read it on demand via [`crate::file_reader`].

use std::collections::HashMap;

use crate::crypto::Counter;
use crate::error::BackupError;

/// Where one attachment's encrypted blob sits in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLocator {
    /// Byte offset of the first ciphertext byte in the underlying file.
    pub file_position: u64,
    /// Ciphertext length in bytes, excluding the trailing 10-byte MAC.
    pub length: u32,
    /// Frame counter value in effect when this file's bytes begin.
    pub counter_at_start: Counter,
}

/// Maps `(rowid, attachment_id)` to where that attachment's bytes live.
///
/// Avatars and stickers are not indexed here: they carry no row id to key on and the
/// database materializer never looks them up (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct AttachmentLocators {
    index: HashMap<(u64, u64), AttachmentLocator>,
}

impl AttachmentLocators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new locator. Keys are unique by construction (spec.md §3); a duplicate
    /// `(rowid, attachment_id)` means the backup is malformed, so this errs rather than
    /// overwriting the earlier entry (spec.md §4.4).
    pub fn insert(
        &mut self,
        rowid: u64,
        attachment_id: u64,
        locator: AttachmentLocator,
    ) -> Result<(), BackupError> {
        if self.index.contains_key(&(rowid, attachment_id)) {
            return Err(BackupError::InvalidFrame(format!(
                "duplicate attachment locator for (rowid={rowid}, attachment_id={attachment_id})"
            )));
        }
        self.index.insert((rowid, attachment_id), locator);
        Ok(())
    }

    pub fn get(&self, rowid: u64, attachment_id: u64) -> Option<&AttachmentLocator> {
        self.index.get(&(rowid, attachment_id))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u64, u64), &AttachmentLocator)> {
        self.index.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_by_rowid_and_attachment_id() {
        let mut locators = AttachmentLocators::new();
        let loc = AttachmentLocator {
            file_position: 1024,
            length: 512,
            counter_at_start: Counter([0, 0, 0, 4]),
        };
        locators.insert(7, 2, loc).unwrap();
        assert_eq!(locators.get(7, 2), Some(&loc));
        assert_eq!(locators.get(7, 3), None);
    }

    #[test]
    fn duplicate_key_is_rejected_without_overwriting() {
        let mut locators = AttachmentLocators::new();
        let first = AttachmentLocator {
            file_position: 1024,
            length: 512,
            counter_at_start: Counter([0, 0, 0, 4]),
        };
        let second = AttachmentLocator {
            file_position: 9999,
            length: 1,
            counter_at_start: Counter([0, 0, 0, 0]),
        };
        locators.insert(7, 2, first).unwrap();
        assert!(locators.insert(7, 2, second).is_err());
        assert_eq!(locators.get(7, 2), Some(&first));
        assert_eq!(locators.len(), 1);
    }
}
