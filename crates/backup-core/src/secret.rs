//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Zeroizing wrapper around the 32-byte cipherkey/mackey material [`crate::crypto::BackupKeys`]
//! derives from a passphrase.
//!
//! [`KeyMaterial`] is scoped to exactly the one shape this crate ever needs to protect — a
//! 32-byte HKDF output — rather than a generic `Secret<T>`: there is nothing else in a backup
//! reader that wants zeroize-on-drop, so a generic wrapper would carry machinery (arbitrary `T`,
//! bounds on `Zeroize`/`Clone`/`PartialEq`) this crate never exercises.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One derived key (cipherkey or mackey): redacted in `Debug`, zeroized on drop, accessible
/// only through [`KeyMaterial::expose_secret`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; 32]);

impl KeyMaterial {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Access the raw key bytes. The caller must not log or otherwise persist them.
    pub fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = KeyMaterial::new([0x42; 32]);
        let output = format!("{key:?}");
        assert_eq!(output, "KeyMaterial([REDACTED])");
        assert!(!output.contains("66")); // 0x42 == 66, would appear if bytes leaked
    }

    #[test]
    fn expose_secret_returns_the_bytes() {
        let bytes = [7u8; 32];
        let key = KeyMaterial::new(bytes);
        assert_eq!(key.expose_secret(), &bytes);
    }

    #[test]
    fn equality_compares_key_bytes() {
        let a = KeyMaterial::new([1; 32]);
        let b = KeyMaterial::new([1; 32]);
        let c = KeyMaterial::new([2; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn clone_preserves_key_bytes() {
        let original = KeyMaterial::new([9; 32]);
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
