//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Key derivation, AES-256-CTR decryption, and HMAC-SHA256 frame/file authentication.
//!
//! Key derivation is iterated SHA-512 (250,000 rounds) followed by HKDF-SHA256, not
//! PBKDF2: this matches the Signal Android backup scheme, not a generic
//! password-based KDF. The two resulting keys are held in [`BackupKeys`], which
//! zeroizes on drop.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::BackupError;
use crate::secret::KeyMaterial;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// SHA-512 rounds applied after the initial hash when deriving the pre-key.
const KDF_ROUNDS: u32 = 249_999;
const HKDF_INFO: &[u8] = b"Backup Export";
/// Truncated HMAC-SHA256 tag length carried after every frame and file.
pub const MAC_LEN: usize = 10;

/// The cipherkey and MAC key derived once per backup, zeroized on drop.
#[derive(Clone)]
pub struct BackupKeys {
    cipherkey: KeyMaterial,
    mackey: KeyMaterial,
}

impl BackupKeys {
    /// Derives the cipherkey and MAC key from a passphrase and the Header's salt.
    ///
    /// `h0 = SHA512(salt || passphrase || passphrase)` (or `SHA512(passphrase ||
    /// passphrase)` with no salt), then 249,999 rounds of `h_i =
    /// SHA512(h_{i-1} || passphrase)`. The first 32 bytes of the final hash feed
    /// HKDF-SHA256 with an empty salt and the info string `"Backup Export"`,
    /// producing 64 bytes split into `cipherkey || mackey`.
    pub fn derive(passphrase: &[u8], salt: Option<&[u8]>) -> Result<Self, BackupError> {
        let mut hasher = Sha512::new();
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        hasher.update(passphrase);
        hasher.update(passphrase);
        let mut digest = hasher.finalize();

        for _ in 0..KDF_ROUNDS {
            let mut hasher = Sha512::new();
            hasher.update(digest);
            hasher.update(passphrase);
            digest = hasher.finalize();
        }

        let prekey = &digest[..32];
        let hk = Hkdf::<Sha256>::new(Some(&[]), prekey);
        let mut okm = [0u8; 64];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| BackupError::Crypto(e.to_string()))?;

        let mut cipherkey = [0u8; 32];
        let mut mackey = [0u8; 32];
        cipherkey.copy_from_slice(&okm[..32]);
        mackey.copy_from_slice(&okm[32..]);
        okm.zeroize();

        Ok(Self {
            cipherkey: KeyMaterial::new(cipherkey),
            mackey: KeyMaterial::new(mackey),
        })
    }
}

/// The 32-bit big-endian counter embedded in the first four bytes of the IV.
/// Incremented exactly once per encrypted frame and once per attached file
/// (spec.md §3). Wraps byte-by-byte from the low-order byte, carrying into the
/// next byte on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter(pub [u8; 4]);

impl Counter {
    pub fn from_iv(iv: &[u8]) -> Self {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&iv[..4]);
        Self(bytes)
    }

    pub fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            if *byte < 0xff {
                *byte += 1;
                return;
            }
            *byte = 0;
        }
    }
}

fn build_iv(counter: Counter, tail: &[u8; 12]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&counter.0);
    iv[4..].copy_from_slice(tail);
    iv
}

fn new_cipher(key: &[u8; 32], iv: [u8; 16]) -> Aes256Ctr {
    Aes256Ctr::new_from_slices(key, &iv).expect("key and iv are fixed-size and always valid")
}

fn aes_ctr_decrypt_in_place(key: &[u8; 32], iv: [u8; 16], buf: &mut [u8]) {
    new_cipher(key, iv).apply_keystream(buf);
}

fn truncated_hmac(mackey: &[u8; 32], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new_from_slice(mackey).expect("HMAC accepts any key length");
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&tag[..MAC_LEN]);
    out
}

fn tags_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Builds a valid ciphertext + truncated MAC for one frame. CTR's keystream is
/// symmetric, so "encrypt" here is the same operation as [`decrypt_frame`]'s
/// inner step; only used to construct fixtures for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn encrypt_frame_for_test(
    keys: &BackupKeys,
    iv_tail: &[u8; 12],
    counter: Counter,
    plaintext: &[u8],
) -> (Vec<u8>, [u8; MAC_LEN]) {
    let iv = build_iv(counter, iv_tail);
    let mut ciphertext = plaintext.to_vec();
    aes_ctr_decrypt_in_place(keys.cipherkey.expose_secret(), iv, &mut ciphertext);
    let mac = truncated_hmac(keys.mackey.expose_secret(), &ciphertext);
    (ciphertext, mac)
}

/// Builds a valid ciphertext + truncated MAC for one attached file, including
/// the IV-priming step the file MAC domain requires. Test-fixture use only.
#[cfg(test)]
pub(crate) fn encrypt_file_for_test(
    keys: &BackupKeys,
    iv_tail: &[u8; 12],
    counter: Counter,
    plaintext: &[u8],
) -> (Vec<u8>, [u8; MAC_LEN]) {
    let iv = build_iv(counter, iv_tail);
    let mut ciphertext = plaintext.to_vec();
    new_cipher(keys.cipherkey.expose_secret(), iv).apply_keystream(&mut ciphertext);

    let mut mac = HmacSha256::new_from_slice(keys.mackey.expose_secret()).expect("HMAC accepts any key length");
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();
    let mut trailer = [0u8; MAC_LEN];
    trailer.copy_from_slice(&tag[..MAC_LEN]);
    (ciphertext, trailer)
}

/// Decrypts one encrypted frame: authenticates the ciphertext (not the IV), then
/// decrypts under AES-256-CTR keyed to `counter`.
pub fn decrypt_frame(
    keys: &BackupKeys,
    iv_tail: &[u8; 12],
    counter: Counter,
    ciphertext: &[u8],
    mac_trailer: &[u8; MAC_LEN],
) -> Result<Vec<u8>, BackupError> {
    let computed = truncated_hmac(keys.mackey.expose_secret(), ciphertext);
    if !tags_match(&computed, mac_trailer) {
        return Err(BackupError::AuthFailed);
    }
    let iv = build_iv(counter, iv_tail);
    let mut plaintext = ciphertext.to_vec();
    aes_ctr_decrypt_in_place(keys.cipherkey.expose_secret(), iv, &mut plaintext);
    Ok(plaintext)
}

/// Streaming decryptor + authenticator for an attached file's encrypted bytes.
///
/// Unlike frame authentication, the file's HMAC domain includes the IV: the frame
/// length is implicit in the outer framing, but a file's length is not otherwise
/// bound into its MAC, so the IV is folded in first (spec.md §4.2, §9 Open
/// Question — this asymmetry is intentional and preserved as-is).
pub struct FileCipher {
    cipher: Aes256Ctr,
    mac: HmacSha256,
}

impl FileCipher {
    pub fn new(keys: &BackupKeys, iv_tail: &[u8; 12], counter: Counter) -> Self {
        let iv = build_iv(counter, iv_tail);
        let cipher = new_cipher(keys.cipherkey.expose_secret(), iv);
        let mut mac = HmacSha256::new_from_slice(keys.mackey.expose_secret()).expect("HMAC accepts any key length");
        mac.update(&iv);
        Self { cipher, mac }
    }

    /// Feeds one chunk of ciphertext through the HMAC, then decrypts it in place.
    pub fn update(&mut self, chunk: &mut [u8]) {
        self.mac.update(chunk);
        self.cipher.apply_keystream(chunk);
    }

    /// Verifies the 10-byte trailing MAC against everything fed to [`Self::update`].
    pub fn finish(self, mac_trailer: &[u8; MAC_LEN]) -> Result<(), BackupError> {
        let tag = self.mac.finalize().into_bytes();
        if !tags_match(&tag[..MAC_LEN], mac_trailer) {
            return Err(BackupError::AuthFailed);
        }
        Ok(())
    }
}
