//! AES-256-GCM sealing of template payloads at rest.
//!
//! Sealed form is `nonce || ciphertext` with a fresh random 96-bit nonce
//! per write. The GCM tag authenticates the payload, so a flipped byte in
//! the database surfaces as an open failure instead of a corrupt template.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum SealError {
    #[error("sealed payload shorter than the nonce; blob is truncated")]
    Truncated,
    #[error("payload could not be {op}ed: {message}")]
    Crypto { op: &'static str, message: String },
}

/// Symmetric cipher wrapping template payloads.
pub struct TemplateCipher {
    cipher: Aes256Gcm,
}

impl TemplateCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|err| SealError::Crypto {
                op: "seal",
                message: err.to_string(),
            })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, SealError> {
        if blob.len() < NONCE_LEN {
            return Err(SealError::Truncated);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|err| SealError::Crypto {
                op: "open",
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TemplateCipher {
        TemplateCipher::new(&[0x22; 32])
    }

    #[test]
    fn seal_open_round_trip() {
        let sealed = cipher().seal(b"payload bytes").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"payload bytes".as_slice());
        assert_eq!(cipher().open(&sealed).unwrap(), b"payload bytes");
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let a = cipher().seal(b"same").unwrap();
        let b = cipher().seal(b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let mut sealed = cipher().seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            cipher().open(&sealed),
            Err(SealError::Crypto { op: "open", .. })
        ));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = cipher().seal(b"payload").unwrap();
        let other = TemplateCipher::new(&[0x33; 32]);
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(matches!(
            cipher().open(&[0u8; 4]),
            Err(SealError::Truncated)
        ));
    }
}
