//! Authenticated encryption over derived keys.
//!
//! Wraps ChaCha20-Poly1305 with an explicit {nonce, ciphertext, tag}
//! container. The wire form is `nonce (12) || ciphertext || tag (16)`,
//! matching the artifact framing used everywhere else in the lab. A failed
//! open is always an error, never best-effort plaintext.

use crate::kms::DerivedKey;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use tee_lab_common::{LabError, Result};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// One authenticated-encryption result, fields split out so callers can
/// store or chain the ciphertext and tag independently.
#[derive(Clone, Debug, PartialEq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// Serialize as `nonce || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse the `nonce || ciphertext || tag` framing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(LabError::MalformedToken(
                "sealed data too short (need at least nonce + tag)".to_string(),
            ));
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        Ok(SealedBox {
            nonce: nonce.try_into().expect("nonce length checked"),
            ciphertext: ciphertext.to_vec(),
            tag: tag.try_into().expect("tag length checked"),
        })
    }
}

/// Stateless authenticated cipher over [`DerivedKey`]s.
pub struct AuthenticatedCipher;

impl AuthenticatedCipher {
    /// Encrypt and authenticate `plaintext` under `key` with a fresh
    /// random nonce.
    pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<SealedBox> {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut combined = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| LabError::Internal(format!("ChaCha20-Poly1305 encrypt failed: {}", e)))?;
        let tag_bytes = combined.split_off(combined.len() - TAG_LEN);
        Ok(SealedBox {
            nonce,
            ciphertext: combined,
            tag: tag_bytes.try_into().expect("tag length fixed"),
        })
    }

    /// Verify and decrypt a [`SealedBox`]. Any tampering with ciphertext,
    /// tag, or nonce, or a wrong key, fails with `AuthenticationFailure`.
    pub fn open(key: &DerivedKey, sealed: &SealedBox) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut combined =
            Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&sealed.ciphertext);
        combined.extend_from_slice(&sealed.tag);

        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), combined.as_slice())
            .map_err(|_| LabError::AuthenticationFailure)
    }
}
