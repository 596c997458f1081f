//! Mock key-management service: deterministic key derivation.
//!
//! Maps (identity, context) to a symmetric key with domain-separated
//! SHA-256 over a process-wide root secret. Derivation is pure: the same
//! inputs always yield the same key, within a process and across processes
//! that share a root secret, which keeps lab runs reproducible. Derived
//! keys are never cached or persisted; callers get a fresh computation on
//! every request and the value is zeroized when dropped.

use sha2::{Digest, Sha256};
use std::fmt;
use tee_lab_common::{LabError, Result};
use zeroize::ZeroizeOnDrop;

const KDF_DOMAIN: &[u8] = b"tee-lab/kdf/v1";

/// Process-wide root secret, established once at startup and never rotated
/// mid-run. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct RootSecret([u8; 32]);

impl RootSecret {
    /// Draw a fresh root secret from the OS CSPRNG.
    pub fn random() -> Self {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        RootSecret(secret)
    }

    /// Parse a pinned root secret from 64 hex characters. Pinning the
    /// secret makes key derivation reproducible across processes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|e| LabError::InvalidInput(format!("root secret is not valid hex: {}", e)))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| LabError::InvalidInput("root secret must be 32 bytes".to_string()))?;
        Ok(RootSecret(bytes))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootSecret(<redacted>)")
    }
}

/// Ephemeral 256-bit key scoped to the call that requested it.
///
/// Never cached, never logged; zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Deterministic (identity, context) -> key derivation service.
pub struct KeyDerivationService {
    root: RootSecret,
}

impl KeyDerivationService {
    pub fn new(root: RootSecret) -> Self {
        KeyDerivationService { root }
    }

    /// Derive a key for `identity` in `context`.
    ///
    /// Identity names a principal and must be non-empty; context is an
    /// arbitrary byte string, typically a measurement or a page address.
    /// Both are length-prefixed into the digest so no two (identity,
    /// context) pairs can collide by concatenation.
    pub fn derive(&self, identity: &str, context: &[u8]) -> Result<DerivedKey> {
        if identity.is_empty() {
            return Err(LabError::InvalidInput(
                "identity must be non-empty".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(KDF_DOMAIN);
        hasher.update(self.root.as_bytes());
        hasher.update((identity.len() as u64).to_be_bytes());
        hasher.update(identity.as_bytes());
        hasher.update((context.len() as u64).to_be_bytes());
        hasher.update(context);
        Ok(DerivedKey(hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let kms = KeyDerivationService::new(RootSecret([7u8; 32]));
        let a = kms.derive("alice", b"ctx").unwrap();
        let b = kms.derive("alice", b"ctx").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derive_reproducible_across_instances() {
        let root = RootSecret::from_hex(&"ab".repeat(32)).unwrap();
        let kms1 = KeyDerivationService::new(root.clone());
        let kms2 = KeyDerivationService::new(root);
        assert_eq!(
            kms1.derive("alice", b"ctx").unwrap().as_bytes(),
            kms2.derive("alice", b"ctx").unwrap().as_bytes()
        );
    }

    #[test]
    fn derive_separates_identity_and_context() {
        let kms = KeyDerivationService::new(RootSecret::random());
        let base = kms.derive("alice", b"ctx").unwrap();
        assert_ne!(
            base.as_bytes(),
            kms.derive("bob", b"ctx").unwrap().as_bytes()
        );
        assert_ne!(
            base.as_bytes(),
            kms.derive("alice", b"other").unwrap().as_bytes()
        );
        // Length prefixes prevent boundary-shifting collisions
        assert_ne!(
            kms.derive("ab", b"c").unwrap().as_bytes(),
            kms.derive("a", b"bc").unwrap().as_bytes()
        );
    }

    #[test]
    fn derive_rejects_empty_identity() {
        let kms = KeyDerivationService::new(RootSecret::random());
        assert!(matches!(
            kms.derive("", b"ctx"),
            Err(LabError::InvalidInput(_))
        ));
    }

    #[test]
    fn root_secret_rejects_bad_hex() {
        assert!(RootSecret::from_hex("not hex").is_err());
        assert!(RootSecret::from_hex("abcd").is_err());
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let kms = KeyDerivationService::new(RootSecret([7u8; 32]));
        let key = kms.derive("alice", b"ctx").unwrap();
        assert_eq!(format!("{:?}", key), "DerivedKey(<redacted>)");
        assert!(!format!("{:?}", RootSecret::random()).contains("07"));
    }
}
