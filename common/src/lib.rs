pub mod error;
pub mod types;

// Re-export commonly used types and errors
pub use error::{ErrorKind, LabError, Result};
pub use types::{
    AttestationReport, ComputeOutcome, Measurement, PageReceipt, VmLaunch, MEASUREMENT_LEN,
};

/// Version information for the common crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generate a new UUID v4 string
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Generate a cryptographically secure random nonce.
///
/// Attestation nonces come from the OS CSPRNG on every call; only key
/// derivation is deterministic, never freshness.
pub fn generate_nonce() -> [u8; 16] {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
