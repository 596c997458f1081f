//! Engine configuration.
//!
//! The root secret and signer tag are fixed at process start. Pinning
//! `TEE_LAB_ROOT_SECRET` (64 hex chars) makes key derivation reproducible
//! across runs, which is what the lab exercises expect; without it a fresh
//! random secret is drawn.

use crate::kms::RootSecret;
use tee_lab_common::Result;
use tracing::info;

pub const ROOT_SECRET_ENV: &str = "TEE_LAB_ROOT_SECRET";
pub const SIGNER_ENV: &str = "TEE_LAB_SIGNER";

const DEFAULT_SIGNER: &str = "tee-lab";

pub struct LabConfig {
    pub root_secret: RootSecret,
    pub signer: String,
}

impl LabConfig {
    /// Build a config from the environment, falling back to a random root
    /// secret and the default signer tag.
    pub fn from_env() -> Result<Self> {
        let root_secret = match std::env::var(ROOT_SECRET_ENV) {
            Ok(hex) => {
                info!("using pinned root secret from {}", ROOT_SECRET_ENV);
                RootSecret::from_hex(&hex)?
            }
            Err(_) => RootSecret::random(),
        };
        let signer = std::env::var(SIGNER_ENV).unwrap_or_else(|_| DEFAULT_SIGNER.to_string());
        Ok(LabConfig {
            root_secret,
            signer,
        })
    }

    pub fn new(root_secret: RootSecret, signer: impl Into<String>) -> Self {
        LabConfig {
            root_secret,
            signer: signer.into(),
        }
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            root_secret: RootSecret::random(),
            signer: DEFAULT_SIGNER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_default_signer() {
        assert_eq!(LabConfig::default().signer, "tee-lab");
    }

    #[test]
    fn explicit_config_overrides_signer() {
        let config = LabConfig::new(RootSecret::random(), "classroom-3");
        assert_eq!(config.signer, "classroom-3");
    }
}
