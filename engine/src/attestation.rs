//! Attestation report issuance.
//!
//! A report binds the subject's current measurement to a fresh CSPRNG
//! nonce and the issuer's signer tag. Reports are pure projections of
//! state at call time; the issuer keeps nothing.

use tee_lab_common::{
    current_timestamp, generate_nonce, AttestationReport, LabError, Measurement, Result,
};
use tracing::debug;

/// Issues simulated attestation reports under a fixed signer tag.
pub struct AttestationIssuer {
    signer: String,
}

impl AttestationIssuer {
    pub fn new(signer: impl Into<String>) -> Self {
        AttestationIssuer {
            signer: signer.into(),
        }
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// Issue a report over `measurement` for `policy_version`.
    ///
    /// The nonce is drawn fresh from the OS CSPRNG on every call; two
    /// consecutive reports never share one.
    pub fn attest(&self, measurement: &Measurement, policy_version: &str) -> Result<AttestationReport> {
        if policy_version.is_empty() {
            return Err(LabError::InvalidInput(
                "policy_version must be non-empty".to_string(),
            ));
        }

        let nonce = hex::encode(generate_nonce());
        debug!(measurement = %measurement, nonce = %nonce, "attestation issued");
        Ok(AttestationReport {
            measurement: measurement.clone(),
            signer: self.signer.clone(),
            nonce,
            policy_version: policy_version.to_string(),
            issued_at: current_timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::MeasurementChain;

    #[test]
    fn report_projects_current_state() {
        let issuer = AttestationIssuer::new("lab");
        let m = MeasurementChain::initial();
        let report = issuer.attest(&m, "v1").unwrap();
        assert_eq!(report.measurement, m);
        assert_eq!(report.signer, "lab");
        assert_eq!(report.policy_version, "v1");
        assert_eq!(report.nonce.len(), 32);
    }

    #[test]
    fn consecutive_nonces_differ() {
        let issuer = AttestationIssuer::new("lab");
        let m = MeasurementChain::initial();
        let a = issuer.attest(&m, "v1").unwrap();
        let b = issuer.attest(&m, "v1").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn rejects_empty_policy_version() {
        let issuer = AttestationIssuer::new("lab");
        assert!(matches!(
            issuer.attest(&MeasurementChain::initial(), ""),
            Err(LabError::InvalidInput(_))
        ));
    }
}
