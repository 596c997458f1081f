//! tee-lab simulation engine.
//!
//! Models the control logic of confidential-computing primitives for
//! teaching: an SGX-style enclave lifecycle, an SEV-style encrypted-VM
//! lifecycle, the deterministic key-derivation and authenticated-
//! encryption service both depend on, and the measurement/attestation
//! chaining they share. All "isolation" here is simulated; the point is
//! the shape of the protocols, not real security guarantees.

pub mod attestation;
pub mod cipher;
pub mod config;
pub mod enclave;
pub mod kms;
pub mod measurement;
pub mod sev;
pub mod workloads;

pub use attestation::AttestationIssuer;
pub use cipher::{AuthenticatedCipher, SealedBox};
pub use config::LabConfig;
pub use enclave::{EnclaveHandle, EnclaveRuntime, EnclaveState};
pub use kms::{DerivedKey, KeyDerivationService, RootSecret};
pub use measurement::MeasurementChain;
pub use sev::SevRuntime;
pub use tee_lab_common::{
    AttestationReport, ComputeOutcome, ErrorKind, LabError, Measurement, PageReceipt, Result,
    VmLaunch,
};
pub use workloads::{Workload, WorkloadRegistry};

use std::sync::Arc;

/// The assembled engine: one KMS, one attestation issuer, and the two
/// lifecycle runtimes sharing them. Construct once at process start and
/// hand references into the transport layer.
pub struct Simulator {
    kms: Arc<KeyDerivationService>,
    issuer: Arc<AttestationIssuer>,
    pub enclaves: EnclaveRuntime,
    pub vms: SevRuntime,
}

impl Simulator {
    pub fn new(config: LabConfig) -> Self {
        let kms = Arc::new(KeyDerivationService::new(config.root_secret));
        let issuer = Arc::new(AttestationIssuer::new(config.signer));
        let enclaves = EnclaveRuntime::new(Arc::clone(&kms), Arc::clone(&issuer));
        let vms = SevRuntime::new(Arc::clone(&kms), Arc::clone(&issuer));
        Simulator {
            kms,
            issuer,
            enclaves,
            vms,
        }
    }

    /// The shared key-derivation service; exposed so verifiers in tests
    /// and exercises can re-derive keys and check MACs.
    pub fn kms(&self) -> &KeyDerivationService {
        &self.kms
    }

    pub fn signer(&self) -> &str {
        self.issuer.signer()
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(LabConfig::default())
    }
}
