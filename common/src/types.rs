use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Length in bytes of a measurement digest (SHA-256).
pub const MEASUREMENT_LEN: usize = 32;

/// Chained digest summarizing everything ever loaded or encrypted into an
/// instance; the simulated analog of MRENCLAVE / the SEV launch digest.
///
/// Serializes as a lowercase hex string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Measurement([u8; MEASUREMENT_LEN]);

impl Measurement {
    pub fn from_bytes(bytes: [u8; MEASUREMENT_LEN]) -> Self {
        Measurement(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let raw = hex::decode(s).map_err(|e| format!("invalid hex: {}", e))?;
        let bytes: [u8; MEASUREMENT_LEN] = raw
            .try_into()
            .map_err(|_| format!("measurement must be {} bytes", MEASUREMENT_LEN))?;
        Ok(Measurement(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MEASUREMENT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement({})", self.to_hex())
    }
}

impl Serialize for Measurement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Measurement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Measurement::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Simulated attestation report: a pure projection of instance state at
/// call time, bound to a fresh nonce. Never stored by the engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AttestationReport {
    /// Measurement of the attested instance at issue time.
    pub measurement: Measurement,
    /// Signer tag of the issuing authority.
    pub signer: String,
    /// Fresh random nonce, hex-encoded; unique per call.
    pub nonce: String,
    /// Policy version the caller asked to be quoted under.
    pub policy_version: String,
    /// Unix timestamp at issue time.
    pub issued_at: u64,
}

/// Result of launching a simulated SEV VM.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VmLaunch {
    pub vm_id: String,
    pub vcpu_id: u32,
    pub measurement: Measurement,
}

/// Receipt for an encrypted VM page: the post-write measurement and the
/// authentication tag over the stored ciphertext, hex-encoded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PageReceipt {
    pub vm_id: String,
    pub page_id: u64,
    pub measurement: Measurement,
    pub tag: String,
}

/// Result of running a workload inside an enclave: the workload output
/// plus the enclave measurement after the call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ComputeOutcome {
    pub result: serde_json::Value,
    pub measurement: Measurement,
}
