//! Reference workloads executed inside the simulated trusted boundary.
//!
//! The registry is a static name -> workload mapping, immutable after
//! process start. Every payload is validated against its declared shape
//! before the workload runs; an unknown workload name is a hard error.
//!
//! Measurement policy is per-workload, not global: `counter` binds its
//! resulting value into the enclave's measurement chain to prove state
//! progression, the other three are pure reads and leave it untouched.

use crate::kms::DerivedKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tee_lab_common::{LabError, Result};

const COUNTER_MAC_DOMAIN: &[u8] = b"tee-lab/counter-mac/v1";

/// Upper bound on counter increments; keeps `initial + increments` far
/// from u64 overflow for any sane initial value.
pub const MAX_COUNTER_INCREMENTS: u64 = 1_000_000;

/// The four reference workloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    KeywordSearch,
    SealedSecret,
    Inference,
    Counter,
}

impl Workload {
    pub fn name(&self) -> &'static str {
        match self {
            Workload::KeywordSearch => "keyword_search",
            Workload::SealedSecret => "sealed_secret",
            Workload::Inference => "inference",
            Workload::Counter => "counter",
        }
    }
}

/// Static workload-name registry.
pub struct WorkloadRegistry;

impl WorkloadRegistry {
    pub const NAMES: [&'static str; 4] =
        ["keyword_search", "sealed_secret", "inference", "counter"];

    /// Resolve a workload by name; unknown names are a hard error,
    /// never silently ignored.
    pub fn lookup(name: &str) -> Result<Workload> {
        match name {
            "keyword_search" => Ok(Workload::KeywordSearch),
            "sealed_secret" => Ok(Workload::SealedSecret),
            "inference" => Ok(Workload::Inference),
            "counter" => Ok(Workload::Counter),
            other => Err(LabError::UnknownWorkload(other.to_string())),
        }
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &Value, workload: &str) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| LabError::InvalidPayload(format!("{}: {}", workload, e)))
}

#[derive(Deserialize, Debug)]
pub struct KeywordSearchParams {
    pub keyword: String,
    pub documents: Vec<String>,
}

impl KeywordSearchParams {
    pub fn parse(payload: &Value) -> Result<Self> {
        let params: Self = parse_payload(payload, "keyword_search")?;
        if params.keyword.is_empty() {
            return Err(LabError::InvalidPayload(
                "keyword_search: keyword must be a non-empty string".to_string(),
            ));
        }
        Ok(params)
    }
}

#[derive(Deserialize, Debug)]
pub struct SealedSecretParams {
    pub identity: String,
    pub secret: String,
}

impl SealedSecretParams {
    pub fn parse(payload: &Value) -> Result<Self> {
        let params: Self = parse_payload(payload, "sealed_secret")?;
        if params.identity.is_empty() || params.secret.is_empty() {
            return Err(LabError::InvalidPayload(
                "sealed_secret: identity and secret cannot be empty".to_string(),
            ));
        }
        Ok(params)
    }
}

#[derive(Deserialize, Debug)]
pub struct InferenceParams {
    pub vector: Vec<f64>,
}

impl InferenceParams {
    pub fn parse(payload: &Value) -> Result<Self> {
        let params: Self = parse_payload(payload, "inference")?;
        if params.vector.iter().any(|v| !v.is_finite()) {
            return Err(LabError::InvalidPayload(
                "inference: vector entries must be finite numbers".to_string(),
            ));
        }
        Ok(params)
    }
}

#[derive(Deserialize, Debug)]
pub struct CounterParams {
    #[serde(default)]
    pub initial: u64,
    #[serde(default = "default_increments")]
    pub increments: u64,
}

fn default_increments() -> u64 {
    1
}

impl CounterParams {
    pub fn parse(payload: &Value) -> Result<Self> {
        let params: Self = parse_payload(payload, "counter")?;
        if params.increments > MAX_COUNTER_INCREMENTS {
            return Err(LabError::InvalidPayload(format!(
                "counter: increments must not exceed {}",
                MAX_COUNTER_INCREMENTS
            )));
        }
        Ok(params)
    }

    /// `initial + increments` with overflow checked.
    pub fn value(&self) -> Result<u64> {
        self.initial.checked_add(self.increments).ok_or_else(|| {
            LabError::InvalidPayload("counter: initial + increments overflows".to_string())
        })
    }
}

/// Count exact, case-sensitive keyword occurrences across documents.
/// Returns per-document counts (document order) and the total.
pub fn keyword_search(params: &KeywordSearchParams) -> Value {
    let counts: Vec<u64> = params
        .documents
        .iter()
        .map(|doc| {
            doc.split_whitespace()
                .filter(|token| *token == params.keyword)
                .count() as u64
        })
        .collect();
    let total: u64 = counts.iter().sum();
    json!({ "counts": counts, "total": total })
}

/// Euclidean norm of the vector plus a SHA-256 commitment over its
/// little-endian byte encoding.
pub fn inference(params: &InferenceParams) -> Value {
    let norm = params.vector.iter().map(|v| v * v).sum::<f64>().sqrt();

    let mut hasher = Sha256::new();
    for v in &params.vector {
        hasher.update(v.to_le_bytes());
    }
    json!({ "norm": norm, "commitment": hex::encode(hasher.finalize()) })
}

/// Keyed MAC over a counter value. The key is derived per call, so the
/// MAC proves the increment path ran under the enclave's identity and
/// measurement at compute time.
pub fn counter_mac(key: &DerivedKey, value: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(COUNTER_MAC_DOMAIN);
    hasher.update(key.as_bytes());
    hasher.update(value.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{KeyDerivationService, RootSecret};

    #[test]
    fn registry_resolves_all_names() {
        for name in WorkloadRegistry::NAMES {
            assert_eq!(WorkloadRegistry::lookup(name).unwrap().name(), name);
        }
    }

    #[test]
    fn registry_rejects_unknown_name() {
        assert_eq!(
            WorkloadRegistry::lookup("mystery"),
            Err(LabError::UnknownWorkload("mystery".to_string()))
        );
    }

    #[test]
    fn keyword_search_counts_per_document() {
        let params = KeywordSearchParams::parse(&json!({
            "keyword": "secure",
            "documents": ["hello secure world", "secure enclaves"],
        }))
        .unwrap();
        let result = keyword_search(&params);
        assert_eq!(result["counts"], json!([1, 1]));
        assert_eq!(result["total"], json!(2));
    }

    #[test]
    fn keyword_search_is_case_sensitive() {
        let params = KeywordSearchParams::parse(&json!({
            "keyword": "Secure",
            "documents": ["secure SECURE Secure"],
        }))
        .unwrap();
        let result = keyword_search(&params);
        assert_eq!(result["total"], json!(1));
    }

    #[test]
    fn keyword_search_rejects_empty_keyword() {
        let err = KeywordSearchParams::parse(&json!({
            "keyword": "",
            "documents": ["doc"],
        }))
        .unwrap_err();
        assert!(matches!(err, LabError::InvalidPayload(_)));
    }

    #[test]
    fn keyword_search_rejects_non_string_documents() {
        let err = KeywordSearchParams::parse(&json!({
            "keyword": "x",
            "documents": [1, 2],
        }))
        .unwrap_err();
        assert!(matches!(err, LabError::InvalidPayload(_)));
    }

    #[test]
    fn inference_norm_and_commitment() {
        let params = InferenceParams::parse(&json!({ "vector": [3.0, 4.0] })).unwrap();
        let result = inference(&params);
        assert!((result["norm"].as_f64().unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(result["commitment"].as_str().unwrap().len(), 64);

        // Commitment is over the vector bytes, so it moves with the input
        let other = inference(&InferenceParams::parse(&json!({ "vector": [4.0, 3.0] })).unwrap());
        assert_ne!(result["commitment"], other["commitment"]);
    }

    #[test]
    fn inference_rejects_malformed_vector() {
        assert!(InferenceParams::parse(&json!({ "vector": ["nan"] })).is_err());
        assert!(InferenceParams::parse(&json!({})).is_err());
    }

    #[test]
    fn counter_defaults_match_single_increment() {
        let params = CounterParams::parse(&json!({})).unwrap();
        assert_eq!(params.initial, 0);
        assert_eq!(params.increments, 1);
        assert_eq!(params.value().unwrap(), 1);
    }

    #[test]
    fn counter_rejects_negative_and_oversized_increments() {
        assert!(CounterParams::parse(&json!({ "increments": -1 })).is_err());
        assert!(CounterParams::parse(&json!({ "increments": MAX_COUNTER_INCREMENTS + 1 })).is_err());
    }

    #[test]
    fn counter_checked_overflow() {
        let params = CounterParams {
            initial: u64::MAX,
            increments: 1,
        };
        assert!(matches!(params.value(), Err(LabError::InvalidPayload(_))));
    }

    #[test]
    fn counter_mac_is_keyed_and_value_bound() {
        let kms = KeyDerivationService::new(RootSecret::random());
        let key = kms.derive("enclave-a", b"counter").unwrap();
        let mac3 = counter_mac(&key, 3);
        assert_eq!(mac3, counter_mac(&key, 3));
        assert_ne!(mac3, counter_mac(&key, 4));

        let other_key = kms.derive("enclave-b", b"counter").unwrap();
        assert_ne!(mac3, counter_mac(&other_key, 3));
    }
}
