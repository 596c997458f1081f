//! SGX-style enclave lifecycle runtime.
//!
//! Owns every named enclave instance. Creation happens on first
//! `load_or_fetch`/`compute`; instances live for the rest of the process.
//! Each instance carries a measurement chain seeded with the fixed code
//! identity, an ordered page list, and per-identity sealed storage.
//!
//! Locking is two-level: the registry map is locked only for
//! insert/lookup, each instance has its own mutex held for the duration
//! of one operation. The measurement is an order-sensitive fold, so
//! same-instance operations must serialize; different instances proceed
//! in parallel.

use crate::attestation::AttestationIssuer;
use crate::cipher::{AuthenticatedCipher, SealedBox, NONCE_LEN, TAG_LEN};
use crate::kms::KeyDerivationService;
use crate::measurement::MeasurementChain;
use crate::workloads::{
    self, CounterParams, InferenceParams, KeywordSearchParams, SealedSecretParams, Workload,
    WorkloadRegistry,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tee_lab_common::{
    AttestationReport, ComputeOutcome, LabError, Measurement, Result, MEASUREMENT_LEN,
};
use tracing::{debug, info};

/// Fixed "code identity" folded into every new enclave's measurement, so
/// distinct instances of the same code base share a stable baseline.
pub const ENCLAVE_CODE_IDENTITY: &[u8] = b"tee-lab/enclave-code/v1";

/// Lifecycle state. `Entered` only ever holds while a workload runs
/// inside `compute`; sealed-storage operations require `Loaded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EnclaveState {
    Loaded,
    Entered,
}

/// Data sealed to an (identity, measurement) pair.
#[derive(Clone, Debug)]
pub struct SealedBlob {
    pub identity: String,
    pub sealed_at: Measurement,
    pub data: SealedBox,
}

/// One simulated enclave instance.
#[derive(Debug)]
pub struct Enclave {
    name: String,
    state: EnclaveState,
    measurement: Measurement,
    pages: Vec<Vec<u8>>,
    sealed: HashMap<String, SealedBlob>,
}

impl Enclave {
    fn new(name: &str) -> Self {
        let measurement = MeasurementChain::extend(&MeasurementChain::initial(), ENCLAVE_CODE_IDENTITY);
        Enclave {
            name: name.to_string(),
            state: EnclaveState::Loaded,
            measurement,
            pages: vec![ENCLAVE_CODE_IDENTITY.to_vec()],
            sealed: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn state(&self) -> EnclaveState {
        self.state
    }

    /// Identities with data currently in sealed storage.
    pub fn sealed_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.sealed.keys().cloned().collect();
        identities.sort();
        identities
    }

    fn snapshot(&self) -> EnclaveHandle {
        EnclaveHandle {
            name: self.name.clone(),
            measurement: self.measurement.clone(),
            state: self.state,
            loaded_pages: self.pages.len(),
        }
    }
}

/// Caller-facing snapshot of an enclave instance.
#[derive(Clone, Debug, Serialize)]
pub struct EnclaveHandle {
    pub name: String,
    pub measurement: Measurement,
    pub state: EnclaveState,
    pub loaded_pages: usize,
}

/// Runtime owning all enclave instances.
pub struct EnclaveRuntime {
    kms: Arc<KeyDerivationService>,
    issuer: Arc<AttestationIssuer>,
    registry: Mutex<HashMap<String, Arc<Mutex<Enclave>>>>,
}

impl EnclaveRuntime {
    pub fn new(kms: Arc<KeyDerivationService>, issuer: Arc<AttestationIssuer>) -> Self {
        EnclaveRuntime {
            kms,
            issuer,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent get-or-create. A new instance starts `Loaded` with
    /// empty sealed storage and the code-identity baseline measurement.
    pub fn load_or_fetch(&self, name: &str) -> Result<EnclaveHandle> {
        let instance = self.get_or_insert(name)?;
        let enclave = lock_instance(&instance)?;
        Ok(enclave.snapshot())
    }

    /// Run a workload inside the enclave: Loaded -> Entered -> Loaded.
    ///
    /// Creates the instance on first use. Payloads are validated against
    /// the workload's declared shape before anything executes.
    pub fn compute(&self, name: &str, workload_name: &str, payload: &Value) -> Result<ComputeOutcome> {
        let workload = WorkloadRegistry::lookup(workload_name)?;
        let instance = self.get_or_insert(name)?;
        let mut enclave = lock_instance(&instance)?;

        enclave.state = EnclaveState::Entered;
        debug!(enclave = name, workload = workload.name(), "enclave entered");
        let result = self.dispatch(&mut enclave, workload, payload);
        enclave.state = EnclaveState::Loaded;
        debug!(enclave = name, workload = workload.name(), "enclave exited");

        Ok(ComputeOutcome {
            result: result?,
            measurement: enclave.measurement.clone(),
        })
    }

    /// Seal JSON data to (identity, current measurement). Returns an
    /// opaque token carrying the seal-time measurement and the sealed
    /// bytes; the blob is also kept in the instance's sealed storage.
    pub fn seal(&self, name: &str, identity: &str, data: &Value) -> Result<String> {
        let instance = self.instance(name)?;
        let mut enclave = lock_instance(&instance)?;
        self.seal_locked(&mut enclave, identity, data)
    }

    /// Unseal a token for `identity` under the enclave's *current*
    /// measurement. Sealing binds secrecy to the trusted-code identity at
    /// seal time: if the measurement has advanced since, this fails with
    /// `SealMismatch`; tampering or a wrong identity fails with
    /// `AuthenticationFailure`.
    pub fn unseal(&self, name: &str, identity: &str, token: &str) -> Result<Value> {
        let instance = self.instance(name)?;
        let enclave = lock_instance(&instance)?;
        self.unseal_locked(&enclave, identity, token)
    }

    /// Issue an attestation report over the enclave's current
    /// measurement. Never auto-creates: unknown names are an error.
    pub fn attest(&self, name: &str, policy_version: &str) -> Result<AttestationReport> {
        let instance = self.instance(name)?;
        let enclave = lock_instance(&instance)?;
        self.issuer.attest(&enclave.measurement, policy_version)
    }

    /// Untrusted-host boundary call: a structured echo, the capability
    /// split opposite the trusted workload set. Carries no secrets and
    /// never touches the measurement.
    pub fn ocall(&self, name: &str, call: &str, payload: &Value) -> Result<Value> {
        if call.is_empty() {
            return Err(LabError::InvalidInput("ocall name must be non-empty".to_string()));
        }
        let instance = self.instance(name)?;
        let enclave = lock_instance(&instance)?;
        debug!(enclave = enclave.name(), call = call, "ocall");
        Ok(json!({ "call": call, "echo": payload }))
    }

    fn dispatch(&self, enclave: &mut Enclave, workload: Workload, payload: &Value) -> Result<Value> {
        match workload {
            Workload::KeywordSearch => {
                let params = KeywordSearchParams::parse(payload)?;
                Ok(workloads::keyword_search(&params))
            }
            Workload::Inference => {
                let params = InferenceParams::parse(payload)?;
                Ok(workloads::inference(&params))
            }
            Workload::SealedSecret => {
                let params = SealedSecretParams::parse(payload)?;
                let token =
                    self.seal_locked(enclave, &params.identity, &json!({ "secret": params.secret }))?;
                let recovered = self.unseal_locked(enclave, &params.identity, &token)?;
                Ok(json!({ "token": token, "recovered": recovered["secret"] }))
            }
            Workload::Counter => {
                let params = CounterParams::parse(payload)?;
                let value = params.value()?;

                // Per-call key bound to the enclave's identity and the
                // measurement as it stood when the counter ran.
                let mut context = enclave.measurement.as_bytes().to_vec();
                context.extend_from_slice(b"/counter");
                let key = self.kms.derive(&enclave.name, &context)?;
                let mac = workloads::counter_mac(&key, value);

                // State progression is bound into the chain.
                enclave.measurement =
                    MeasurementChain::extend(&enclave.measurement, &value.to_be_bytes());
                Ok(json!({ "counter": value, "mac": mac }))
            }
        }
    }

    fn seal_locked(&self, enclave: &mut Enclave, identity: &str, data: &Value) -> Result<String> {
        let key = self.kms.derive(identity, enclave.measurement.as_bytes())?;
        let plaintext = serde_json::to_vec(data)?;
        let sealed = AuthenticatedCipher::seal(&key, &plaintext)?;
        let token = encode_token(&enclave.measurement, &sealed);

        enclave.sealed.insert(
            identity.to_string(),
            SealedBlob {
                identity: identity.to_string(),
                sealed_at: enclave.measurement.clone(),
                data: sealed,
            },
        );
        info!(enclave = enclave.name(), identity = identity, "data sealed");
        Ok(token)
    }

    fn unseal_locked(&self, enclave: &Enclave, identity: &str, token: &str) -> Result<Value> {
        let (sealed_at, sealed) = decode_token(token)?;
        if sealed_at != enclave.measurement {
            return Err(LabError::SealMismatch {
                sealed: sealed_at.to_hex(),
                current: enclave.measurement.to_hex(),
            });
        }
        let key = self.kms.derive(identity, enclave.measurement.as_bytes())?;
        let plaintext = AuthenticatedCipher::open(&key, &sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn instance(&self, name: &str) -> Result<Arc<Mutex<Enclave>>> {
        let registry = lock_registry(&self.registry)?;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| LabError::UnknownEnclave(name.to_string()))
    }

    fn get_or_insert(&self, name: &str) -> Result<Arc<Mutex<Enclave>>> {
        if name.is_empty() {
            return Err(LabError::InvalidInput(
                "enclave name must be non-empty".to_string(),
            ));
        }
        let mut registry = lock_registry(&self.registry)?;
        if let Some(instance) = registry.get(name) {
            return Ok(Arc::clone(instance));
        }
        info!(enclave = name, "enclave created");
        let instance = Arc::new(Mutex::new(Enclave::new(name)));
        registry.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

fn lock_registry<'a>(
    registry: &'a Mutex<HashMap<String, Arc<Mutex<Enclave>>>>,
) -> Result<std::sync::MutexGuard<'a, HashMap<String, Arc<Mutex<Enclave>>>>> {
    registry
        .lock()
        .map_err(|_| LabError::Internal("enclave registry lock poisoned".to_string()))
}

fn lock_instance(instance: &Mutex<Enclave>) -> Result<std::sync::MutexGuard<'_, Enclave>> {
    instance
        .lock()
        .map_err(|_| LabError::Internal("enclave instance lock poisoned".to_string()))
}

fn encode_token(sealed_at: &Measurement, sealed: &SealedBox) -> String {
    let mut bytes = Vec::with_capacity(MEASUREMENT_LEN + NONCE_LEN + sealed.ciphertext.len() + TAG_LEN);
    bytes.extend_from_slice(sealed_at.as_bytes());
    bytes.extend_from_slice(&sealed.to_bytes());
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode_token(token: &str) -> Result<(Measurement, SealedBox)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| LabError::MalformedToken(format!("not valid base64: {}", e)))?;
    if bytes.len() < MEASUREMENT_LEN + NONCE_LEN + TAG_LEN {
        return Err(LabError::MalformedToken("token too short".to_string()));
    }
    let (measurement_bytes, rest) = bytes.split_at(MEASUREMENT_LEN);
    let measurement = Measurement::from_bytes(
        measurement_bytes
            .try_into()
            .expect("measurement length checked"),
    );
    Ok((measurement, SealedBox::from_bytes(rest)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::RootSecret;

    fn runtime() -> EnclaveRuntime {
        EnclaveRuntime::new(
            Arc::new(KeyDerivationService::new(RootSecret::random())),
            Arc::new(AttestationIssuer::new("lab")),
        )
    }

    #[test]
    fn load_or_fetch_is_idempotent() {
        let rt = runtime();
        let a = rt.load_or_fetch("alpha").unwrap();
        let b = rt.load_or_fetch("alpha").unwrap();
        assert_eq!(a.measurement, b.measurement);
        assert_eq!(a.state, EnclaveState::Loaded);
        assert_eq!(a.loaded_pages, 1);
    }

    #[test]
    fn distinct_enclaves_share_code_baseline() {
        let rt = runtime();
        let a = rt.load_or_fetch("alpha").unwrap();
        let b = rt.load_or_fetch("beta").unwrap();
        assert_eq!(a.measurement, b.measurement);
    }

    #[test]
    fn load_or_fetch_rejects_empty_name() {
        assert!(matches!(
            runtime().load_or_fetch(""),
            Err(LabError::InvalidInput(_))
        ));
    }

    #[test]
    fn compute_rejects_unknown_workload() {
        let rt = runtime();
        assert_eq!(
            rt.compute("alpha", "mystery", &json!({})),
            Err(LabError::UnknownWorkload("mystery".to_string()))
        );
    }

    #[test]
    fn compute_leaves_state_loaded_after_payload_error() {
        let rt = runtime();
        let err = rt
            .compute("alpha", "keyword_search", &json!({ "keyword": "" }))
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidPayload(_)));
        assert_eq!(rt.load_or_fetch("alpha").unwrap().state, EnclaveState::Loaded);
    }

    #[test]
    fn pure_compute_does_not_move_measurement() {
        let rt = runtime();
        let before = rt.load_or_fetch("alpha").unwrap().measurement;
        let outcome = rt
            .compute(
                "alpha",
                "keyword_search",
                &json!({ "keyword": "x", "documents": ["x y x"] }),
            )
            .unwrap();
        assert_eq!(outcome.measurement, before);
    }

    #[test]
    fn counter_compute_advances_measurement() {
        let rt = runtime();
        let before = rt.load_or_fetch("alpha").unwrap().measurement;
        let outcome = rt
            .compute("alpha", "counter", &json!({ "initial": 0, "increments": 3 }))
            .unwrap();
        assert_eq!(outcome.result["counter"], json!(3));
        assert_ne!(outcome.measurement, before);
        assert_eq!(
            outcome.measurement,
            MeasurementChain::extend(&before, &3u64.to_be_bytes())
        );
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        let data = json!({ "api_key": "12345", "tier": 2 });
        let token = rt.seal("alpha", "owner-1", &data).unwrap();
        assert_eq!(rt.unseal("alpha", "owner-1", &token).unwrap(), data);
    }

    #[test]
    fn seal_requires_existing_enclave() {
        let rt = runtime();
        assert_eq!(
            rt.seal("ghost", "owner", &json!({})),
            Err(LabError::UnknownEnclave("ghost".to_string()))
        );
        assert!(matches!(
            rt.unseal("ghost", "owner", "token"),
            Err(LabError::UnknownEnclave(_))
        ));
        assert!(matches!(
            rt.attest("ghost", "v1"),
            Err(LabError::UnknownEnclave(_))
        ));
    }

    #[test]
    fn unseal_with_wrong_identity_fails_authentication() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        let token = rt.seal("alpha", "owner-1", &json!({ "s": 1 })).unwrap();
        assert_eq!(
            rt.unseal("alpha", "owner-2", &token),
            Err(LabError::AuthenticationFailure)
        );
    }

    #[test]
    fn unseal_after_measurement_advance_is_seal_mismatch() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        let token = rt.seal("alpha", "owner-1", &json!({ "s": 1 })).unwrap();
        // Counter advances the measurement chain
        rt.compute("alpha", "counter", &json!({ "increments": 1 }))
            .unwrap();
        assert!(matches!(
            rt.unseal("alpha", "owner-1", &token),
            Err(LabError::SealMismatch { .. })
        ));
    }

    #[test]
    fn unseal_rejects_malformed_token() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        assert!(matches!(
            rt.unseal("alpha", "owner-1", "@@not-base64@@"),
            Err(LabError::MalformedToken(_))
        ));
        assert!(matches!(
            rt.unseal("alpha", "owner-1", "AAAA"),
            Err(LabError::MalformedToken(_))
        ));
    }

    #[test]
    fn sealed_secret_workload_roundtrips_inside_compute() {
        let rt = runtime();
        let outcome = rt
            .compute(
                "alpha",
                "sealed_secret",
                &json!({ "identity": "owner-1", "secret": "hunter2" }),
            )
            .unwrap();
        assert_eq!(outcome.result["recovered"], json!("hunter2"));
        assert!(outcome.result["token"].as_str().unwrap().len() > 40);
    }

    #[test]
    fn sealed_identities_tracked() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        rt.seal("alpha", "bob", &json!({})).unwrap();
        rt.seal("alpha", "alice", &json!({})).unwrap();
        let instance = rt.instance("alpha").unwrap();
        let enclave = instance.lock().unwrap();
        assert_eq!(enclave.sealed_identities(), vec!["alice", "bob"]);
    }

    #[test]
    fn ocall_echoes_payload() {
        let rt = runtime();
        rt.load_or_fetch("alpha").unwrap();
        let echo = rt
            .ocall("alpha", "log_event", &json!({ "level": "info" }))
            .unwrap();
        assert_eq!(echo["call"], json!("log_event"));
        assert_eq!(echo["echo"], json!({ "level": "info" }));
    }
}
