//! SEV-style encrypted-VM lifecycle runtime.
//!
//! A VM is created by `launch` (one vCPU, measurement seeded with owner
//! and vm_id) and lives for the rest of the process. Pages are encrypted
//! individually under per-page derived keys; every page write, including
//! overwrites, chains `page_id || ciphertext || tag` into the VM
//! measurement, so the chain records the full ordered write history.
//!
//! Registry and instance locking follow the same two-level scheme as the
//! enclave runtime.

use crate::attestation::AttestationIssuer;
use crate::cipher::{AuthenticatedCipher, SealedBox};
use crate::kms::{DerivedKey, KeyDerivationService};
use crate::measurement::MeasurementChain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tee_lab_common::{
    generate_id, AttestationReport, LabError, Measurement, PageReceipt, Result, VmLaunch,
};
use tracing::{debug, info};

/// Maximum accepted page payload, in bytes.
pub const MAX_PAGE_PAYLOAD: usize = 8192;

/// Maximum accepted owner-identity length, in characters.
pub const MAX_OWNER_LEN: usize = 128;

/// Minimal vCPU representation: an id and a launched flag, no execution
/// semantics.
#[derive(Clone, Debug, PartialEq)]
pub struct VcpuState {
    pub id: u32,
    pub launched: bool,
}

/// One encrypted page: ciphertext plus tag, keyed by page id.
#[derive(Clone, Debug)]
pub struct EncryptedPage {
    pub page_id: u64,
    pub data: SealedBox,
}

/// One simulated encrypted VM.
#[derive(Debug)]
pub struct VirtualMachine {
    vm_id: String,
    owner: String,
    vcpus: Vec<VcpuState>,
    measurement: Measurement,
    pages: HashMap<u64, EncryptedPage>,
}

impl VirtualMachine {
    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn page(&self, page_id: u64) -> Option<&EncryptedPage> {
        self.pages.get(&page_id)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Runtime owning all VM instances.
pub struct SevRuntime {
    kms: Arc<KeyDerivationService>,
    issuer: Arc<AttestationIssuer>,
    registry: Mutex<HashMap<String, Arc<Mutex<VirtualMachine>>>>,
}

impl SevRuntime {
    pub fn new(kms: Arc<KeyDerivationService>, issuer: Arc<AttestationIssuer>) -> Self {
        SevRuntime {
            kms,
            issuer,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a VM for `owner`: generate a unique vm_id, initialize one
    /// vCPU, and seed the measurement with `owner || vm_id`.
    pub fn launch(&self, owner: &str) -> Result<VmLaunch> {
        if owner.is_empty() {
            return Err(LabError::LaunchFailure(
                "owner identity must be non-empty".to_string(),
            ));
        }
        if owner.chars().count() > MAX_OWNER_LEN {
            return Err(LabError::LaunchFailure(format!(
                "owner identity exceeds {} characters",
                MAX_OWNER_LEN
            )));
        }

        let vm_id = generate_id();
        let mut seed = owner.as_bytes().to_vec();
        seed.extend_from_slice(vm_id.as_bytes());
        let measurement = MeasurementChain::extend(&MeasurementChain::initial(), &seed);

        let vm = VirtualMachine {
            vm_id: vm_id.clone(),
            owner: owner.to_string(),
            vcpus: vec![VcpuState {
                id: 0,
                launched: true,
            }],
            measurement: measurement.clone(),
            pages: HashMap::new(),
        };

        let mut registry = lock_registry(&self.registry)?;
        registry.insert(vm_id.clone(), Arc::new(Mutex::new(vm)));
        info!(vm_id = %vm_id, owner = owner, "VM launched");

        Ok(VmLaunch {
            vm_id,
            vcpu_id: 0,
            measurement,
        })
    }

    /// Encrypt `payload` into page `page_id`, overwriting any previous
    /// content, and chain the write into the VM measurement. Overwrites
    /// advance the measurement too; there are no silent no-ops.
    pub fn encrypt_page(&self, vm_id: &str, page_id: u64, payload: &[u8]) -> Result<PageReceipt> {
        if payload.len() > MAX_PAGE_PAYLOAD {
            return Err(LabError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAGE_PAYLOAD,
            });
        }

        let instance = self.instance(vm_id)?;
        let mut vm = lock_instance(&instance)?;

        let key = self.page_key(&vm.owner, vm_id, page_id)?;
        let sealed = AuthenticatedCipher::seal(&key, payload)?;

        let mut material = page_id.to_be_bytes().to_vec();
        material.extend_from_slice(&sealed.ciphertext);
        material.extend_from_slice(&sealed.tag);
        vm.measurement = MeasurementChain::extend(&vm.measurement, &material);

        let tag = hex::encode(sealed.tag);
        vm.pages.insert(page_id, EncryptedPage { page_id, data: sealed });
        debug!(vm_id = vm_id, page_id = page_id, "encrypted page stored");

        Ok(PageReceipt {
            vm_id: vm_id.to_string(),
            page_id,
            measurement: vm.measurement.clone(),
            tag,
        })
    }

    /// Decrypt a stored page, verifying its integrity.
    pub fn read_page(&self, vm_id: &str, page_id: u64) -> Result<Vec<u8>> {
        let instance = self.instance(vm_id)?;
        let vm = lock_instance(&instance)?;

        let page = vm.page(page_id).ok_or_else(|| LabError::UnknownPage {
            vm_id: vm_id.to_string(),
            page_id,
        })?;
        let key = self.page_key(&vm.owner, vm_id, page_id)?;
        AuthenticatedCipher::open(&key, &page.data)
    }

    /// Issue an attestation report over the VM's current measurement.
    pub fn attest(&self, vm_id: &str, policy_version: &str) -> Result<AttestationReport> {
        let instance = self.instance(vm_id)?;
        let vm = lock_instance(&instance)?;
        self.issuer.attest(&vm.measurement, policy_version)
    }

    /// Per-page key bound to the owner identity and the page address.
    fn page_key(&self, owner: &str, vm_id: &str, page_id: u64) -> Result<DerivedKey> {
        let mut context = vm_id.as_bytes().to_vec();
        context.extend_from_slice(b"/page/");
        context.extend_from_slice(&page_id.to_be_bytes());
        self.kms.derive(owner, &context)
    }

    fn instance(&self, vm_id: &str) -> Result<Arc<Mutex<VirtualMachine>>> {
        let registry = lock_registry(&self.registry)?;
        registry
            .get(vm_id)
            .cloned()
            .ok_or_else(|| LabError::UnknownVm(vm_id.to_string()))
    }
}

fn lock_registry<'a>(
    registry: &'a Mutex<HashMap<String, Arc<Mutex<VirtualMachine>>>>,
) -> Result<std::sync::MutexGuard<'a, HashMap<String, Arc<Mutex<VirtualMachine>>>>> {
    registry
        .lock()
        .map_err(|_| LabError::Internal("VM registry lock poisoned".to_string()))
}

fn lock_instance(instance: &Mutex<VirtualMachine>) -> Result<std::sync::MutexGuard<'_, VirtualMachine>> {
    instance
        .lock()
        .map_err(|_| LabError::Internal("VM instance lock poisoned".to_string()))
}
