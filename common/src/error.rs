use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the simulation engine.
///
/// Every operation returns these as typed results; nothing in the engine
/// falls back to a silent default (a failed unseal never yields best-effort
/// plaintext). The transport layer maps them onto protocol status codes via
/// [`LabError::kind`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LabError {
    // Lookup failures
    #[error("Unknown enclave: {0}")]
    UnknownEnclave(String),

    #[error("Unknown VM: {0}")]
    UnknownVm(String),

    #[error("Unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("VM {vm_id} has no page {page_id}")]
    UnknownPage { vm_id: String, page_id: u64 },

    // Input-shape failures
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload of {len} bytes exceeds the {max}-byte page limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("VM launch failed: {0}")]
    LaunchFailure(String),

    #[error("Malformed seal token: {0}")]
    MalformedToken(String),

    // Integrity and state failures
    #[error("Authentication tag verification failed")]
    AuthenticationFailure,

    #[error("Sealed under measurement {sealed}, enclave now measures {current}")]
    SealMismatch { sealed: String, current: String },

    // Internal failures
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy used by external callers for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    IntegrityFailure,
    StateMismatch,
    Internal,
}

impl LabError {
    /// Returns a stable numeric error code for this variant.
    ///
    /// Code ranges:
    /// - 1000-1099: lookup (unknown enclave/VM/workload/page)
    /// - 1100-1199: input shape (malformed or out-of-bound payloads)
    /// - 1200-1299: integrity (authentication-tag mismatch)
    /// - 1300-1399: state (seal/measurement drift)
    /// - 1900-1999: internal
    pub fn code(&self) -> u16 {
        match self {
            LabError::UnknownEnclave(_) => 1000,
            LabError::UnknownVm(_) => 1001,
            LabError::UnknownWorkload(_) => 1002,
            LabError::UnknownPage { .. } => 1003,

            LabError::InvalidInput(_) => 1100,
            LabError::InvalidPayload(_) => 1101,
            LabError::PayloadTooLarge { .. } => 1102,
            LabError::LaunchFailure(_) => 1103,
            LabError::MalformedToken(_) => 1104,

            LabError::AuthenticationFailure => 1200,

            LabError::SealMismatch { .. } => 1300,

            LabError::Serialization(_) => 1900,
            LabError::Internal(_) => 1901,
        }
    }

    /// Projects the variant onto the four-category taxonomy the
    /// transport layer understands.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LabError::UnknownEnclave(_)
            | LabError::UnknownVm(_)
            | LabError::UnknownWorkload(_)
            | LabError::UnknownPage { .. } => ErrorKind::NotFound,

            LabError::InvalidInput(_)
            | LabError::InvalidPayload(_)
            | LabError::PayloadTooLarge { .. }
            | LabError::LaunchFailure(_)
            | LabError::MalformedToken(_) => ErrorKind::InvalidInput,

            LabError::AuthenticationFailure => ErrorKind::IntegrityFailure,

            LabError::SealMismatch { .. } => ErrorKind::StateMismatch,

            LabError::Serialization(_) | LabError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns a structured error string in the format "E{code}: {message}".
    pub fn to_structured(&self) -> String {
        format!("E{}: {}", self.code(), self)
    }
}

impl From<serde_json::Error> for LabError {
    fn from(err: serde_json::Error) -> Self {
        LabError::Serialization(err.to_string())
    }
}

/// Common result type for the simulation engine.
pub type Result<T> = std::result::Result<T, LabError>;
