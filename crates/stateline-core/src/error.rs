//! Protocol error types

use crate::poll::TerminalStatus;
use crate::remote::RemoteError;
use thiserror::Error;

/// Errors surfaced by the reconciliation protocol.
///
/// Remote "not found" is never an error here: readers return `Ok(None)` and
/// the deleter treats absence as success. Everything in this enum is either
/// a caller mistake caught before any remote call, or a genuine failure.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("ambiguous reference for {kind}: matches neither the primary nor the unique key shape")]
    AmbiguousReference { kind: &'static str },

    #[error("reference for {kind} matches both the primary and the unique key shape")]
    MultiShapeReference { kind: &'static str },

    #[error("{kind} does not support {shape}-shaped references")]
    UnsupportedReference {
        kind: &'static str,
        shape: &'static str,
    },

    #[error("required field '{field}' is missing on {kind}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind} record is missing readonly field '{field}'")]
    IncompleteRecord { kind: &'static str, field: String },

    #[error("invalid descriptor for {kind}: {detail}")]
    InvalidDescriptor {
        kind: &'static str,
        detail: String,
    },

    #[error("async operation ended {status}: {reason}")]
    AsyncOperationFailed {
        status: TerminalStatus,
        reason: String,
    },

    #[error("polling budget exceeded after {attempts} attempts")]
    PollBudgetExceeded { attempts: u32 },

    /// A just-mutated resource came back absent on the re-read. This is a
    /// protocol bug or a remote consistency violation, never a normal outcome.
    #[error("{kind} '{identity}' vanished between mutation and re-read")]
    ReadAfterWriteVanished {
        kind: &'static str,
        identity: String,
    },

    #[error("remote {operation} failed for {kind} '{identity}': {source}")]
    Remote {
        operation: &'static str,
        kind: &'static str,
        identity: String,
        #[source]
        source: RemoteError,
    },

    /// A kind-local cache (e.g. the tunnel process registry) failed. Local
    /// caches are owned by the kind's operations, never the shared protocol.
    #[error("local cache failure during {operation}: {detail}")]
    Cache {
        operation: &'static str,
        detail: String,
    },
}

impl CoreError {
    pub fn cache(operation: &'static str, detail: impl std::fmt::Display) -> Self {
        CoreError::Cache {
            operation,
            detail: detail.to_string(),
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, CoreError>;
