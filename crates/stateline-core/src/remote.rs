//! Remote control-plane error classification
//!
//! The control-plane API is an opaque request/response boundary. Kind crates
//! translate its failures into this small taxonomy so the engine can apply a
//! uniform policy: absence is data, conflicts are absorbed, the rest is wrapped
//! with context and propagated.

use crate::error::{CoreError, Result};
use thiserror::Error;

/// Classified failure from a remote control-plane call.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The target resource does not exist.
    #[error("not found")]
    NotFound,

    /// A resource with the same identity already exists (create conflict).
    #[error("already exists")]
    AlreadyExists,

    /// The remote rejected the call for rate reasons. Propagated to the
    /// orchestrator, which owns the retry policy.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Any other remote failure, carrying the remote's own error code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl RemoteError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::AlreadyExists)
    }

    /// Whether the failure may resolve on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Throttled(_))
    }
}

/// Result type for raw remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Wrap an unclassified remote failure with operation and identity context.
pub fn wrap<T>(
    operation: &'static str,
    kind: &'static str,
    identity: impl Into<String>,
    result: RemoteResult<T>,
) -> Result<T> {
    result.map_err(|source| CoreError::Remote {
        operation,
        kind,
        identity: identity.into(),
        source,
    })
}

/// Map a remote read, turning `NotFound` into `None`.
pub fn absent_ok<T>(
    operation: &'static str,
    kind: &'static str,
    identity: impl Into<String>,
    result: RemoteResult<T>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RemoteError::NotFound) => Ok(None),
        Err(source) => Err(CoreError::Remote {
            operation,
            kind,
            identity: identity.into(),
            source,
        }),
    }
}

/// Map a remote delete, treating "already gone" as success.
pub fn gone_ok(
    operation: &'static str,
    kind: &'static str,
    identity: impl Into<String>,
    result: RemoteResult<()>,
) -> Result<()> {
    match result {
        Ok(()) | Err(RemoteError::NotFound) => Ok(()),
        Err(source) => Err(CoreError::Remote {
            operation,
            kind,
            identity: identity.into(),
            source,
        }),
    }
}
