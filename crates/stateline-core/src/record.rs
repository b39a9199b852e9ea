//! Canonical record helpers
//!
//! Kind crates define their own canonical record structs; this module holds
//! the pieces the shared protocol needs from them: tag maps, field-presence
//! introspection for the readonly completeness check, and the fail-fast
//! helper translators use for fields the remote always supplies.

use crate::descriptor::KindDescriptor;
use crate::error::{CoreError, Result};
use std::collections::BTreeMap;

/// Caller-managed key/value tags. Ordered so diffs and payloads are stable.
pub type TagMap = BTreeMap<String, String>;

/// Field-presence introspection for completeness checks.
pub trait Hydrated {
    /// Whether the named field currently carries a value.
    fn field_present(&self, field: &str) -> bool;
}

/// Verify every readonly field the descriptor declares is set on the record.
///
/// Runs on the output of every reader call, not only at construction, so a
/// remote API that omits a field under some conditions fails loudly instead
/// of handing back a partially hydrated record.
pub fn verify_complete<R: Hydrated>(descriptor: &KindDescriptor, record: &R) -> Result<()> {
    for field in descriptor.readonly {
        if !record.field_present(field) {
            return Err(CoreError::IncompleteRecord {
                kind: descriptor.kind,
                field: (*field).to_string(),
            });
        }
    }
    Ok(())
}

/// Fail fast when a field the remote contract marks always-present is absent.
pub fn require<T>(kind: &'static str, field: &'static str, value: Option<T>) -> Result<T> {
    value.ok_or(CoreError::MissingField { kind, field })
}
