//! Resource kind descriptors
//!
//! Static metadata describing each kind's identity and readonly field layout.
//! Descriptors are declared as constants by the kind crates and consumed by
//! the resolver, reader, and completeness checks.

use crate::error::{CoreError, Result};

/// Static metadata for one resource kind.
///
/// `primary_key` fields are assigned by the remote system on creation and may
/// be absent before it. `unique_key` fields are caller-assigned and usable for
/// lookup before the primary key is known. An empty slice means the kind has
/// no key of that shape; a kind must have at least one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDescriptor {
    pub kind: &'static str,
    pub primary_key: &'static [&'static str],
    pub unique_key: &'static [&'static str],
    /// Fields derived from the remote system, never caller-settable. Every
    /// record returned by a reader must have all of these populated.
    pub readonly: &'static [&'static str],
    /// Remote-assigned identity attributes.
    pub metadata: &'static [&'static str],
}

impl KindDescriptor {
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn has_unique_key(&self) -> bool {
        !self.unique_key.is_empty()
    }

    /// Check the descriptor invariant: a primary key, a unique key, or both.
    pub fn validate(&self) -> Result<()> {
        if !self.has_primary_key() && !self.has_unique_key() {
            return Err(CoreError::InvalidDescriptor {
                kind: self.kind,
                detail: "a kind needs a primary key, a unique key, or both".to_string(),
            });
        }
        Ok(())
    }
}
