//! Reference classification
//!
//! A caller may address a resource by its primary key (remote-assigned), its
//! unique key (caller-assigned), or a generic partial reference. Direct
//! primary- or unique-shaped inputs pass through unchanged; only generic
//! references go through [`resolve`], which requires them to satisfy exactly
//! one shape.

use crate::descriptor::KindDescriptor;
use crate::error::{CoreError, Result};
use std::fmt;

/// Which key shape a resolved reference satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    Primary,
    Unique,
}

impl fmt::Display for KeyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyShape::Primary => write!(f, "primary"),
            KeyShape::Unique => write!(f, "unique"),
        }
    }
}

/// A caller-supplied partial reference for one resource kind.
///
/// Implementations expose whichever identity shapes the partial record can
/// satisfy. Resolution is pure; no remote call is made.
pub trait Reference {
    type Identity;

    fn as_primary(&self) -> Option<Self::Identity>;
    fn as_unique(&self) -> Option<Self::Identity>;
}

/// Classify a generic reference against the kind's descriptor.
///
/// Fails fast, before any remote call, when the reference satisfies neither
/// shape, both shapes, or a shape the descriptor does not declare.
pub fn resolve<R: Reference>(
    descriptor: &KindDescriptor,
    reference: &R,
) -> Result<(KeyShape, R::Identity)> {
    let primary = reference.as_primary();
    if primary.is_some() && !descriptor.has_primary_key() {
        // Pure attachment kinds reject primary-shaped references outright.
        return Err(CoreError::UnsupportedReference {
            kind: descriptor.kind,
            shape: "primary",
        });
    }

    match (primary, reference.as_unique()) {
        (Some(_), Some(_)) => Err(CoreError::MultiShapeReference {
            kind: descriptor.kind,
        }),
        (Some(id), None) => Ok((KeyShape::Primary, id)),
        (None, Some(id)) => Ok((KeyShape::Unique, id)),
        (None, None) => Err(CoreError::AmbiguousReference {
            kind: descriptor.kind,
        }),
    }
}
