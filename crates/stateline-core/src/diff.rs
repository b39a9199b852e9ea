//! Diff arithmetic for mutable sub-fields
//!
//! The upsert path computes one patch per mutable sub-field category and
//! skips remote calls for unchanged categories. Map-like fields (tags) use
//! field-set symmetric difference; the remove and set halves feed separate
//! remote calls.

use crate::record::TagMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Minimal set of tag mutations reconciling observed tags with desired tags.
///
/// The diff trusts the remote to report tags in a stable, complete form; a
/// remote that omitted tags non-deterministically would make a no-op look
/// like a removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDiff {
    /// Keys to set, with their desired values (new keys and changed values).
    pub set: TagMap,
    /// Keys present remotely but absent from the desired set.
    pub remove: BTreeSet<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// Compute the tag mutations needed to move `before` to `desired`.
///
/// Unchanged keys appear in neither half and generate no remote call.
pub fn diff_tags(before: &TagMap, desired: &TagMap) -> TagDiff {
    let mut diff = TagDiff::default();

    for (key, value) in desired {
        if before.get(key) != Some(value) {
            diff.set.insert(key.clone(), value.clone());
        }
    }
    for key in before.keys() {
        if !desired.contains_key(key) {
            diff.remove.insert(key.clone());
        }
    }

    diff
}
