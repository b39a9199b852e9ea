//! Shared wire shapes for the identity control plane

use serde::{Deserialize, Serialize};
use stateline_core::TagMap;

/// Key/value tag as the remote API carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawTag {
    pub key: String,
    pub value: String,
}

pub fn tags_from_wire(raw: &[RawTag]) -> TagMap {
    raw.iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect()
}

pub fn tags_to_wire(tags: &TagMap) -> Vec<RawTag> {
    tags.iter()
        .map(|(k, v)| RawTag {
            key: k.clone(),
            value: v.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_pairs() {
        let tags: TagMap = [("env".to_string(), "prod".to_string())].into();
        assert_eq!(tags_from_wire(&tags_to_wire(&tags)), tags);
    }
}
