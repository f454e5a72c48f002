use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BuildId, ResourceId};

/// Key under which a build is deduplicated while it executes.
///
/// Persisted builds are keyed by their build ID. In-memory checks have no ID yet
/// (it is zero) and are keyed by the resource they check instead. The two spaces
/// are kept apart so that build `5` and a check for resource `5` never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum TrackingKey {
    Persisted(BuildId),
    InMemory(ResourceId),
}

impl TrackingKey {
    /// Derive the key from a build's identity: the ID if non-zero, otherwise the resource ID.
    pub fn from_ids(id: BuildId, resource_id: ResourceId) -> Self {
        if id != 0 {
            TrackingKey::Persisted(id)
        } else {
            TrackingKey::InMemory(resource_id)
        }
    }

    /// The raw integer behind the key.
    pub fn value(&self) -> i64 {
        match self {
            TrackingKey::Persisted(id) => *id,
            TrackingKey::InMemory(id) => *id,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, TrackingKey::InMemory(_))
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingKey::Persisted(id) => write!(f, "build:{id}"),
            TrackingKey::InMemory(id) => write!(f, "check:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_builds_use_their_id() {
        assert_eq!(TrackingKey::from_ids(7, 3), TrackingKey::Persisted(7));
    }

    #[test]
    fn in_memory_builds_use_resource_id() {
        let key = TrackingKey::from_ids(0, 3);
        assert_eq!(key, TrackingKey::InMemory(3));
        assert_eq!(key.value(), 3);
        assert!(key.is_in_memory());
    }

    #[test]
    fn spaces_do_not_collide() {
        assert_ne!(TrackingKey::from_ids(5, 0), TrackingKey::from_ids(0, 5));
    }

    #[test]
    fn display_names_the_space() {
        assert_eq!(TrackingKey::Persisted(1).to_string(), "build:1");
        assert_eq!(TrackingKey::InMemory(2).to_string(), "check:2");
    }
}
