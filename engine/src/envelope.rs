//! Version identity model.
//!
//! Every persisted version carries the same envelope: who it is, which
//! version it is, and the unique tag that fences concurrent writers.

use crate::{EntityId, EntityType, Timestamp, Uid, Version};
use serde::{Deserialize, Serialize};

/// Envelope keys. Payload keys with these names are shadowed by the envelope.
pub const RESERVED_FIELDS: [&str; 6] = ["id", "entityType", "version", "uid", "createdAt", "updatedAt"];

/// Identity of a logical record across its whole history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// The optimistic concurrency token a writer must present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FencingToken {
    pub version: Version,
    pub uid: Uid,
}

impl FencingToken {
    pub fn new(version: Version, uid: impl Into<Uid>) -> Self {
        Self {
            version,
            uid: uid.into(),
        }
    }
}

/// Identity and version fields shared by every entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEnvelope {
    /// Stable identity within the entity type
    pub id: EntityId,
    /// Kind of entity, e.g. "job"
    pub entity_type: EntityType,
    /// Version number, starting at 1
    pub version: Version,
    /// Unique tag of this version
    pub uid: Uid,
    /// When the version family was created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When this version was written (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl VersionEnvelope {
    /// Envelope for a value that has not been persisted yet.
    ///
    /// Version 0 and an empty uid mark it as unsaved.
    pub fn unsaved(entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            version: 0,
            uid: Uid::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.id.clone())
    }

    /// The fencing token, or `None` for an unsaved envelope.
    pub fn token(&self) -> Option<FencingToken> {
        if self.is_saved() {
            Some(FencingToken::new(self.version, self.uid.clone()))
        } else {
            None
        }
    }

    pub fn is_saved(&self) -> bool {
        self.version > 0 && !self.uid.is_empty()
    }

    /// Whether `self` directly supersedes `previous` in the same family.
    pub fn is_successor_of(&self, previous: &VersionEnvelope) -> bool {
        self.entity_type == previous.entity_type
            && self.id == previous.id
            && self.version == previous.version + 1
            && self.uid != previous.uid
    }
}

/// Capability shared by everything that carries a [`VersionEnvelope`].
pub trait Versioned {
    fn envelope(&self) -> &VersionEnvelope;

    fn id(&self) -> &str {
        &self.envelope().id
    }

    fn entity_type(&self) -> &str {
        &self.envelope().entity_type
    }

    fn version(&self) -> Version {
        self.envelope().version
    }

    fn uid(&self) -> &str {
        &self.envelope().uid
    }
}

impl Versioned for VersionEnvelope {
    fn envelope(&self) -> &VersionEnvelope {
        self
    }
}
