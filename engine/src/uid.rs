//! Identifier generation.

use uuid::Uuid;

/// A fresh version tag: `{entity_type}_uid_{32 hex chars}`.
pub fn generate_uid(entity_type: &str) -> String {
    format!("{entity_type}_uid_{}", Uuid::new_v4().simple())
}

/// A fresh entity id: `{entity_type}_{32 hex chars}`.
pub fn generate_entity_id(entity_type: &str) -> String {
    format!("{entity_type}_{}", Uuid::new_v4().simple())
}
