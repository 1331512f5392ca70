//! Local cache mirror.
//!
//! Entities returned by the store can be copied into a local relational
//! store for offline reads. Mirroring is advisory: the client logs a failed
//! write and carries on.

mod sqlite;

pub use sqlite::{SqliteMirror, StoredVersion};

use async_trait::async_trait;
use scd_engine::Entity;

/// Cache mirror errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] scd_engine::Error),

    #[error("Unsupported condition on {field}: {reason}")]
    UnsupportedCondition { field: String, reason: &'static str },
}

/// Destination for entities read from or written to the store.
#[async_trait]
pub trait CacheMirror: Send + Sync {
    /// Store `entities`; versions already present are left untouched.
    ///
    /// Returns how many versions were new.
    async fn persist(&self, entities: &[Entity]) -> Result<u64, CacheError>;
}
