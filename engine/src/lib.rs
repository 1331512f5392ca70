//! # SCD Engine
//!
//! The protocol core for an append-only versioned entity store.
//!
//! Records in the store are never updated in place. Every change appends a
//! new immutable version to the record's *version family*, and writers race
//! to produce the "next" version using an optimistic fencing token. This
//! crate holds the pieces of that protocol that do not need any IO.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about networks, databases or clocks
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Typed**: payloads of known entity kinds decode into typed models
//!
//! ## Core Concepts
//!
//! ### Identity and versions
//!
//! An entity is identified by `(entity_type, id)` for its whole history.
//! Each version carries a [`VersionEnvelope`]: the identity, a version number
//! starting at 1 with no gaps, and a globally unique `uid` tag. The pair
//! `(version, uid)` is the [`FencingToken`] a writer must present.
//!
//! ### Mutations
//!
//! A [`MutationRequest`] is parsed from a caller payload and turned into a
//! [`Submission`] against either a pinned token or a freshly fetched
//! baseline. [`RetryBudget`] bounds how often a conflict or a missing entity
//! may be recovered from.
//!
//! ### Resolution
//!
//! [`resolve_latest`] and [`latest_per_identity`] pick the current version of
//! each identity. [`LatestOnlySql`] expresses the same rule as a single
//! self-join so a relational store can evaluate it.
//!
//! ## Quick Start
//!
//! ```rust
//! use scd_engine::{Expectation, MutationRequest, VersionFamily};
//! use serde_json::json;
//!
//! // A caller payload with identity and a field change.
//! let payload = json!({"id": "job_abc", "status": "active", "rate": 50.0});
//! let request = MutationRequest::from_value("job", payload).unwrap();
//!
//! // Nothing exists yet, so the submission is a creation.
//! let submission = request.submission_over(None);
//! assert_eq!(submission.expect, Expectation::Create);
//!
//! let mut family = VersionFamily::create(&submission, "job_uid_1", 1_000).unwrap();
//! assert_eq!(family.current().envelope.version, 1);
//!
//! // A second write based on the current version appends version 2.
//! let update = MutationRequest::from_value("job", json!({"id": "job_abc", "rate": 55.0})).unwrap();
//! let submission = update.submission_over(Some(family.current()));
//! family.append(&submission, "job_uid_2", 2_000).unwrap();
//! assert_eq!(family.current().envelope.version, 2);
//! assert_eq!(family.current().payload["status"], "active");
//! ```

pub mod batch;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod family;
pub mod kind;
pub mod models;
pub mod mutation;
pub mod query;
pub mod resolve;
pub mod uid;

// Re-export main types at crate root
pub use batch::{partition_batch, partition_requests, BatchFailure, BatchOutcome, FailureReason};
pub use entity::{merge_fields, Entity, Payload};
pub use envelope::{EntityKey, FencingToken, VersionEnvelope, Versioned, RESERVED_FIELDS};
pub use error::Error;
pub use family::VersionFamily;
pub use kind::EntityKind;
pub use models::{
    status_guard, transition_guard, Job, JobFields, JobStatus, Model, ModelFields, PaymentLineItem,
    PaymentLineItemFields, PaymentLineItemStatus, Timelog, TimelogFields, TimelogType, Transition,
};
pub use mutation::{
    Expectation, FieldGuard, MutationRequest, RetryBudget, RetryStep, Submission,
    DEFAULT_NOT_FOUND_RETRIES,
};
pub use query::{Conditions, EntityQuery, QueryOptions, Range, Ranges, SortDirection};
pub use resolve::{
    latest_per_identity, mark_latest, order_history, resolve_latest, validate_identifier,
    LatestOnlySql, Resolved,
};
pub use uid::{generate_entity_id, generate_uid};

/// Type aliases for clarity
pub type EntityId = String;
pub type EntityType = String;
pub type Uid = String;
pub type Version = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;
