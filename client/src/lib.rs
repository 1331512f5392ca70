//! # SCD Client
//!
//! Async access layer for an append-only versioned entity store.
//!
//! The store keeps every version of every entity and accepts a new version
//! only when the writer presents the current version's fencing token. This
//! crate turns that protocol into plain reads and writes:
//!
//! - [`ScdClient`] reads latest versions, specific versions, histories and
//!   queries, and writes through the [`MutationEngine`], which recovers from
//!   conflicts by refetching and merging.
//! - [`BatchCoordinator`] writes many entities at once, either in one store
//!   call or with per-entity recovery.
//! - [`EntityGateway`] is the seam to the store: [`HttpGateway`] talks JSON
//!   over HTTP and [`MemoryGateway`] holds families in process.
//! - [`SqliteMirror`] keeps a best-effort local copy that can answer
//!   latest-only queries offline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use scd_client::{ClientConfig, ScdClient};
//! use serde_json::json;
//!
//! # async fn run() -> scd_client::Result<()> {
//! scd_client::init_tracing(scd_client::DEFAULT_DIRECTIVE);
//! let client = ScdClient::connect(ClientConfig::from_env()?).await?;
//!
//! let payload = json!({"id": "job_abc", "status": "active", "rate": 50.0});
//! let job = client.mutate("job", payload.as_object().cloned().unwrap_or_default()).await?;
//! println!("job_abc is at version {}", job.envelope.version);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mutation;
pub mod repository;
pub mod retry;
pub mod telemetry;

pub use batch::BatchCoordinator;
pub use cache::{CacheError, CacheMirror, SqliteMirror};
pub use client::ScdClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Exhaustion, Result};
pub use gateway::{BatchUpdateResult, EntityGateway, GatewayError, HttpGateway, MemoryGateway};
pub use mutation::MutationEngine;
pub use repository::{JobRepository, PaymentLineItemRepository, Repository, TimelogRepository};
pub use retry::{with_retry, Backoff, Deadline, RetryPolicy};
pub use telemetry::{init_tracing, DEFAULT_DIRECTIVE};
