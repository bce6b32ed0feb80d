//! # Depictio
//!
//! Data-platform backend for organizing scientific datasets into
//! projects → workflows → data collections → runs → files, scanning
//! filesystems for new data, materializing per-collection Delta Lake
//! tables, executing client-side joins with granularity reconciliation,
//! resolving cross-collection links, serving interactive queries, and
//! streaming invalidation events to dashboards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      depictio                            │
//! ├──────────────┬──────────────┬──────────────┬─────────────┤
//! │  ScanEngine  │  JoinEngine  │ QueryPipeline│  EventBus   │
//! │  (runs,      │  (joins,     │ (filters,    │  (dashboard │
//! │   files)     │   lineage)   │  semi-joins) │   fan-out)  │
//! ├──────────────┴───────┬──────┴──────────────┴─────────────┤
//! │    MetadataStore     │            DeltaStore             │
//! │      (MongoDB)       │    (Delta Lake ⇄ polars)          │
//! └──────────────────────┴───────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depictio::{MetadataStore, ScanEngine, ScanParams, Settings};
//!
//! #[tokio::main]
//! async fn main() -> depictio::Result<()> {
//!     let settings = Settings::from_env();
//!     let meta = Arc::new(MetadataStore::connect(&settings).await?);
//!     let project_id = "64a1f2c3d4e5f6a7b8c9d0e1".parse()?;
//!     let project = meta.get_project(&project_id).await?;
//!
//!     let engine = ScanEngine::new(meta);
//!     let report = engine
//!         .scan_project(&project, None, None, ScanParams { rescan: true, sync: true })
//!         .await?;
//!     println!("scanned {} runs", report.runs_scanned);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod hashing;
pub mod joins;
pub mod links;
pub mod locks;
pub mod metadata;
pub mod models;
pub mod oauth_state;
pub mod paths;
pub mod process;
pub mod query;
pub mod scan;
pub mod storage;

// Re-exports for convenience
pub use config::{S3Config, Settings};
pub use error::{DepictioError, Result};
pub use events::{DcOperation, EventBus, EventBusHandle, EventEnvelope, EventKind};
pub use joins::JoinEngine;
pub use links::{LinkEngine, LinkResolver, ResolverRegistry};
pub use locks::{LockGuard, LockManager};
pub use metadata::{DeltaCatalog, MetadataStore};
pub use oauth_state::OAuthStateStore;
pub use process::Materializer;
pub use query::{QueryPipeline, QueryRequest, QueryResponse};
pub use scan::{ScanEngine, ScanParams};
pub use storage::DeltaStore;
