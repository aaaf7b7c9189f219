//! Contracts Ingest Library
//!
//! Incremental loader for the public contract snapshots published at
//! <https://data.everef.net/public-contracts/>.
//!
//! A run walks the snapshot history index for archives newer than the last
//! checkpoint, drops contracts and items the store already holds, bulk inserts
//! the rest and advances the checkpoint after each snapshot.
//!
//! # Example
//!
//! ```no_run
//! use contracts_ingest::config::{DatabaseConfig, SyncConfig};
//! use contracts_ingest::lock::FileRunLock;
//! use contracts_ingest::store::PgContractStore;
//! use contracts_ingest::SyncOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::from_env()?;
//!     let store = PgContractStore::connect(&DatabaseConfig::from_env()?).await?;
//!     let lock = FileRunLock::new(config.lock_path.clone());
//!
//!     let report = SyncOrchestrator::new(config, store, lock)?.run().await?;
//!     println!("{} contracts inserted", report.contracts_inserted());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod decompression;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod http;
pub mod loader;
pub mod lock;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod store;

pub use error::{Result, SyncError};
pub use orchestrator::{SnapshotReport, SyncOrchestrator, SyncOutcome, SyncReport};
