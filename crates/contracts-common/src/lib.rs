//! Contracts Common Library
//!
//! Shared plumbing for the contracts ingest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Environment**: typed lookups of environment variables
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use contracts_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> contracts_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
