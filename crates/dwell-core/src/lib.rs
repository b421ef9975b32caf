//! dwell-core library.
//!
//! Fetches boards, sprints, and issues from the Jira REST API through a
//! bounded worker pool, reduces each issue's changelog to time spent per
//! status, and aggregates per-project cycle-time percentiles.
//!
//! # Conventions
//!
//! - **Errors**: each module returns its own `thiserror` enum; [`Error`]
//!   unifies them for callers and maps every failure to an [`ErrorCode`].
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`). The
//!   binary owns subscriber setup.
//! - **I/O**: the only network seam is [`fetch::Transport`].

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod reducer;

pub use error::{Error, ErrorCode};
