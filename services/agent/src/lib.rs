//! # warden-agent
//!
//! Worker-side surfaces of the warden system. The worker process writes its
//! heartbeat and state through this crate and hands changed files to the
//! [`SyncWorker`], which commits and pushes them in the background.
//!
//! ## Modules
//!
//! - `heartbeat`: [`HeartbeatWriter`], read by the control plane's health
//!   monitor
//! - `state`: the persisted [`WorkerState`] with daily counter reset
//! - `activity`: append-only activity log
//! - `sync`: the [`SyncWorker`] queue and git sequence
//! - `tracker`: sync audit log and result types
//! - `config`: [`SyncConfig`] from `WARDEN_*` variables

pub mod activity;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod state;
pub mod sync;
pub mod tracker;

pub use activity::{ActivityEntry, ActivityLog};
pub use config::SyncConfig;
pub use error::{ConfigError, StateError, SyncError};
pub use heartbeat::HeartbeatWriter;
pub use state::WorkerState;
pub use sync::{SyncStats, SyncWorker};
pub use tracker::{SyncEntry, SyncResult, SyncStatus, SyncTracker};
