//! # warden-sandbox
//!
//! Narrow client surface over the remote sandbox provisioning service, plus
//! the command executors the worker and the control plane run commands
//! through.
//!
//! ## Modules
//!
//! - `client`: the [`InstanceClient`] interface consumed by the control plane
//! - `http`: [`HttpInstanceClient`], the REST implementation
//! - `executor`: [`CommandExecutor`] with remote and local variants
//! - `layout`: well-known file paths inside an instance and the heartbeat
//!   record format
//! - `shell`: shell quoting for commands sent to an instance
//! - `fake`: in-memory client for tests (`test-support` feature)

pub mod client;
pub mod error;
pub mod executor;
pub mod http;
pub mod layout;
pub mod shell;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use client::{CommandEnv, InstanceClient, InstanceInfo};
pub use error::ClientError;
pub use executor::{CommandExecutor, CommandOutput, ExecutorMode, LocalExecutor, RemoteExecutor};
pub use http::{ClientConfig, HttpInstanceClient};
pub use layout::HeartbeatRecord;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeInstanceClient;
