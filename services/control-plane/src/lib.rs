//! warden control plane library.
//!
//! Keeps a single remote worker instance running and healthy. The
//! `wardenctl` binary wires these pieces to the real provisioning service;
//! tests wire them to an in-memory fake.
//!
//! - [`health`]: heartbeat-based liveness classification
//! - [`migration`]: create, deploy, verify, retire
//! - [`reconciler`]: one watchdog pass over the whole population
//! - [`worker`]: the periodic reconcile loop
//! - [`operator`]: manual queries and actions

pub mod clock;
pub mod config;
pub mod health;
pub mod migration;
pub mod notes;
pub mod operator;
pub mod reconciler;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use health::{HealthCheck, HealthMonitor};
pub use migration::{
    BudgetSnapshot, DeployTarget, MigrationConfig, MigrationError, MigrationPhase,
    MigrationResult, MigrationStateMachine,
};
pub use operator::{KillOutcome, Observation, Operator};
pub use reconciler::{Reconciler, WatchdogAction, WatchdogResult};
pub use worker::{ReconcileWorker, WatchStats};
