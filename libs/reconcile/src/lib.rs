//! Reconciliation primitives for a fleet of one.
//!
//! This library holds the pure decision logic used by the watchdog and the
//! migration state machine. Nothing in here performs I/O. Key concepts:
//!
//! - **Liveness**: how old the worker's last heartbeat is, bucketed into
//!   [`HealthStatus`] by two caller-supplied thresholds.
//! - **Keeper selection**: which instance survives when more than one is
//!   running.
//! - **Budgets**: how many migrations may run per calendar day.
//! - **Retry policy**: bounded, fixed-delay retries for background work.
//!
//! # Invariants
//!
//! - Classification intervals are half-open: an age equal to a threshold
//!   falls into the *worse* bucket
//! - Decisions are deterministic given the same inputs
//! - The daily budget rolls over before every capacity check

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Thresholds are not ordered (`healthy` must not exceed `stuck`).
    #[error("invalid thresholds: healthy {healthy:?} exceeds stuck {stuck:?}")]
    InvalidThresholds { healthy: Duration, stuck: Duration },

    /// A retry policy must allow at least one attempt.
    #[error("retry policy needs at least one attempt")]
    ZeroAttempts,
}

/// Liveness classification derived from a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Heartbeat is fresh.
    Healthy,

    /// Heartbeat is stale but not yet past the stuck threshold.
    Stuck,

    /// Heartbeat is past the stuck threshold, or the instance is gone.
    Dead,

    /// Liveness cannot be determined (instance up, heartbeat unreadable).
    Unknown,
}

impl HealthStatus {
    /// Returns true for the only status that needs no attention.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Returns true if the status justifies replacing the instance.
    ///
    /// `Unknown` is deliberately excluded: ambiguity never triggers a kill.
    pub fn warrants_replacement(&self) -> bool {
        matches!(self, Self::Stuck | Self::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Stuck => "stuck",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heartbeat age thresholds used for one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Ages strictly below this are healthy.
    healthy: Duration,

    /// Ages at or above this are dead.
    stuck: Duration,
}

impl HealthThresholds {
    /// Create thresholds, rejecting `healthy > stuck`.
    pub fn new(healthy: Duration, stuck: Duration) -> Result<Self, ReconcileError> {
        if healthy > stuck {
            return Err(ReconcileError::InvalidThresholds { healthy, stuck });
        }
        Ok(Self { healthy, stuck })
    }

    /// Default thresholds with a custom stuck threshold.
    ///
    /// If `stuck` is below the default healthy threshold, the healthy
    /// threshold is lowered to match so the pair stays ordered.
    pub fn with_stuck(stuck: Duration) -> Self {
        Self {
            healthy: DEFAULT_HEALTHY_THRESHOLD.min(stuck),
            stuck,
        }
    }

    pub fn healthy(&self) -> Duration {
        self.healthy
    }

    pub fn stuck(&self) -> Duration {
        self.stuck
    }

    /// Classify a heartbeat age.
    pub fn classify(&self, age: Duration) -> HealthStatus {
        classify_age(age, self)
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: DEFAULT_HEALTHY_THRESHOLD,
            stuck: DEFAULT_STUCK_THRESHOLD,
        }
    }
}

/// Bucket a heartbeat age into a [`HealthStatus`].
///
/// `age < healthy` is healthy, `healthy <= age < stuck` is stuck and
/// `age >= stuck` is dead. Never returns `Unknown`; that status comes from
/// unreadable heartbeats, not from ages.
pub fn classify_age(age: Duration, thresholds: &HealthThresholds) -> HealthStatus {
    if age < thresholds.healthy {
        HealthStatus::Healthy
    } else if age < thresholds.stuck {
        HealthStatus::Stuck
    } else {
        HealthStatus::Dead
    }
}

/// Why a keeper was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperReason {
    /// The healthy candidate with the freshest heartbeat.
    FreshestHealthy,

    /// No candidate was healthy; the first in listing order was kept.
    FirstListed,
}

/// Result of [`select_keeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperChoice {
    /// Index of the keeper in the candidate slice.
    pub index: usize,

    pub reason: KeeperReason,
}

/// Choose which of several running instances survives.
///
/// Among healthy candidates the one with the smallest heartbeat age wins
/// (ties go to the earlier candidate). If none are healthy, the first
/// candidate is kept regardless of its status. A healthy candidate without
/// an age sorts after every candidate that has one.
///
/// Returns `None` only for an empty slice.
pub fn select_keeper<T, S, A>(candidates: &[T], status_of: S, age_of: A) -> Option<KeeperChoice>
where
    S: Fn(&T) -> HealthStatus,
    A: Fn(&T) -> Option<Duration>,
{
    if candidates.is_empty() {
        return None;
    }

    let freshest = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| status_of(*c).is_healthy())
        .min_by_key(|(i, c)| (age_of(*c).unwrap_or(Duration::MAX), *i))
        .map(|(i, _)| i);

    Some(match freshest {
        Some(index) => KeeperChoice {
            index,
            reason: KeeperReason::FreshestHealthy,
        },
        None => KeeperChoice {
            index: 0,
            reason: KeeperReason::FirstListed,
        },
    })
}

/// Per-day budget for an operation such as migration.
///
/// The budget resets when the calendar date passed to it changes. Callers
/// pass the date explicitly so the rollover happens at the top of every
/// check rather than on a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyBudget {
    max_per_day: u32,
    used: u32,
    day: Option<NaiveDate>,
}

impl DailyBudget {
    /// Create a budget allowing `max_per_day` operations.
    pub fn new(max_per_day: u32) -> Self {
        Self {
            max_per_day,
            used: 0,
            day: None,
        }
    }

    /// Reset the counter if `today` differs from the recorded day.
    ///
    /// Returns true if a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        self.used = 0;
        self.day = Some(today);
        true
    }

    /// Roll over, then report whether another operation fits today.
    pub fn has_capacity(&mut self, today: NaiveDate) -> bool {
        self.roll_over(today);
        self.used < self.max_per_day
    }

    /// Roll over, then count one operation against today.
    pub fn record(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.used = self.used.saturating_add(1);
    }

    /// Operations counted on the recorded day.
    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    /// The day the counter belongs to, if any operation was checked yet.
    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    /// Overwrite the counter state (restoring persisted counters).
    pub fn restore(&mut self, used: u32, day: Option<NaiveDate>) {
        self.used = used;
        self.day = day;
    }
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` total attempts (not retries).
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, ReconcileError> {
        if max_attempts == 0 {
            return Err(ReconcileError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SYNC_MAX_ATTEMPTS,
            delay: DEFAULT_SYNC_RETRY_DELAY,
        }
    }
}

/// Heartbeat age below which an instance is healthy.
pub const DEFAULT_HEALTHY_THRESHOLD: Duration = Duration::from_secs(60);

/// Heartbeat age at which an instance is considered dead.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(600); // 10 minutes

/// Default interval between watchdog passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_MAX_MIGRATIONS_PER_DAY: u32 = 10;

pub const DEFAULT_MAX_CONCURRENT_INSTANCES: usize = 2;

/// How long a successor has to report healthy.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_SYNC_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_SYNC_RETRY_DELAY: Duration = Duration::from_secs(2);
