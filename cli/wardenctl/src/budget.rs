//! Migration budget persisted between CLI runs.
//!
//! The daily migration counter lives in the state machine's memory. Each
//! `reconcile`, `migrate` or `watch` invocation restores it from this file
//! first and writes it back afterwards, so the cap holds across scheduled
//! one-shot runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::warn;
use warden_control_plane::BudgetSnapshot;

const BUDGET_FILE: &str = "migration_budget.json";

pub struct BudgetStore {
    path: PathBuf,
}

impl BudgetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `WARDEN_BUDGET_FILE`, else the platform data directory.
    pub fn locate(explicit: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        let dirs = ProjectDirs::from("dev", "warden", "wardenctl")
            .context("could not determine a data directory; set WARDEN_BUDGET_FILE")?;
        Ok(Self::new(dirs.data_dir().join(BUDGET_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files start a fresh budget.
    pub fn load(&self) -> BudgetSnapshot {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BudgetSnapshot::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read migration budget");
                return BudgetSnapshot::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Corrupt migration budget, starting fresh");
            BudgetSnapshot::default()
        })
    }

    pub fn save(&self, snapshot: &BudgetSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let contents = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Save, logging instead of failing.
    pub fn save_quietly(&self, snapshot: &BudgetSnapshot) {
        if let Err(e) = self.save(snapshot) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist migration budget");
        }
    }
}
