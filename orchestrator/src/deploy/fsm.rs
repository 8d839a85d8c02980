//! Externally visible deployment status and its state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::deployment::DeployStatus;

/// Status reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// No deployment row, or no resource bound yet
    NotFound,

    /// Row exists, resource being provisioned or awaiting first push
    Preparing,

    /// Build in flight
    Building,

    /// Last build failed
    BuildError,

    /// Build succeeded, runtime not answering yet
    Starting,

    /// Runtime answered the liveness probe
    Running,

    /// Persisted status surfaced verbatim when the backend can't be queried
    Deployed,

    /// Persisted status surfaced verbatim when the backend can't be queried
    Idle,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::NotFound => "not_found",
            AppStatus::Preparing => "preparing",
            AppStatus::Building => "building",
            AppStatus::BuildError => "build_error",
            AppStatus::Starting => "starting",
            AppStatus::Running => "running",
            AppStatus::Deployed => "deployed",
            AppStatus::Idle => "idle",
        }
    }

    /// Whether polling can stop at this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppStatus::BuildError | AppStatus::Running)
    }

    fn rank(&self) -> u8 {
        match self {
            AppStatus::NotFound => 0,
            AppStatus::Preparing => 1,
            AppStatus::Building => 2,
            AppStatus::BuildError => 3,
            AppStatus::Starting | AppStatus::Deployed | AppStatus::Idle => 3,
            AppStatus::Running => 4,
        }
    }

    /// Whether `self` may be observed right after `prev` within one build lifecycle
    pub fn can_follow(&self, prev: AppStatus) -> bool {
        if *self == prev {
            return true;
        }
        match (prev, *self) {
            (AppStatus::BuildError, _) => false,
            (AppStatus::Starting | AppStatus::Running, AppStatus::BuildError) => false,
            // Auto-sleep: a hibernated runtime is reported as starting again
            (AppStatus::Running, AppStatus::Starting) => true,
            (prev, next) => next.rank() >= prev.rank(),
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DeployStatus> for AppStatus {
    fn from(status: DeployStatus) -> Self {
        match status {
            DeployStatus::Preparing => AppStatus::Preparing,
            DeployStatus::Building => AppStatus::Building,
            DeployStatus::Deployed => AppStatus::Deployed,
            DeployStatus::Idle => AppStatus::Idle,
            DeployStatus::Error => AppStatus::BuildError,
        }
    }
}

/// Tracks the statuses observed by a poller and rejects regressions
#[derive(Debug, Clone)]
pub struct StatusFsm {
    state: AppStatus,
    transitions: u32,
}

impl StatusFsm {
    pub fn new() -> Self {
        Self {
            state: AppStatus::NotFound,
            transitions: 0,
        }
    }

    pub fn state(&self) -> AppStatus {
        self.state
    }

    /// Number of distinct status changes observed so far
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Record an observation. Returns `Ok(true)` when the status changed.
    pub fn observe(&mut self, next: AppStatus) -> Result<bool, String> {
        if !next.can_follow(self.state) {
            return Err(format!("Invalid transition: {} -> {}", self.state, next));
        }
        if next == self.state {
            return Ok(false);
        }
        self.state = next;
        self.transitions += 1;
        Ok(true)
    }
}

impl Default for StatusFsm {
    fn default() -> Self {
        Self::new()
    }
}
