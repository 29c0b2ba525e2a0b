//! Latest hardware status as reported by the navigation and arm feeds.
//!
//! Updates arrive on the transport thread while the executor reads on its
//! own tick, so both fields sit behind one mutex. Updates are edge-triggered:
//! a repeated identical report changes nothing and logs nothing.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Discrete navigation state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum NavStatus {
    /// Code 1: planner or controller failure.
    Fault,
    /// Code 2: goal reached, navigation idle.
    GoalReached,
    /// Code 3: goal accepted and in progress.
    InProgress,
    /// Code 4: manual joystick control has taken over.
    ExternalOverride,
    /// Anything else, including "nothing reported yet".
    Unknown(i32),
}

impl NavStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Fault,
            2 => Self::GoalReached,
            3 => Self::InProgress,
            4 => Self::ExternalOverride,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Fault => 1,
            Self::GoalReached => 2,
            Self::InProgress => 3,
            Self::ExternalOverride => 4,
            Self::Unknown(code) => code,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Fault => "navigation fault",
            Self::GoalReached => "goal reached",
            Self::InProgress => "navigating",
            Self::ExternalOverride => "manual override",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Point-in-time copy of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub nav: NavStatus,
    pub arm_running: bool,
}

#[derive(Debug, Default)]
struct StatusState {
    nav_code: Option<i32>,
    arm_running: Option<bool>,
}

#[derive(Debug, Default)]
pub struct StatusTracker {
    state: Mutex<StatusState>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a navigation status code. Returns `true` if it was a transition.
    pub fn update_nav_status(&self, code: i32) -> bool {
        let mut state = self.state.lock();
        if state.nav_code == Some(code) {
            return false;
        }
        state.nav_code = Some(code);
        drop(state);

        let status = NavStatus::from_code(code);
        if let NavStatus::Unknown(_) = status {
            warn!(code, "Unexpected navigation status code");
        } else {
            info!(code, "Navigation status: {}", status.describe());
        }
        true
    }

    /// Record the arm busy flag. Returns `true` if it was a transition.
    pub fn update_arm_running(&self, running: bool) -> bool {
        let mut state = self.state.lock();
        if state.arm_running == Some(running) {
            return false;
        }
        state.arm_running = Some(running);
        drop(state);

        info!(running, "Arm running status changed");
        true
    }

    /// Last navigation status; `Unknown(0)` until the first report.
    pub fn nav_status(&self) -> NavStatus {
        NavStatus::from_code(self.state.lock().nav_code.unwrap_or(0))
    }

    /// Last arm busy flag; idle until the first report.
    pub fn arm_running(&self) -> bool {
        self.state.lock().arm_running.unwrap_or(false)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.lock();
        StatusSnapshot {
            nav: NavStatus::from_code(state.nav_code.unwrap_or(0)),
            arm_running: state.arm_running.unwrap_or(false),
        }
    }
}
