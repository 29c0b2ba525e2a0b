//! Typed task model: one discrete actuation request per task.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geometry::Quaternion;

/// Monotonic task identifier assigned by the engine on acceptance.
pub type TaskId = u64;

/// Discriminator for the four actuation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Navigation,
    ArmPoseCommand,
    ArmCoordinate,
    Gripper,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::ArmPoseCommand => "arm_pose",
            Self::ArmCoordinate => "arm_coordinate",
            Self::Gripper => "gripper",
        }
    }

    /// Arm tasks share a completion rule (settle window, then arm idle).
    pub fn is_arm(self) -> bool {
        matches!(self, Self::ArmPoseCommand | Self::ArmCoordinate)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Navigation target in the map frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NavigationGoal {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// `None` publishes the identity orientation.
    pub orientation: Option<Quaternion>,
}

/// Cartesian arm pose: position in millimetres, rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

/// Named arm poses addressable by integer code 0–3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmPreset {
    Home = 0,
    Grasp = 1,
    Release = 2,
    Carry = 3,
}

const HOME_POSE: ArmPose = ArmPose {
    x: -183.396,
    y: 32.867,
    z: -100.611,
    rx: -7.378,
    ry: 89.048,
    rz: 0.0,
};

// Release reuses the grasp pose; the gripper task does the actual opening.
const GRASP_POSE: ArmPose = ArmPose {
    x: -92.346,
    y: -50.122,
    z: -53.531,
    rx: 17.066,
    ry: 89.044,
    rz: 0.0,
};

const CARRY_POSE: ArmPose = ArmPose {
    x: -88.396,
    y: 39.867,
    z: -100.611,
    rx: -7.378,
    ry: 89.048,
    rz: 0.0,
};

impl ArmPreset {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Home),
            1 => Some(Self::Grasp),
            2 => Some(Self::Release),
            3 => Some(Self::Carry),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn pose(self) -> ArmPose {
        match self {
            Self::Home => HOME_POSE,
            Self::Grasp | Self::Release => GRASP_POSE,
            Self::Carry => CARRY_POSE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Grasp => "grasp",
            Self::Release => "release",
            Self::Carry => "carry",
        }
    }
}

/// End-effector command. Only close (1) and open (2) exist on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperAction {
    Close = 1,
    Open = 2,
}

impl GripperAction {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Close),
            2 => Some(Self::Open),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Open => "open",
        }
    }
}

/// Kind-specific payload of a task. Fields are validated at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskCommand {
    Navigation(NavigationGoal),
    ArmPose { preset: ArmPreset },
    ArmCoordinate(ArmPose),
    Gripper { action: GripperAction },
}

impl TaskCommand {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Navigation(_) => TaskKind::Navigation,
            Self::ArmPose { .. } => TaskKind::ArmPoseCommand,
            Self::ArmCoordinate(_) => TaskKind::ArmCoordinate,
            Self::Gripper { .. } => TaskKind::Gripper,
        }
    }
}

impl fmt::Display for TaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation(goal) => {
                write!(f, "navigation to ({}, {}, {})", goal.x, goal.y, goal.z)
            }
            Self::ArmPose { preset } => {
                write!(f, "arm pose {} ({})", preset.code(), preset.label())
            }
            Self::ArmCoordinate(pose) => write!(
                f,
                "arm coordinate ({}, {}, {}) rot ({}, {}, {})",
                pose.x, pose.y, pose.z, pose.rx, pose.ry, pose.rz
            ),
            Self::Gripper { action } => {
                write!(f, "gripper {} ({})", action.code(), action.label())
            }
        }
    }
}

/// A queued or in-flight actuation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub command: TaskCommand,
    pub enqueued_at: Instant,
    /// Set when the executor takes the task off the queue.
    pub started_at: Option<Instant>,
    /// Wall-clock receipt time, for logs and snapshots.
    pub received_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, command: TaskCommand, now: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            id,
            command,
            enqueued_at: now,
            started_at: None,
            received_at: wall,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.command.kind()
    }

    /// Time since dispatch, or zero if the task has not started.
    pub fn elapsed_since_start(&self, now: Instant) -> Duration {
        self.started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }
}
