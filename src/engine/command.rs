//! Inbound payload parsing.
//!
//! Every command is validated into a typed [`TaskCommand`] before it can reach
//! the queue. Unknown fields and field aliases are rejected rather than
//! guessed at.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::geometry::Quaternion;
use super::task::{ArmPose, ArmPreset, GripperAction, NavigationGoal, TaskCommand, TaskKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("{what} payload is not valid UTF-8")]
    NotUtf8 { what: &'static str },

    #[error("malformed {what} payload: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("arm pose command {0} is out of range (expected 0-3)")]
    ArmCodeOutOfRange(i64),

    #[error("gripper command {0} is out of range (expected 1=close or 2=open)")]
    GripperCodeOutOfRange(i64),

    #[error("field '{field}' must be a finite number")]
    NonFinite { field: &'static str },

    #[error("navigation goal sets both 'orientation' and 'yaw'")]
    AmbiguousOrientation,

    #[error("orientation quaternion has zero length")]
    DegenerateOrientation,

    #[error("cooldown must be a finite, non-negative number of seconds (got {0})")]
    InvalidCooldown(f64),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuaternionWire {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NavigationWire {
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
    #[serde(default)]
    orientation: Option<QuaternionWire>,
    #[serde(default)]
    yaw: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeWire {
    command: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArmCoordinateWire {
    x: f64,
    y: f64,
    z: f64,
    rx: f64,
    ry: f64,
    rz: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TaggedWire {
    Navigation(NavigationWire),
    ArmPose(CodeWire),
    ArmCoordinate(ArmCoordinateWire),
    Gripper(CodeWire),
}

/// Parse a per-kind topic payload (the kind comes from the topic).
pub fn parse_command(kind: TaskKind, payload: &[u8]) -> Result<TaskCommand, CommandError> {
    match kind {
        TaskKind::Navigation => navigation(decode(kind.as_str(), payload)?),
        TaskKind::ArmPoseCommand => arm_pose(decode(kind.as_str(), payload)?),
        TaskKind::ArmCoordinate => arm_coordinate(decode(kind.as_str(), payload)?),
        TaskKind::Gripper => gripper(decode(kind.as_str(), payload)?),
    }
}

/// Parse a `{"kind": ..., ...}` payload from the shared command topic.
pub fn parse_tagged_command(payload: &[u8]) -> Result<TaskCommand, CommandError> {
    match decode::<TaggedWire>("command", payload)? {
        TaggedWire::Navigation(wire) => navigation(wire),
        TaggedWire::ArmPose(wire) => arm_pose(wire),
        TaggedWire::ArmCoordinate(wire) => arm_coordinate(wire),
        TaggedWire::Gripper(wire) => gripper(wire),
    }
}

fn navigation(wire: NavigationWire) -> Result<TaskCommand, CommandError> {
    finite("x", wire.x)?;
    finite("y", wire.y)?;
    finite("z", wire.z)?;

    let orientation = match (wire.orientation, wire.yaw) {
        (Some(_), Some(_)) => return Err(CommandError::AmbiguousOrientation),
        (Some(q), None) => {
            let q = Quaternion {
                x: q.x,
                y: q.y,
                z: q.z,
                w: q.w,
            };
            if !q.is_finite() {
                return Err(CommandError::NonFinite {
                    field: "orientation",
                });
            }
            Some(q.normalized().ok_or(CommandError::DegenerateOrientation)?)
        }
        (None, Some(yaw)) => {
            finite("yaw", yaw)?;
            Some(Quaternion::from_yaw(yaw))
        }
        (None, None) => None,
    };

    Ok(TaskCommand::Navigation(NavigationGoal {
        x: wire.x,
        y: wire.y,
        z: wire.z,
        orientation,
    }))
}

fn arm_pose(wire: CodeWire) -> Result<TaskCommand, CommandError> {
    let preset =
        ArmPreset::from_code(wire.command).ok_or(CommandError::ArmCodeOutOfRange(wire.command))?;
    Ok(TaskCommand::ArmPose { preset })
}

fn arm_coordinate(wire: ArmCoordinateWire) -> Result<TaskCommand, CommandError> {
    for (field, value) in [
        ("x", wire.x),
        ("y", wire.y),
        ("z", wire.z),
        ("rx", wire.rx),
        ("ry", wire.ry),
        ("rz", wire.rz),
    ] {
        finite(field, value)?;
    }
    Ok(TaskCommand::ArmCoordinate(ArmPose {
        x: wire.x,
        y: wire.y,
        z: wire.z,
        rx: wire.rx,
        ry: wire.ry,
        rz: wire.rz,
    }))
}

fn gripper(wire: CodeWire) -> Result<TaskCommand, CommandError> {
    let action = GripperAction::from_code(wire.command)
        .ok_or(CommandError::GripperCodeOutOfRange(wire.command))?;
    Ok(TaskCommand::Gripper { action })
}

// ── Status feed ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NavStatusWire {
    Bare(i32),
    Object { state: i32 },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArmStatusWire {
    Bare(bool),
    Object { running_status: bool },
}

/// Navigation status: a bare integer or `{"state": n}`.
pub fn parse_nav_status(payload: &[u8]) -> Result<i32, CommandError> {
    Ok(match decode("navigation_status", payload)? {
        NavStatusWire::Bare(code) | NavStatusWire::Object { state: code } => code,
    })
}

/// Arm status: a bare boolean or `{"running_status": b}`.
pub fn parse_arm_running(payload: &[u8]) -> Result<bool, CommandError> {
    Ok(match decode("arm_status", payload)? {
        ArmStatusWire::Bare(running) | ArmStatusWire::Object { running_status: running } => {
            running
        }
    })
}

// ── Queue control ───────────────────────────────────────────────

/// Operator commands for the queue itself.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    Resume,
    Pause,
    SetCooldown { seconds: f64 },
}

pub fn parse_control(payload: &[u8]) -> Result<ControlCommand, CommandError> {
    let command = decode::<ControlCommand>("queue_control", payload)?;
    if let ControlCommand::SetCooldown { seconds } = command {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(CommandError::InvalidCooldown(seconds));
        }
    }
    Ok(command)
}

fn decode<T: DeserializeOwned>(what: &'static str, payload: &[u8]) -> Result<T, CommandError> {
    let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8 { what })?;
    serde_json::from_str(text.trim()).map_err(|e| CommandError::Malformed {
        what,
        reason: e.to_string(),
    })
}

fn finite(field: &'static str, value: f64) -> Result<(), CommandError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CommandError::NonFinite { field })
    }
}
