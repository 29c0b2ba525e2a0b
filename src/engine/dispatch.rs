//! Translation of tasks into actuator wire messages.
//!
//! Delivery contract: at-most-once, no acknowledgement. A publish failure is
//! reported to the caller and logged; it is never retried here.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::geometry::Quaternion;
use super::task::{ArmPose, NavigationGoal, Task, TaskCommand};

/// Outbound publish side of the actuator transport.
pub trait ActuatorSink: Send + Sync {
    /// Hand one message to the transport. Returning `Ok` means "queued for
    /// send", not "received by the actuator".
    fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode {topic} message: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Destination per actuator channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorTopics {
    pub nav_goal: String,
    pub arm_pose: String,
    pub gripper: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub frame_id: String,
    pub stamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub position: Position,
    pub orientation: Quaternion,
}

/// Stamped navigation goal in the shape of a `PoseStamped`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavGoalMessage {
    pub header: Header,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArmPoseMessage {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl From<ArmPose> for ArmPoseMessage {
    fn from(pose: ArmPose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            z: pose.z,
            rx: pose.rx,
            ry: pose.ry,
            rz: pose.rz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GripperMessage {
    pub data: i32,
}

/// A rendered message ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl OutboundCommand {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

pub struct CommandDispatcher {
    sink: Arc<dyn ActuatorSink>,
    topics: ActuatorTopics,
    frame_id: String,
}

impl CommandDispatcher {
    pub fn new(sink: Arc<dyn ActuatorSink>, topics: ActuatorTopics, frame_id: String) -> Self {
        Self {
            sink,
            topics,
            frame_id,
        }
    }

    pub fn topics(&self) -> &ActuatorTopics {
        &self.topics
    }

    /// Pure translation of a task into its topic and JSON body.
    pub fn render(
        &self,
        command: &TaskCommand,
        stamp: DateTime<Utc>,
    ) -> Result<OutboundCommand, DispatchError> {
        match command {
            TaskCommand::Navigation(goal) => {
                let message = self.nav_goal_message(goal, stamp);
                encode(&self.topics.nav_goal, &message)
            }
            TaskCommand::ArmPose { preset } => {
                encode(&self.topics.arm_pose, &ArmPoseMessage::from(preset.pose()))
            }
            TaskCommand::ArmCoordinate(pose) => {
                encode(&self.topics.arm_pose, &ArmPoseMessage::from(*pose))
            }
            TaskCommand::Gripper { action } => encode(
                &self.topics.gripper,
                &GripperMessage {
                    data: action.code(),
                },
            ),
        }
    }

    /// Render and publish exactly once.
    pub fn dispatch(&self, task: &Task, stamp: DateTime<Utc>) -> Result<(), DispatchError> {
        let outbound = self.render(&task.command, stamp)?;
        info!(task_id = task.id, kind = %task.kind(), topic = %outbound.topic, "Dispatching {}", task.command);
        debug!(
            topic = %outbound.topic,
            "MQTT publish: {}",
            truncate(outbound.payload_str(), 100)
        );

        self.sink
            .publish(&outbound.topic, &outbound.payload)
            .map_err(|e| DispatchError::Publish {
                topic: outbound.topic.clone(),
                reason: format!("{e:#}"),
            })
    }

    fn nav_goal_message(&self, goal: &NavigationGoal, stamp: DateTime<Utc>) -> NavGoalMessage {
        NavGoalMessage {
            header: Header {
                frame_id: self.frame_id.clone(),
                stamp: stamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
            pose: Pose {
                position: Position {
                    x: goal.x,
                    y: goal.y,
                    z: goal.z,
                },
                orientation: goal.orientation.unwrap_or(Quaternion::IDENTITY),
            },
        }
    }
}

fn encode<T: Serialize>(topic: &str, message: &T) -> Result<OutboundCommand, DispatchError> {
    let payload = serde_json::to_vec(message).map_err(|source| DispatchError::Encode {
        topic: topic.to_string(),
        source,
    })?;
    Ok(OutboundCommand {
        topic: topic.to_string(),
        payload,
    })
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Sink that records every publish; useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<OutboundCommand>>,
    fail: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail, to exercise the no-retry path.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    pub fn published(&self) -> Vec<OutboundCommand> {
        self.published.lock().clone()
    }

    pub fn count_for(&self, topic: &str) -> usize {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .count()
    }
}

impl ActuatorSink for RecordingSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        if *self.fail.lock() {
            anyhow::bail!("transport unavailable");
        }
        self.published.lock().push(OutboundCommand {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
