//! Topic routing for inbound messages.
//!
//! Each subscribed topic has exactly one role. The router parses a payload
//! according to that role and applies it to the engine; it knows nothing
//! about the transport.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::TopicsConfig;
use crate::engine::command::{
    parse_arm_running, parse_command, parse_control, parse_nav_status, parse_tagged_command,
};
use crate::engine::dispatch::OutboundCommand;
use crate::engine::{
    CommandDispatcher, CommandError, ControlCommand, DispatchError, QueueError, TaskCommand,
    TaskEngine, TaskId, TaskKind,
};

/// What a subscribed topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    /// Bare fields for one task kind.
    Command(TaskKind),
    /// `{"kind": ...}` commands of any kind.
    TaggedCommand,
    NavStatus,
    ArmStatus,
    QueueControl,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(TaskCommand),
    NavStatus(i32),
    ArmRunning(bool),
    Control(ControlCommand),
}

/// Effect of a routed message on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Queued(TaskId),
    /// Status report; `changed` is false for a repeated value.
    Status { changed: bool },
    Control,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route for topic '{0}'")]
    UnknownTopic(String),
    #[error("rejected message on '{topic}': {source}")]
    Invalid {
        topic: String,
        #[source]
        source: CommandError,
    },
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Render(#[from] DispatchError),
}

/// Dry-run result: the parsed message and, for commands, the actuator
/// message it would produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub inbound: Inbound,
    pub outbound: Option<OutboundCommand>,
}

pub struct CommandRouter {
    routes: HashMap<String, TopicRole>,
}

impl CommandRouter {
    pub fn new(topics: &TopicsConfig) -> Self {
        let routes = [
            (&topics.navigation, TopicRole::Command(TaskKind::Navigation)),
            (&topics.arm_control, TopicRole::Command(TaskKind::ArmPoseCommand)),
            (&topics.arm_coordinate, TopicRole::Command(TaskKind::ArmCoordinate)),
            (&topics.gripper, TopicRole::Command(TaskKind::Gripper)),
            (&topics.commands, TopicRole::TaggedCommand),
            (&topics.navigation_status, TopicRole::NavStatus),
            (&topics.arm_status, TopicRole::ArmStatus),
            (&topics.queue_control, TopicRole::QueueControl),
        ]
        .into_iter()
        .map(|(topic, role)| (topic.clone(), role))
        .collect();
        Self { routes }
    }

    /// Subscribed topics in a stable order.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub fn role(&self, topic: &str) -> Option<TopicRole> {
        self.routes.get(topic).copied()
    }

    /// Parse without touching the engine.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<Inbound, RouteError> {
        let role = self
            .role(topic)
            .ok_or_else(|| RouteError::UnknownTopic(topic.to_string()))?;

        let parsed = match role {
            TopicRole::Command(kind) => parse_command(kind, payload).map(Inbound::Command),
            TopicRole::TaggedCommand => parse_tagged_command(payload).map(Inbound::Command),
            TopicRole::NavStatus => parse_nav_status(payload).map(Inbound::NavStatus),
            TopicRole::ArmStatus => parse_arm_running(payload).map(Inbound::ArmRunning),
            TopicRole::QueueControl => parse_control(payload).map(Inbound::Control),
        };
        parsed.map_err(|source| RouteError::Invalid {
            topic: topic.to_string(),
            source,
        })
    }

    /// Parse and render without queueing or publishing anything.
    pub fn preview(
        &self,
        dispatcher: &CommandDispatcher,
        topic: &str,
        payload: &[u8],
    ) -> Result<Preview, RouteError> {
        let inbound = self.parse(topic, payload)?;
        let outbound = match &inbound {
            Inbound::Command(command) => Some(dispatcher.render(command, chrono::Utc::now())?),
            _ => None,
        };
        Ok(Preview { inbound, outbound })
    }

    /// Parse and apply to the engine.
    pub fn route(
        &self,
        engine: &TaskEngine,
        topic: &str,
        payload: &[u8],
    ) -> Result<Routed, RouteError> {
        match self.parse(topic, payload)? {
            Inbound::Command(command) => {
                let id = engine.submit(command)?;
                debug!(task_id = id, topic, "Accepted {command}");
                Ok(Routed::Queued(id))
            }
            Inbound::NavStatus(code) => Ok(Routed::Status {
                changed: engine.update_nav_status(code),
            }),
            Inbound::ArmRunning(running) => Ok(Routed::Status {
                changed: engine.update_arm_running(running),
            }),
            Inbound::Control(control) => {
                info!(topic, ?control, "Queue control received");
                engine.apply_control(control);
                Ok(Routed::Control)
            }
        }
    }
}
