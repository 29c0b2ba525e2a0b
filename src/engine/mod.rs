//! Sequential task engine for a mobile manipulator.
//!
//! [`TaskEngine`] owns the queue, the status tracker and the executor, and is
//! the only thing transport code talks to. One instance per process, shared
//! by `Arc`.

pub mod clock;
pub mod command;
pub mod dispatch;
pub mod executor;
pub mod geometry;
pub mod queue;
pub mod status;
pub mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandError, ControlCommand};
pub use dispatch::{ActuatorSink, ActuatorTopics, CommandDispatcher, DispatchError, RecordingSink};
pub use executor::{Completion, FaultReason, TaskExecutor, TaskTimings, TickOutcome};
pub use geometry::Quaternion;
pub use queue::{QueueError, TaskQueue};
pub use status::{NavStatus, StatusTracker};
pub use task::{ArmPose, ArmPreset, GripperAction, NavigationGoal, Task, TaskCommand, TaskId, TaskKind};

use crate::config::{EngineConfig, TopicsConfig};

/// Task currently in flight, as reported in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub in_flight_secs: f64,
}

/// Serializable point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub paused: bool,
    pub pending: usize,
    pub pending_kinds: Vec<TaskKind>,
    pub current: Option<CurrentTask>,
    pub nav_status: i32,
    pub nav_status_label: &'static str,
    pub arm_running: bool,
    pub completion_cooldown_secs: f64,
    pub cooldown_remaining_secs: f64,
    pub completed: u64,
    pub faulted: u64,
}

pub struct TaskEngine {
    queue: Arc<TaskQueue>,
    status: Arc<StatusTracker>,
    executor: TaskExecutor,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl TaskEngine {
    pub fn new(
        timings: TaskTimings,
        dispatcher: CommandDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let status = Arc::new(StatusTracker::new());
        let executor = TaskExecutor::new(
            Arc::clone(&queue),
            Arc::clone(&status),
            dispatcher,
            Arc::clone(&clock),
            timings,
        );
        Self {
            queue,
            status,
            executor,
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Build from config sections, publishing through `sink`.
    pub fn from_config(
        engine: &EngineConfig,
        topics: &TopicsConfig,
        sink: Arc<dyn ActuatorSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher =
            CommandDispatcher::new(sink, topics.actuator_topics(), engine.frame_id.clone());
        Self::new(TaskTimings::from(engine), dispatcher, clock)
    }

    /// Accept a parsed command. Fails only while the queue is paused.
    pub fn submit(&self, command: TaskCommand) -> Result<TaskId, QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(id, command, self.clock.now(), self.clock.wall());
        self.queue.enqueue(task)?;
        Ok(id)
    }

    pub fn update_nav_status(&self, code: i32) -> bool {
        self.status.update_nav_status(code)
    }

    pub fn update_arm_running(&self, running: bool) -> bool {
        self.status.update_arm_running(running)
    }

    pub fn resume(&self) -> bool {
        self.queue.resume()
    }

    pub fn pause_and_drain(&self) -> usize {
        self.queue.pause_and_drain()
    }

    pub fn set_completion_cooldown(&self, cooldown: Duration) {
        self.executor.set_completion_cooldown(cooldown);
    }

    /// Apply an operator control message.
    pub fn apply_control(&self, control: ControlCommand) {
        match control {
            ControlCommand::Resume => {
                if !self.resume() {
                    info!("Resume requested but queue was not paused");
                }
            }
            ControlCommand::Pause => {
                warn!("Operator stop requested");
                self.pause_and_drain();
            }
            ControlCommand::SetCooldown { seconds } => match Duration::try_from_secs_f64(seconds) {
                Ok(cooldown) => self.set_completion_cooldown(cooldown),
                Err(e) => warn!(seconds, "Cooldown rejected: {e}"),
            },
        }
    }

    pub fn tick(&self) -> TickOutcome {
        self.executor.tick()
    }

    /// Drive the executor until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.executor.run(shutdown).await;
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn current_task(&self) -> Option<Task> {
        self.queue.current()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        self.executor.dispatcher()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.clock.now();
        let queue = self.queue.snapshot();
        let current = self.queue.current().map(|task| CurrentTask {
            id: task.id,
            kind: task.kind(),
            in_flight_secs: task.elapsed_since_start(now).as_secs_f64(),
        });
        let status = self.status.snapshot();
        let stats = self.executor.stats();

        EngineSnapshot {
            paused: queue.paused,
            pending: queue.pending.len(),
            pending_kinds: queue.pending.iter().map(|entry| entry.kind).collect(),
            current,
            nav_status: status.nav.code(),
            nav_status_label: status.nav.describe(),
            arm_running: status.arm_running,
            completion_cooldown_secs: millis_to_secs(stats.completion_cooldown_millis),
            cooldown_remaining_secs: millis_to_secs(stats.cooldown_remaining_millis),
            completed: stats.completed,
            faulted: stats.faulted,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn millis_to_secs(millis: u64) -> f64 {
    millis as f64 / 1000.0
}
