//! Fixed-rate executor: completion check, post-completion cooldown, dispatch.
//!
//! Each task moves through `Dispatched → AwaitingCompletion → Cooldown → Idle`.
//! Completion is judged per kind from the status tracker, after a settle
//! window that masks stale "idle" reports predating the new command.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::dispatch::CommandDispatcher;
use super::queue::TaskQueue;
use super::status::{NavStatus, StatusSnapshot, StatusTracker};
use super::task::{Task, TaskId, TaskKind};
use crate::config::EngineConfig;

/// Timing knobs, all measured on the injected clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTimings {
    pub tick_interval: Duration,
    pub completion_cooldown: Duration,
    pub navigation_settle: Duration,
    pub arm_settle: Duration,
    pub gripper_dwell: Duration,
    /// Optional ceiling for navigation and arm tasks; exceeding it is a fault.
    pub max_task_wait: Option<Duration>,
}

impl Default for TaskTimings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            completion_cooldown: Duration::from_millis(500),
            navigation_settle: Duration::from_secs(2),
            arm_settle: Duration::from_secs(2),
            gripper_dwell: Duration::from_millis(1500),
            max_task_wait: None,
        }
    }
}

impl From<&EngineConfig> for TaskTimings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            completion_cooldown: secs(config.completion_cooldown_secs),
            navigation_settle: secs(config.navigation_settle_secs),
            arm_settle: secs(config.arm_settle_secs),
            gripper_dwell: secs(config.gripper_dwell_secs),
            max_task_wait: config.max_task_wait_secs.map(secs),
        }
    }
}

/// Seconds to `Duration`, saturating at `Duration::MAX` for values too large
/// to represent. Negative and NaN inputs become zero.
fn secs(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(d) => d,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Why a task was escalated to pause-and-drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultReason {
    NavigationFault,
    ExternalOverride,
    Timeout,
}

impl FaultReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::NavigationFault => "navigation reported a fault",
            Self::ExternalOverride => "manual control took over navigation",
            Self::Timeout => "task exceeded the maximum wait",
        }
    }
}

/// Verdict of the completion predicate for the in-flight task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Still settling, or hardware still busy.
    Pending,
    /// Status code not recognised; treated as pending.
    UnrecognizedStatus(i32),
    Done,
    /// Task is over, but the queue must be paused and drained.
    Fault(FaultReason),
}

/// Completion predicate by task kind.
///
/// Navigation and arm tasks ignore status until their settle window has
/// passed since dispatch. Gripper tasks have no feedback and complete after
/// a fixed dwell.
pub fn evaluate_completion(
    kind: TaskKind,
    elapsed: Duration,
    status: StatusSnapshot,
    timings: &TaskTimings,
) -> Completion {
    if kind == TaskKind::Gripper {
        return if elapsed >= timings.gripper_dwell {
            Completion::Done
        } else {
            Completion::Pending
        };
    }

    let settle = if kind.is_arm() {
        timings.arm_settle
    } else {
        timings.navigation_settle
    };
    if elapsed < settle {
        return Completion::Pending;
    }

    let verdict = if kind.is_arm() {
        if status.arm_running {
            Completion::Pending
        } else {
            Completion::Done
        }
    } else {
        match status.nav {
            NavStatus::Fault => Completion::Fault(FaultReason::NavigationFault),
            NavStatus::ExternalOverride => Completion::Fault(FaultReason::ExternalOverride),
            NavStatus::GoalReached => Completion::Done,
            NavStatus::InProgress => Completion::Pending,
            NavStatus::Unknown(code) => Completion::UnrecognizedStatus(code),
        }
    };
    with_deadline(verdict, elapsed, timings)
}

fn with_deadline(verdict: Completion, elapsed: Duration, timings: &TaskTimings) -> Completion {
    match (verdict, timings.max_task_wait) {
        (Completion::Pending | Completion::UnrecognizedStatus(_), Some(limit))
            if elapsed >= limit =>
        {
            Completion::Fault(FaultReason::Timeout)
        }
        _ => verdict,
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queue paused; nothing evaluated.
    Paused,
    /// Nothing in flight, nothing pending.
    Idle,
    /// In-flight task not finished yet.
    Waiting { task_id: TaskId },
    /// A task finished and the cooldown window is running.
    CoolingDown { remaining: Duration },
    /// A task was taken off the queue and handed to the dispatcher.
    Dispatched {
        task_id: TaskId,
        kind: TaskKind,
        published: bool,
    },
    /// In-flight task ended in a fault; queue paused and drained.
    Faulted {
        task_id: TaskId,
        reason: FaultReason,
        dropped: usize,
    },
}

#[derive(Debug, Default)]
struct ExecState {
    cooldown_started: Option<Instant>,
    completion_cooldown: Duration,
    /// Task the unknown-code warnings below belong to.
    warned_task: Option<TaskId>,
    warned_codes: HashSet<i32>,
    completed: u64,
    faulted: u64,
}

/// Counters exposed in engine snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub completed: u64,
    pub faulted: u64,
    pub completion_cooldown_millis: u64,
    pub cooldown_remaining_millis: u64,
}

pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    status: Arc<StatusTracker>,
    dispatcher: CommandDispatcher,
    clock: Arc<dyn Clock>,
    timings: TaskTimings,
    state: Mutex<ExecState>,
}

impl TaskExecutor {
    pub fn new(
        queue: Arc<TaskQueue>,
        status: Arc<StatusTracker>,
        dispatcher: CommandDispatcher,
        clock: Arc<dyn Clock>,
        timings: TaskTimings,
    ) -> Self {
        Self {
            queue,
            status,
            dispatcher,
            clock,
            state: Mutex::new(ExecState {
                completion_cooldown: timings.completion_cooldown,
                ..ExecState::default()
            }),
            timings,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn completion_cooldown(&self) -> Duration {
        self.state.lock().completion_cooldown
    }

    /// Change the post-completion cooldown. Takes effect on the next tick.
    pub fn set_completion_cooldown(&self, cooldown: Duration) {
        let old = std::mem::replace(&mut self.state.lock().completion_cooldown, cooldown);
        info!(
            old_secs = old.as_secs_f64(),
            new_secs = cooldown.as_secs_f64(),
            "Completion cooldown updated"
        );
    }

    pub fn stats(&self) -> ExecutorStats {
        let now = self.clock.now();
        let state = self.state.lock();
        let remaining = state
            .cooldown_started
            .map(|started| {
                state
                    .completion_cooldown
                    .saturating_sub(now.saturating_duration_since(started))
            })
            .unwrap_or_default();
        ExecutorStats {
            completed: state.completed,
            faulted: state.faulted,
            completion_cooldown_millis: duration_millis(state.completion_cooldown),
            cooldown_remaining_millis: duration_millis(remaining),
        }
    }

    /// Run one step of the state machine.
    pub fn tick(&self) -> TickOutcome {
        if self.queue.is_paused() {
            return TickOutcome::Paused;
        }

        let now = self.clock.now();

        if let Some(task) = self.queue.current() {
            // `None` means it finished normally; go on to cooldown handling.
            if let Some(outcome) = self.check_current(&task, now) {
                return outcome;
            }
        }

        {
            let mut state = self.state.lock();
            if let Some(started) = state.cooldown_started {
                let elapsed = now.saturating_duration_since(started);
                if elapsed < state.completion_cooldown {
                    return TickOutcome::CoolingDown {
                        remaining: state.completion_cooldown - elapsed,
                    };
                }
                state.cooldown_started = None;
                debug!("Cooldown finished, ready for next task");
            }
        }

        let Some(task) = self.queue.try_take_next(now) else {
            return TickOutcome::Idle;
        };

        info!(
            task_id = task.id,
            kind = %task.kind(),
            remaining = self.queue.len(),
            "Task started"
        );
        let published = match self.dispatcher.dispatch(&task, self.clock.wall()) {
            Ok(()) => true,
            Err(e) => {
                // Left in flight: at-most-once delivery, no retry.
                error!(task_id = task.id, "Dispatch failed: {e}");
                false
            }
        };

        TickOutcome::Dispatched {
            task_id: task.id,
            kind: task.kind(),
            published,
        }
    }

    /// Returns `Some` when the tick should stop here, `None` once the current
    /// task completed normally and cooldown has begun.
    fn check_current(&self, task: &Task, now: Instant) -> Option<TickOutcome> {
        let elapsed = task.elapsed_since_start(now);
        let verdict = evaluate_completion(task.kind(), elapsed, self.status.snapshot(), &self.timings);

        match verdict {
            Completion::Pending => Some(TickOutcome::Waiting { task_id: task.id }),
            Completion::UnrecognizedStatus(code) => {
                let mut state = self.state.lock();
                if state.warned_task != Some(task.id) {
                    state.warned_task = Some(task.id);
                    state.warned_codes.clear();
                }
                if state.warned_codes.insert(code) {
                    drop(state);
                    warn!(task_id = task.id, code, "Unknown navigation status, still waiting");
                }
                Some(TickOutcome::Waiting { task_id: task.id })
            }
            Completion::Done => {
                if self.queue.complete_current().is_none() {
                    // A concurrent pause already cleared the slot.
                    return Some(TickOutcome::Paused);
                }
                info!(
                    task_id = task.id,
                    kind = %task.kind(),
                    duration_s = elapsed.as_secs_f64(),
                    "Task completed"
                );
                let mut state = self.state.lock();
                state.cooldown_started = Some(now);
                state.completed += 1;
                debug!(
                    cooldown_s = state.completion_cooldown.as_secs_f64(),
                    "Waiting before next task"
                );
                None
            }
            Completion::Fault(reason) => {
                match reason {
                    FaultReason::ExternalOverride => {
                        warn!(task_id = task.id, "{}; pausing task queue", reason.describe());
                    }
                    FaultReason::NavigationFault | FaultReason::Timeout => {
                        error!(task_id = task.id, kind = %task.kind(), "{}; pausing task queue", reason.describe());
                    }
                }
                let dropped = self.queue.pause_and_drain();
                // Faults start the cooldown like completions.
                let mut state = self.state.lock();
                state.cooldown_started = Some(now);
                state.faulted += 1;
                Some(TickOutcome::Faulted {
                    task_id: task.id,
                    reason,
                    dropped,
                })
            }
        }
    }

    /// Tick at the configured rate until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_ms = duration_millis(self.timings.tick_interval),
            cooldown_s = self.completion_cooldown().as_secs_f64(),
            "Task executor started"
        );
        let mut interval = tokio::time::interval(self.timings.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Task executor stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
