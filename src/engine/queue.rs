//! Single-consumer FIFO of pending tasks plus the one in-flight task.
//!
//! The pending deque, the current-task slot and the paused flag share one
//! mutex so that `try_take_next` is atomic against `enqueue`, against
//! `pause_and_drain` and against itself.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::task::{Task, TaskId, TaskKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is paused; rejected {kind} task {id}")]
    Paused { id: TaskId, kind: TaskKind },
}

/// Serializable view of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub paused: bool,
    pub pending: Vec<PendingEntry>,
    pub current: Option<PendingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub id: TaskId,
    pub kind: TaskKind,
}

impl From<&Task> for PendingEntry {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            kind: task.kind(),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Task>,
    current: Option<Task>,
    paused: bool,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Rejected (and the task dropped) while paused.
    ///
    /// Returns the pending depth after the push.
    pub fn enqueue(&self, task: Task) -> Result<usize, QueueError> {
        let mut state = self.inner.lock();
        if state.paused {
            let err = QueueError::Paused {
                id: task.id,
                kind: task.kind(),
            };
            drop(state);
            warn!("{err}");
            return Err(err);
        }

        let (id, kind) = (task.id, task.kind());
        state.pending.push_back(task);
        let depth = state.pending.len();
        drop(state);

        info!(task_id = id, %kind, depth, "Task queued");
        Ok(depth)
    }

    /// Pop the head into the current slot, stamping `started_at`.
    ///
    /// Returns `None` while paused, while another task is in flight, or when
    /// nothing is pending.
    pub fn try_take_next(&self, now: Instant) -> Option<Task> {
        let mut state = self.inner.lock();
        if state.paused || state.current.is_some() {
            return None;
        }
        let mut task = state.pending.pop_front()?;
        task.started_at = Some(now);
        state.current = Some(task.clone());
        Some(task)
    }

    /// Clear the current slot after its task finished. Returns the finished task.
    pub fn complete_current(&self) -> Option<Task> {
        self.inner.lock().current.take()
    }

    /// Fault response: pause, forget the in-flight task and drop everything
    /// pending. Returns how many pending tasks were discarded.
    pub fn pause_and_drain(&self) -> usize {
        let mut state = self.inner.lock();
        state.paused = true;
        let interrupted = state.current.take();
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);

        warn!(
            dropped,
            interrupted = interrupted.as_ref().map(|t| t.id),
            "Task queue paused; pending tasks discarded"
        );
        dropped
    }

    /// Accept work again. Returns `true` if the queue was paused.
    pub fn resume(&self) -> bool {
        let mut state = self.inner.lock();
        let was_paused = std::mem::replace(&mut state.paused, false);
        drop(state);

        if was_paused {
            info!("Task queue resumed");
        }
        was_paused
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Number of pending tasks (excludes the in-flight one).
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    pub fn has_current(&self) -> bool {
        self.inner.lock().current.is_some()
    }

    pub fn current(&self) -> Option<Task> {
        self.inner.lock().current.clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock();
        QueueSnapshot {
            paused: state.paused,
            pending: state.pending.iter().map(PendingEntry::from).collect(),
            current: state.current.as_ref().map(PendingEntry::from),
        }
    }
}
