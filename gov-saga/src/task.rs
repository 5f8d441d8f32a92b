//! Task State Store
//!
//! Tracks the named steps of one saga run through an explicit state machine
//! and derives a progress percentage from the step statuses.
//!
//! # State machine
//!
//! ```text
//! idle ──→ pending ──┬──→ done
//!                    └──→ error
//! ```
//!
//! Steps only move forward; the whole store can be returned to idle with
//! [`TaskTracker::reset`]. Every transition produces a new immutable
//! [`TaskState`] snapshot which is also published on a watch channel so a
//! caller can render the current action. Operating on a task name that was
//! never declared is a programmer error and panics.

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

/// Status of one saga step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started
    #[default]
    Idle,
    /// In progress
    Pending,
    /// Finished successfully
    Done,
    /// Finished with an error
    Error,
}

impl TaskStatus {
    /// Whether a transition to `target` moves forward
    fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Pending)
                | (Self::Pending, Self::Done)
                | (Self::Pending, Self::Error)
        )
    }
}

/// Status and optional message for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskEntry {
    /// Current status
    pub status: TaskStatus,
    /// Error or progress message
    pub message: Option<String>,
}

/// Immutable snapshot of all step states for one saga run.
///
/// Steps keep their declaration order, which is the step execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskState {
    steps: Vec<(String, TaskEntry)>,
}

impl TaskState {
    /// Declare the named steps of a saga, all idle
    pub fn declare<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: names
                .into_iter()
                .map(|n| (n.into(), TaskEntry::default()))
                .collect(),
        }
    }

    /// Look up one step
    pub fn get(&self, task: &str) -> Option<&TaskEntry> {
        self.steps.iter().find(|(n, _)| n == task).map(|(_, e)| e)
    }

    /// Step names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(n, _)| n.as_str())
    }

    /// Number of declared steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps are declared
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether every step finished successfully
    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|(_, e)| e.status == TaskStatus::Done)
    }

    /// Whether any step failed
    pub fn has_error(&self) -> bool {
        self.steps.iter().any(|(_, e)| e.status == TaskStatus::Error)
    }

    /// Derived progress percentage in [0, 100].
    ///
    /// A completed step contributes a full step, a started step half a
    /// step. A step that failed keeps its half credit: steps only move
    /// forward, so progress never regresses within a run.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let done = self
            .steps
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Done)
            .count() as f64;
        let started = self
            .steps
            .iter()
            .filter(|(_, e)| matches!(e.status, TaskStatus::Pending | TaskStatus::Error))
            .count() as f64;
        let total = self.steps.len() as f64;
        let pct = (100.0 * (done + 0.5 * started) / total).round();
        pct.clamp(0.0, 100.0) as u8
    }

    /// Pure transition producing a new snapshot.
    ///
    /// Panics on an unknown task name or a backwards transition; both are
    /// programmer errors in the saga definition, not runtime conditions.
    fn with_status(&self, task: &str, status: TaskStatus, message: Option<String>) -> Self {
        let mut next = self.clone();
        let entry = next
            .steps
            .iter_mut()
            .find(|(n, _)| n == task)
            .map(|(_, e)| e)
            .unwrap_or_else(|| panic!("unknown saga task: {}", task));
        assert!(
            entry.status.can_transition_to(status),
            "saga task {} cannot move from {:?} to {:?}",
            task,
            entry.status,
            status
        );
        entry.status = status;
        entry.message = message;
        next
    }
}

/// Tracker owning the current snapshot and the subscriber channel
pub struct TaskTracker {
    state: RwLock<TaskState>,
    tx: watch::Sender<TaskState>,
}

impl TaskTracker {
    /// Create a tracker with no declared steps
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TaskState::default());
        Self {
            state: RwLock::new(TaskState::default()),
            tx,
        }
    }

    /// Declare the steps for a new saga run, resetting any previous state
    pub async fn declare<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next = TaskState::declare(names);
        self.publish(next).await;
    }

    /// Mark a step as started
    pub async fn start(&self, task: &str) {
        let next = self
            .state
            .read()
            .await
            .with_status(task, TaskStatus::Pending, None);
        self.publish(next).await;
    }

    /// Mark a step as finished successfully
    pub async fn complete(&self, task: &str) {
        let next = self
            .state
            .read()
            .await
            .with_status(task, TaskStatus::Done, None);
        self.publish(next).await;
    }

    /// Mark a step as failed
    pub async fn fail(&self, task: &str, message: impl Into<String>) {
        let next =
            self.state
                .read()
                .await
                .with_status(task, TaskStatus::Error, Some(message.into()));
        self.publish(next).await;
    }

    /// Return every declared step to idle
    pub async fn reset(&self) {
        let names: Vec<String> = self
            .state
            .read()
            .await
            .names()
            .map(str::to_string)
            .collect();
        self.publish(TaskState::declare(names)).await;
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> TaskState {
        self.state.read().await.clone()
    }

    /// Current derived progress
    pub async fn progress(&self) -> u8 {
        self.state.read().await.progress()
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.tx.subscribe()
    }

    async fn publish(&self, next: TaskState) {
        let mut state = self.state.write().await;
        *state = next.clone();
        // Receivers may come and go; a send with no receivers is fine
        let _ = self.tx.send(next);
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
