use std::path::PathBuf;

use crate::chunk::ChunkRange;
use crate::error::TaskError;

/// Lifecycle of a file task.
///
/// Transitions only move forward: `Planned -> {Skipped, Running, Failed}` and
/// `Running -> {Done, Failed}`. `Skipped`, `Done` and `Failed` are terminal.
#[derive(Debug)]
pub enum TaskState {
    Planned,
    Skipped,
    Running,
    Done,
    Failed(TaskError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Skipped | TaskState::Done | TaskState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Planned => "planned",
            TaskState::Skipped => "skipped",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed(_) => "failed",
        }
    }
}

/// One source file together with where and how it is copied.
#[derive(Debug)]
pub struct TransferTask {
    pub source: fsclient::PathEntry,
    pub destination: PathBuf,
    pub chunks: Vec<ChunkRange>,
    state: TaskState,
    bytes_transferred: u64,
}

impl TransferTask {
    pub fn new(source: fsclient::PathEntry, destination: PathBuf, chunks: Vec<ChunkRange>) -> Self {
        Self {
            source,
            destination,
            chunks,
            state: TaskState::Planned,
            bytes_transferred: 0,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Bytes actually written to the destination for this task.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn failure(&self) -> Option<&TaskError> {
        match &self.state {
            TaskState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn skip(&mut self) {
        debug_assert!(
            matches!(self.state, TaskState::Planned),
            "cannot skip a task in state {}",
            self.state.name()
        );
        self.state = TaskState::Skipped;
    }

    pub fn start(&mut self) {
        debug_assert!(
            matches!(self.state, TaskState::Planned),
            "cannot start a task in state {}",
            self.state.name()
        );
        self.state = TaskState::Running;
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        debug_assert!(matches!(self.state, TaskState::Running));
        self.bytes_transferred += bytes;
    }

    pub fn complete(&mut self) {
        debug_assert!(
            matches!(self.state, TaskState::Running),
            "cannot complete a task in state {}",
            self.state.name()
        );
        self.state = TaskState::Done;
    }

    /// Records a failure; a task that is already terminal keeps its first outcome.
    pub fn fail(&mut self, error: TaskError) {
        if self.state.is_terminal() {
            tracing::debug!(
                "ignoring failure of {:?} already in state {}: {error}",
                self.source.path,
                self.state.name()
            );
            return;
        }
        self.state = TaskState::Failed(error);
    }
}
