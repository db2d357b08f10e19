//! Completed-step log and run status.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages in their canonical order.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Grid,
    Dustmixer,
    MonteCarlo,
    Raytrace,
    Synobs,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Grid => "grid",
            Step::Dustmixer => "dustmixer",
            Step::MonteCarlo => "monte_carlo",
            Step::Raytrace => "raytrace",
            Step::Synobs => "synobs",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only, insertion-ordered record of the steps completed in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StepLog {
    steps: Vec<Step>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new log with `step` appended; the receiver is left untouched.
    pub fn with(&self, step: Step) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    pub fn contains(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }
}

/// Lifecycle of a single pipeline run. There is no retry and no resume:
/// `Failed` is terminal and the caller starts a fresh run.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotRun,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotRun => "not_run",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
        }
    }

    pub fn start(self) -> Option<RunStatus> {
        match self {
            RunStatus::NotRun => Some(RunStatus::Running),
            _ => None,
        }
    }

    pub fn finish(self, ok: bool) -> Option<RunStatus> {
        match (self, ok) {
            (RunStatus::Running, true) => Some(RunStatus::Done),
            (RunStatus::Running, false) => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
