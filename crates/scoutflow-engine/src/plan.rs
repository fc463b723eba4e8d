//! Task plan: an ordered list of stages that complete strictly in order.
//!
//! Every mutation validates first and only then touches state, so a
//! rejected transition leaves the plan exactly as it was.

use chrono::Utc;
use scoutflow_core::{Error, Progress, Result, Stage, StageStatus};
use serde::{Deserialize, Serialize};

pub const SEARCH: &str = "search";
pub const REVIEW: &str = "review";
pub const ENRICH: &str = "enrich";
pub const COMPILE: &str = "compile";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TaskPlan {
    stages: Vec<Stage>,
}

impl Default for TaskPlan {
    fn default() -> Self {
        Self::new([SEARCH, REVIEW, ENRICH, COMPILE])
    }
}

impl TaskPlan {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stages: names.into_iter().map(Stage::pending).collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownStage(name.to_string()))
    }

    /// The stage currently `in_progress`, if any.
    pub fn current(&self) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress)
    }

    /// First stage that has not completed yet.
    pub fn next_pending(&self) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.status != StageStatus::Completed)
    }

    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Completed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self
                .stages
                .iter()
                .filter(|s| s.status == StageStatus::Completed)
                .count(),
            total: self.stages.len(),
        }
    }

    pub fn degraded_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.degraded)
    }

    /// `pending → in_progress`. Only the first non-completed stage may
    /// advance, and only while no other stage is running.
    pub fn advance(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        if let Some(running) = self.current() {
            return Err(Error::OutOfOrderTransition {
                requested: name.to_string(),
                expected: Some(running.name.clone()),
            });
        }
        let next = self.stages.iter().position(|s| s.status != StageStatus::Completed);
        if next != Some(idx) {
            return Err(Error::OutOfOrderTransition {
                requested: name.to_string(),
                expected: next.map(|i| self.stages[i].name.clone()),
            });
        }
        let stage = &mut self.stages[idx];
        stage.status = StageStatus::InProgress;
        stage.started_at = Some(Utc::now());
        Ok(())
    }

    /// `in_progress → completed`.
    pub fn complete(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        let stage = &mut self.stages[idx];
        if stage.status != StageStatus::InProgress {
            return Err(Error::InvalidTransition {
                stage: name.to_string(),
                status: stage.status,
            });
        }
        stage.status = StageStatus::Completed;
        stage.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Flag the running stage as finishing without usable output.
    pub fn mark_degraded(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        let stage = &mut self.stages[idx];
        if stage.status != StageStatus::InProgress {
            return Err(Error::InvalidTransition {
                stage: name.to_string(),
                status: stage.status,
            });
        }
        stage.degraded = true;
        Ok(())
    }
}
