//! Pipeline definition: which stages a session runs, and what each does.

use crate::dispatch::StageAssignment;
use crate::plan::TaskPlan;
use crate::worker::{AnnotateAttempt, CriteriaAdjuster};
use scoutflow_core::DecisionKind;
use std::sync::Arc;

/// What a dispatch stage is given as criteria.
#[derive(Clone, Debug)]
pub enum StageInput {
    /// The session criteria, unchanged.
    Criteria,
    /// `{ "criteria": ..., "entity_ids": [approved] }` from the named review.
    Approved {
        review_action: String,
        /// Complete the stage without dispatching when nothing was approved.
        skip_when_empty: bool,
    },
}

#[derive(Clone)]
pub enum StageKind {
    /// Run assignments through the dispatcher, one after another.
    Dispatch {
        input: StageInput,
        assignments: Vec<StageAssignment>,
        adjuster: Arc<dyn CriteriaAdjuster>,
    },
    /// Suspend for an external decision on the entities of `source_collection`.
    Review {
        action_name: String,
        source_collection: String,
        allowed_decisions: Vec<DecisionKind>,
    },
}

#[derive(Clone)]
pub struct StageSpec {
    pub name: String,
    pub kind: StageKind,
}

impl StageSpec {
    pub fn dispatch(name: impl Into<String>, input: StageInput, assignments: Vec<StageAssignment>) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Dispatch {
                input,
                assignments,
                adjuster: Arc::new(AnnotateAttempt),
            },
        }
    }

    pub fn review(name: impl Into<String>, action_name: impl Into<String>, source_collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Review {
                action_name: action_name.into(),
                source_collection: source_collection.into(),
                allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject],
            },
        }
    }

    /// Replace the retry adjuster of a dispatch stage. No-op for reviews.
    pub fn with_adjuster(mut self, adjuster: Arc<dyn CriteriaAdjuster>) -> Self {
        if let StageKind::Dispatch { adjuster: a, .. } = &mut self.kind {
            *a = adjuster;
        }
        self
    }
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Fresh plan with every stage pending.
    pub fn plan(&self) -> TaskPlan {
        TaskPlan::new(self.stages.iter().map(|s| s.name.clone()))
    }

    /// Name of the first review action, used to filter report entities.
    pub fn review_action(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| match &s.kind {
            StageKind::Review { action_name, .. } => Some(action_name.as_str()),
            _ => None,
        })
    }
}
