pub mod cycle;
pub mod graph;
pub mod reachability;

pub use cycle::{CycleDetector, CycleReport};
pub use graph::FlowGraph;
pub use reachability::{ReachabilityChecker, ReachabilityReport};

use crate::survey::{QuestionId, Survey, SurveyId};
use serde::Serialize;

/// Structural and reference errors raised while inspecting a survey flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),
    #[error("invalid determinant (target {target}): {reason}")]
    InvalidDeterminant { target: i64, reason: String },
    #[error("cycle detected: {}", format_path(path))]
    CycleDetected { path: Vec<QuestionId> },
    #[error("questions cannot reach the end of the survey: {ids:?}")]
    UnreachableQuestions { ids: Vec<QuestionId> },
    #[error("survey {0} has no questions")]
    EmptySurvey(SurveyId),
    #[error("survey {0} not found")]
    SurveyNotFound(SurveyId),
}

fn format_path(path: &[QuestionId]) -> String {
    let mut parts: Vec<String> = path.iter().map(|id| format!("Q{id}")).collect();
    if let Some(first) = path.first() {
        parts.push(format!("Q{first}"));
    }
    parts.join(" -> ")
}

/// Result of validating a survey flow for activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "questions", rename_all = "snake_case")]
pub enum FlowVerdict {
    Valid,
    Cycle(Vec<QuestionId>),
    Unreachable(Vec<QuestionId>),
}

impl FlowVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert a failing verdict into the matching structural error.
    pub fn into_result(self) -> Result<(), FlowError> {
        match self {
            Self::Valid => Ok(()),
            Self::Cycle(path) => Err(FlowError::CycleDetected { path }),
            Self::Unreachable(ids) => Err(FlowError::UnreachableQuestions { ids }),
        }
    }
}

/// Activation gate: cycle check first, reachability only on acyclic graphs.
pub struct FlowValidator;

impl FlowValidator {
    /// `Err` only for reference problems in the snapshot itself (a determinant
    /// pointing at a question that does not exist); flow defects come back as
    /// a failing [`FlowVerdict`].
    pub fn validate(survey: &Survey) -> Result<FlowVerdict, FlowError> {
        let graph = FlowGraph::build(survey)?;
        Ok(Self::validate_graph(&graph))
    }

    pub fn validate_graph(graph: &FlowGraph) -> FlowVerdict {
        let cycles = CycleDetector::detect(graph);
        if cycles.has_cycle {
            tracing::debug!(path = ?cycles.path, "flow validation: cycle");
            return FlowVerdict::Cycle(cycles.path);
        }

        let reach = ReachabilityChecker::check(graph);
        if !reach.all_reachable {
            tracing::debug!(ids = ?reach.unreachable, "flow validation: unreachable questions");
            return FlowVerdict::Unreachable(reach.unreachable);
        }

        FlowVerdict::Valid
    }
}
