//! Task kinds and request types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::dataset::DatasetIndex;
use crate::error::{StatsError, StatsResult};
use crate::question::{QuestionName, StateName};

/// The aggregation operations the service can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    StatesMean,
    StateMean,
    Best5,
    Worst5,
    GlobalMean,
    DiffFromMean,
    StateDiffFromMean,
    MeanByCategory,
    StateMeanByCategory,
}

impl TaskKind {
    /// All task kinds, in endpoint declaration order
    pub const ALL: [TaskKind; 9] = [
        TaskKind::StatesMean,
        TaskKind::StateMean,
        TaskKind::Best5,
        TaskKind::Worst5,
        TaskKind::GlobalMean,
        TaskKind::DiffFromMean,
        TaskKind::StateDiffFromMean,
        TaskKind::MeanByCategory,
        TaskKind::StateMeanByCategory,
    ];

    /// Wire name, also the API endpoint suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StatesMean => "states_mean",
            TaskKind::StateMean => "state_mean",
            TaskKind::Best5 => "best5",
            TaskKind::Worst5 => "worst5",
            TaskKind::GlobalMean => "global_mean",
            TaskKind::DiffFromMean => "diff_from_mean",
            TaskKind::StateDiffFromMean => "state_diff_from_mean",
            TaskKind::MeanByCategory => "mean_by_category",
            TaskKind::StateMeanByCategory => "state_mean_by_category",
        }
    }

    /// Whether this kind aggregates a single state and needs `state` in
    /// the request
    pub fn requires_state(&self) -> bool {
        matches!(
            self,
            TaskKind::StateMean | TaskKind::StateDiffFromMean | TaskKind::StateMeanByCategory
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StatsError::validation(format!("Unknown task kind: {s}")))
    }
}

/// Untyped submission payload as it arrives from a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmission {
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A validated task request, ready for the job queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub question: QuestionName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateName>,
}

impl TaskRequest {
    /// Validate a raw submission against the dataset index.
    ///
    /// Checks that `question` is present and known. A missing `state` for
    /// per-state kinds is deliberately not rejected here; it fails the job
    /// at dispatch instead, so submission acceptance stays uniform across
    /// kinds.
    pub fn from_submission(
        kind: TaskKind,
        submission: TaskSubmission,
        index: &DatasetIndex,
    ) -> StatsResult<Self> {
        let question = submission
            .question
            .ok_or_else(|| StatsError::validation("Question not provided"))?;

        if !index.contains_question(&question) {
            return Err(StatsError::validation("Invalid question"));
        }

        Ok(Self {
            kind,
            question: QuestionName::from(question),
            state: submission.state.map(StateName::from),
        })
    }
}
