//! Pipeline execution state-change events, as published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `source` of every pipeline event.
pub const PIPELINE_EVENT_SOURCE: &str = "aws.codepipeline";

/// `detail-type` of execution state changes.
pub const EXECUTION_STATE_CHANGE: &str = "CodePipeline Pipeline Execution State Change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Started,
    Succeeded,
    Failed,
    Stopped,
    Superseded,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Started => "STARTED",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Stopped => "STOPPED",
            ExecutionState::Superseded => "SUPERSEDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Started)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub pipeline: String,
    #[serde(rename = "execution-id")]
    pub execution_id: String,
    pub state: ExecutionState,
}

/// Event emitted whenever a pipeline execution changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExecutionEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub time: DateTime<Utc>,
    pub detail: ExecutionDetail,
}

impl PipelineExecutionEvent {
    pub fn state_change(
        pipeline: impl Into<String>,
        execution_id: impl Into<String>,
        state: ExecutionState,
        time: DateTime<Utc>,
    ) -> Self {
        let execution_id = execution_id.into();
        Self {
            id: format!("{}:{}", execution_id, state.as_str().to_lowercase()),
            source: PIPELINE_EVENT_SOURCE.to_string(),
            detail_type: EXECUTION_STATE_CHANGE.to_string(),
            time,
            detail: ExecutionDetail {
                pipeline: pipeline.into(),
                execution_id,
                state,
            },
        }
    }

    /// JSON shape matched by event patterns.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
