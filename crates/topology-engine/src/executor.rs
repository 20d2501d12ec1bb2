//! The request/response contract between the sequencer and whatever runs
//! an action, plus a scripted executor for simulations and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use topology_core::{Action, ActionKind, ArtifactName};

use crate::artifacts::ArtifactSnapshot;

/// One action invocation.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub execution_id: String,
    pub pipeline: String,
    pub stage: String,
    pub action: Action,
    pub inputs: Vec<Arc<ArtifactSnapshot>>,
}

impl ActionRequest {
    pub fn input(&self, name: &ArtifactName) -> Option<&Arc<ArtifactSnapshot>> {
        self.inputs.iter().find(|s| &s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse {
    /// Payload per produced artifact. Declared outputs missing from the map
    /// are stored with an empty payload.
    Succeeded { outputs: BTreeMap<ArtifactName, Value> },
    Failed { reason: String },
}

impl ActionResponse {
    pub fn succeeded() -> Self {
        ActionResponse::Succeeded {
            outputs: BTreeMap::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ActionResponse::Failed {
            reason: reason.into(),
        }
    }
}

/// Runs a single action. Implementations must be safe to call concurrently
/// for actions sharing a run-order.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: ActionRequest) -> ActionResponse;
}

#[async_trait]
impl<T: ActionExecutor + ?Sized> ActionExecutor for Arc<T> {
    async fn execute(&self, request: ActionRequest) -> ActionResponse {
        (**self).execute(request).await
    }
}

/// Start and end of one scripted call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub stage: String,
    pub action: String,
    pub started: Instant,
    pub finished: Instant,
    pub inputs: Vec<Arc<ArtifactSnapshot>>,
}

/// Executor that succeeds unless told otherwise.
///
/// Source actions emit a payload describing the trigger; every other action
/// echoes its inputs' producers. Calls are recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `action` fail with `reason`.
    pub fn fail(mut self, action: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(action.into(), reason.into());
        self
    }

    /// Make `action` take `delay` before responding.
    pub fn delay(mut self, action: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(action.into(), delay);
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn called(&self) -> HashSet<String> {
        self.calls().into_iter().map(|c| c.action).collect()
    }

    /// Whether the recorded calls of `a` and `b` overlapped in time.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        let calls = self.calls();
        let find = |name: &str| calls.iter().find(|c| c.action == name).cloned();
        match (find(a), find(b)) {
            (Some(a), Some(b)) => a.started < b.finished && b.started < a.finished,
            _ => false,
        }
    }

    fn payload(request: &ActionRequest) -> Value {
        match &request.action.kind {
            ActionKind::Source(source) => json!({
                "source": source.trigger.describe(),
                "branch": source.trigger.branch(),
                "execution_id": request.execution_id,
            }),
            _ => json!({
                "action": request.action.name,
                "inputs": request
                    .inputs
                    .iter()
                    .map(|s| json!({ "name": s.name.as_str(), "producer": s.producer }))
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, request: ActionRequest) -> ActionResponse {
        let started = Instant::now();
        if let Some(delay) = self.delays.get(&request.action.name) {
            tokio::time::sleep(*delay).await;
        }

        let response = match self.failures.get(&request.action.name) {
            Some(reason) => ActionResponse::failed(reason.clone()),
            None => {
                let payload = Self::payload(&request);
                let outputs = request
                    .action
                    .outputs()
                    .into_iter()
                    .map(|name| (name.clone(), payload.clone()))
                    .collect();
                ActionResponse::Succeeded { outputs }
            }
        };

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CallRecord {
                stage: request.stage.clone(),
                action: request.action.name.clone(),
                started,
                finished: Instant::now(),
                inputs: request.inputs.clone(),
            });
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: Action) -> ActionRequest {
        ActionRequest {
            execution_id: "exec-1".to_string(),
            pipeline: "CICD_Pipeline".to_string(),
            stage: "Code-Quality-Testing".to_string(),
            action,
            inputs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_success_fills_outputs() {
        let executor = ScriptedExecutor::new();
        let action = Action::build(
            "Unit-Test",
            "CodeBuild",
            ArtifactName::source_output(),
            vec![ArtifactName::unit_test_output()],
        );
        match executor.execute(request(action)).await {
            ActionResponse::Succeeded { outputs } => {
                assert!(outputs.contains_key(&ArtifactName::unit_test_output()));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(executor.called().contains("Unit-Test"));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let executor = ScriptedExecutor::new().fail("Unit-Test", "tests failed");
        let action = Action::build(
            "Unit-Test",
            "CodeBuild",
            ArtifactName::source_output(),
            Vec::new(),
        );
        assert_eq!(
            executor.execute(request(action)).await,
            ActionResponse::failed("tests failed")
        );
    }
}
