//! Stage sequencing for one pipeline execution.
//!
//! Stages run strictly in declaration order. Inside a stage, actions sharing
//! a run-order run concurrently and run-order groups run ascending. The first
//! failing group halts the execution: every action not yet started is
//! recorded as skipped and the execution ends `FAILED`. Nothing is rolled
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use topology_core::metrics::METRICS;
use topology_core::obs::{
    emit_action_finished, emit_execution_finished, emit_execution_started, execution_span,
};
use topology_core::{
    Action, ArtifactName, ExecutionMode, ExecutionState, Pipeline, PipelineExecutionEvent,
};

use crate::artifacts::{ArtifactSnapshot, ArtifactStore};
use crate::events::EventSink;
use crate::executor::{ActionExecutor, ActionRequest, ActionResponse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed { reason: String },
    Skipped,
}

impl ActionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed { .. } => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub stage: String,
    pub action: String,
    pub run_order: u32,
    #[serde(flatten)]
    pub status: ActionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionResult {
    fn skipped(stage: &str, action: &Action) -> Self {
        Self {
            stage: stage.to_string(),
            action: action.name.clone(),
            run_order: action.run_order,
            status: ActionStatus::Skipped,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub pipeline: String,
    pub state: ExecutionState,
    pub actions: Vec<ActionResult>,
    pub artifacts: Vec<ArtifactName>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.state == ExecutionState::Succeeded
    }

    pub fn result(&self, action: &str) -> Option<&ActionResult> {
        self.actions.iter().find(|r| r.action == action)
    }

    pub fn failed_action(&self) -> Option<&ActionResult> {
        self.actions
            .iter()
            .find(|r| matches!(r.status, ActionStatus::Failed { .. }))
    }

    pub fn count(&self, label: &str) -> usize {
        self.actions
            .iter()
            .filter(|r| r.status.label() == label)
            .count()
    }

    /// Result of every action in `stage`.
    pub fn stage(&self, stage: &str) -> Vec<&ActionResult> {
        self.actions.iter().filter(|r| r.stage == stage).collect()
    }
}

/// Runs pipelines against an [`ActionExecutor`], publishing state changes.
pub struct StageSequencer {
    sink: Arc<dyn EventSink>,
    queue: Mutex<()>,
    latest: AtomicU64,
}

impl StageSequencer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            queue: Mutex::new(()),
            latest: AtomicU64::new(0),
        }
    }

    /// Execute `pipeline` once.
    ///
    /// `QUEUED` executions wait for earlier ones to finish. `SUPERSEDED`
    /// executions stop at the next stage boundary once a newer execution has
    /// started. `PARALLEL` executions are independent.
    pub async fn run(&self, pipeline: &Pipeline, executor: &dyn ActionExecutor) -> ExecutionRecord {
        match pipeline.execution_mode {
            ExecutionMode::Queued => {
                let _turn = self.queue.lock().await;
                self.execute(pipeline, executor).await
            }
            ExecutionMode::Superseded | ExecutionMode::Parallel => {
                self.execute(pipeline, executor).await
            }
        }
    }

    fn publish(&self, pipeline: &str, execution_id: &str, state: ExecutionState) {
        self.sink.emit(PipelineExecutionEvent::state_change(
            pipeline,
            execution_id,
            state,
            Utc::now(),
        ));
    }

    async fn execute(&self, pipeline: &Pipeline, executor: &dyn ActionExecutor) -> ExecutionRecord {
        let execution_id = Uuid::new_v4().to_string();
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let span = execution_span(&pipeline.name, &execution_id);
        self.execute_stages(pipeline, executor, execution_id, ticket)
            .instrument(span)
            .await
    }

    async fn execute_stages(
        &self,
        pipeline: &Pipeline,
        executor: &dyn ActionExecutor,
        execution_id: String,
        ticket: u64,
    ) -> ExecutionRecord {
        let clock = Instant::now();
        let started_at = Utc::now();

        METRICS.inc_executions_started();
        emit_execution_started(&pipeline.name, &execution_id, pipeline.stages.len());
        self.publish(&pipeline.name, &execution_id, ExecutionState::Started);

        let mut store = ArtifactStore::new();
        let mut results = Vec::new();
        let mut halted: Option<ExecutionState> = None;

        for stage in &pipeline.stages {
            if halted.is_none()
                && pipeline.execution_mode == ExecutionMode::Superseded
                && self.latest.load(Ordering::SeqCst) > ticket
            {
                info!(stage = %stage.name, "execution superseded by a newer one");
                halted = Some(ExecutionState::Superseded);
            }

            for (run_order, group) in stage.run_order_groups() {
                if halted.is_some() {
                    results.extend(group.iter().map(|a| ActionResult::skipped(&stage.name, a)));
                    continue;
                }

                debug!(
                    stage = %stage.name,
                    run_order,
                    actions = group.len(),
                    "starting run-order group"
                );
                let runs = group.iter().map(|action| {
                    self.run_action(&execution_id, pipeline, &stage.name, action, &store, executor)
                });
                let outcomes = join_all(runs).await;

                for (result, snapshots) in outcomes {
                    for snapshot in snapshots {
                        if let Err(err) = store.put(snapshot) {
                            debug!(error = %err, "artifact already stored");
                        }
                    }
                    if matches!(result.status, ActionStatus::Failed { .. }) {
                        halted = Some(ExecutionState::Failed);
                    }
                    results.push(result);
                }
            }
        }

        let state = halted.unwrap_or(ExecutionState::Succeeded);
        if state == ExecutionState::Failed {
            METRICS.inc_executions_failed();
        }
        let duration_ms = clock.elapsed().as_millis() as u64;
        emit_execution_finished(&pipeline.name, &execution_id, state.as_str(), duration_ms);
        self.publish(&pipeline.name, &execution_id, state);

        ExecutionRecord {
            execution_id,
            pipeline: pipeline.name.clone(),
            state,
            actions: results,
            artifacts: store.names(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_action(
        &self,
        execution_id: &str,
        pipeline: &Pipeline,
        stage: &str,
        action: &Action,
        store: &ArtifactStore,
        executor: &dyn ActionExecutor,
    ) -> (ActionResult, Vec<ArtifactSnapshot>) {
        let clock = Instant::now();
        let started_at = Utc::now();

        let response = match store.resolve(action.inputs()) {
            Ok(inputs) => {
                executor
                    .execute(ActionRequest {
                        execution_id: execution_id.to_string(),
                        pipeline: pipeline.name.clone(),
                        stage: stage.to_string(),
                        action: action.clone(),
                        inputs,
                    })
                    .await
            }
            Err(err) => ActionResponse::failed(err.to_string()),
        };

        let finished_at = Utc::now();
        let (status, snapshots) = match response {
            ActionResponse::Succeeded { mut outputs } => {
                let snapshots = action
                    .outputs()
                    .into_iter()
                    .map(|name| ArtifactSnapshot {
                        name: name.clone(),
                        producer: action.name.clone(),
                        payload: outputs.remove(name).unwrap_or_default(),
                        produced_at: finished_at,
                    })
                    .collect();
                (ActionStatus::Succeeded, snapshots)
            }
            ActionResponse::Failed { reason } => (ActionStatus::Failed { reason }, Vec::new()),
        };

        emit_action_finished(
            stage,
            &action.name,
            status.label(),
            clock.elapsed().as_millis() as u64,
        );

        (
            ActionResult {
                stage: stage.to_string(),
                action: action.name.clone(),
                run_order: action.run_order,
                status,
                started_at: Some(started_at),
                finished_at: Some(finished_at),
            },
            snapshots,
        )
    }
}
