//! Executor that drives release gates for approval and blue/green deploy
//! actions and delegates everything else.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use topology_core::{ActionCategory, ActionKind, Topology};

use crate::executor::{ActionExecutor, ActionRequest, ActionResponse};
use crate::release::{BlueGreenGate, GateState, HealthProbe, ShiftClock};

/// How a pending manual approval is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve { by: String },
    Reject { reason: String },
}

/// Wraps an executor with one [`BlueGreenGate`] per deployment group.
///
/// An approval action answers the gates of the blue/green deploys declared in
/// its stage, starting a new rollout on any gate a previous execution left
/// terminal. A blue/green deploy only shifts traffic through an approved gate.
pub struct ReleaseExecutor<E> {
    inner: E,
    gates: HashMap<String, Mutex<BlueGreenGate>>,
    approvals: HashMap<String, Vec<String>>,
    decision: ApprovalDecision,
    clock: Arc<dyn ShiftClock>,
    probe: Arc<dyn HealthProbe>,
}

impl<E: ActionExecutor> ReleaseExecutor<E> {
    pub fn new(
        topology: &Topology,
        inner: E,
        decision: ApprovalDecision,
        clock: Arc<dyn ShiftClock>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let gates = topology
            .deployment_groups
            .iter()
            .map(|group| (group.name.clone(), Mutex::new(BlueGreenGate::new(group))))
            .collect();

        let mut approvals: HashMap<String, Vec<String>> = HashMap::new();
        for stage in &topology.pipeline.stages {
            let groups: Vec<String> = stage
                .actions
                .iter()
                .filter_map(|a| a.deployment_group().map(str::to_string))
                .collect();
            for action in &stage.actions {
                if action.category() == ActionCategory::Approval && !groups.is_empty() {
                    approvals.insert(action.name.clone(), groups.clone());
                }
            }
        }

        Self {
            inner,
            gates,
            approvals,
            decision,
            clock,
            probe,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Copy of the gate for `deployment_group`.
    pub async fn gate(&self, deployment_group: &str) -> Option<BlueGreenGate> {
        match self.gates.get(deployment_group) {
            Some(gate) => Some(gate.lock().await.clone()),
            None => None,
        }
    }

    async fn answer_approval(&self, action: &str) -> ActionResponse {
        let groups = self.approvals.get(action).cloned().unwrap_or_default();
        for name in &groups {
            let Some(gate) = self.gates.get(name) else {
                continue;
            };
            let mut gate = gate.lock().await;
            if let Some(next) = gate.next_release() {
                *gate = next;
            }
            let answered = gate.request_approval().and_then(|()| match &self.decision {
                ApprovalDecision::Approve { by } => gate.approve(by.clone()),
                ApprovalDecision::Reject { reason } => gate.reject(reason.clone()),
            });
            if let Err(err) = answered {
                return ActionResponse::failed(err.to_string());
            }
        }

        match &self.decision {
            ApprovalDecision::Approve { by } => {
                info!(action = %action, approver = %by, "manual approval granted");
                ActionResponse::succeeded()
            }
            ApprovalDecision::Reject { reason } => {
                warn!(action = %action, reason = %reason, "manual approval rejected");
                ActionResponse::failed(format!("approval rejected: {}", reason))
            }
        }
    }

    async fn shift(&self, deployment_group: &str) -> ActionResponse {
        let Some(gate) = self.gates.get(deployment_group) else {
            return ActionResponse::failed(format!(
                "no deployment group named '{}'",
                deployment_group
            ));
        };
        let mut gate = gate.lock().await;
        match gate
            .run_to_completion(self.clock.as_ref(), self.probe.as_ref())
            .await
        {
            Ok(GateState::Complete) => ActionResponse::succeeded(),
            Ok(GateState::Failed { reason }) => ActionResponse::failed(reason),
            Ok(other) => ActionResponse::failed(format!("release ended {}", other)),
            Err(err) => ActionResponse::failed(err.to_string()),
        }
    }
}

#[async_trait]
impl<E: ActionExecutor> ActionExecutor for ReleaseExecutor<E> {
    async fn execute(&self, request: ActionRequest) -> ActionResponse {
        match &request.action.kind {
            ActionKind::ManualApproval(_) if self.approvals.contains_key(&request.action.name) => {
                self.answer_approval(&request.action.name).await
            }
            ActionKind::BlueGreenDeploy(deploy) => self.shift(&deploy.deployment_group).await,
            _ => self.inner.execute(request).await,
        }
    }
}
