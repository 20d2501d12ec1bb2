//! Blue/green release gate.
//!
//! ```text
//! Idle ─request_approval→ ApprovalPending ─approve→ Approved ─begin_shift→ ShiftingTraffic ─advance…→ Complete
//!                               │                                               │
//!                               └─reject→ Rejected                              └─fail→ Failed
//! ```
//!
//! The production listener forwards everything to blue until the shift
//! begins. From then on the test listener forwards to green and each
//! `advance` moves the next increment of production traffic. A failed shift
//! keeps the split of the last applied increment; nothing is rolled back.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use topology_core::metrics::METRICS;
use topology_core::obs::emit_traffic_shifted;
use topology_core::{DeploymentGroup, TrafficShiftPolicy};

/// Gate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    Idle,
    ApprovalPending,
    Approved { by: String },
    ShiftingTraffic { green: u8 },
    Complete,
    Rejected { reason: String },
    Failed { reason: String },
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            GateState::Idle => "idle",
            GateState::ApprovalPending => "approval_pending",
            GateState::Approved { .. } => "approved",
            GateState::ShiftingTraffic { .. } => "shifting_traffic",
            GateState::Complete => "complete",
            GateState::Rejected { .. } => "rejected",
            GateState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GateState::Complete | GateState::Rejected { .. } | GateState::Failed { .. }
        )
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::ShiftingTraffic { green } => write!(f, "shifting_traffic({}%)", green),
            other => f.write_str(other.name()),
        }
    }
}

/// Production traffic split. `blue + green == 100` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    pub blue: u8,
    pub green: u8,
}

impl TrafficSplit {
    pub fn all_blue() -> Self {
        Self::with_green(0)
    }

    /// Split with `green` percent on green, clamped to 100.
    pub fn with_green(green: u8) -> Self {
        let green = green.min(100);
        Self {
            blue: 100 - green,
            green,
        }
    }
}

impl fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blue {}% / green {}%", self.blue, self.green)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTransition {
    pub from: GateState,
    pub to: GateState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("cannot {action} while the gate is {from}")]
    InvalidTransition { from: String, action: &'static str },
}

/// Waits between traffic increments.
#[async_trait]
pub trait ShiftClock: Send + Sync {
    async fn wait(&self, interval: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl ShiftClock for TokioClock {
    async fn wait(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct InstantClock {
    waits: Mutex<Vec<Duration>>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ShiftClock for InstantClock {
    async fn wait(&self, interval: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interval);
    }
}

/// Health of the green target under the current split.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn healthy(&self, split: TrafficSplit) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn healthy(&self, _split: TrafficSplit) -> bool {
        true
    }
}

/// Reports green unhealthy once it carries at least the given percentage.
#[derive(Debug, Clone, Copy)]
pub struct UnhealthyFrom(pub u8);

#[async_trait]
impl HealthProbe for UnhealthyFrom {
    async fn healthy(&self, split: TrafficSplit) -> bool {
        split.green < self.0
    }
}

/// Release state for one deployment group.
#[derive(Debug, Clone)]
pub struct BlueGreenGate {
    group: DeploymentGroup,
    state: GateState,
    split: TrafficSplit,
    test_route: Option<String>,
    schedule: Vec<u8>,
    applied: usize,
    history: Vec<GateTransition>,
}

impl BlueGreenGate {
    pub fn new(group: &DeploymentGroup) -> Self {
        Self {
            schedule: group.config.increments(),
            group: group.clone(),
            state: GateState::Idle,
            split: TrafficSplit::all_blue(),
            test_route: None,
            applied: 0,
            history: Vec::new(),
        }
    }

    /// A fresh `Idle` gate for the next rollout, once this one is terminal.
    ///
    /// After `Complete` the released target becomes blue and the previous
    /// blue becomes the next green candidate. After `Rejected` or `Failed`
    /// the targets keep their roles.
    pub fn next_release(&self) -> Option<BlueGreenGate> {
        if !self.state.is_terminal() {
            return None;
        }
        let mut group = self.group.clone();
        if self.state == GateState::Complete {
            std::mem::swap(&mut group.blue_target_group, &mut group.green_target_group);
        }
        info!(
            deployment_group = %group.name,
            previous = %self.state,
            blue = %group.blue_target_group,
            "release gate reset for next rollout"
        );
        Some(BlueGreenGate::new(&group))
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn split(&self) -> TrafficSplit {
        self.split
    }

    pub fn history(&self) -> &[GateTransition] {
        &self.history
    }

    pub fn deployment_group(&self) -> &str {
        &self.group.name
    }

    pub fn policy(&self) -> TrafficShiftPolicy {
        self.group.config
    }

    /// Target group the production listener sends the majority of traffic to.
    pub fn production_target(&self) -> &str {
        if self.split.green > self.split.blue {
            &self.group.green_target_group
        } else {
            &self.group.blue_target_group
        }
    }

    /// Target group behind the test listener, once the shift has begun.
    pub fn test_target(&self) -> Option<&str> {
        self.test_route.as_deref()
    }

    fn transition(&mut self, to: GateState) {
        info!(
            deployment_group = %self.group.name,
            from = %self.state,
            to = %to,
            "release gate transition"
        );
        let from = std::mem::replace(&mut self.state, to.clone());
        self.history.push(GateTransition {
            from,
            to,
            at: Utc::now(),
        });
    }

    fn invalid(&self, action: &'static str) -> ReleaseError {
        ReleaseError::InvalidTransition {
            from: self.state.to_string(),
            action,
        }
    }

    pub fn request_approval(&mut self) -> Result<(), ReleaseError> {
        match self.state {
            GateState::Idle => {
                self.transition(GateState::ApprovalPending);
                Ok(())
            }
            _ => Err(self.invalid("request approval")),
        }
    }

    pub fn approve(&mut self, by: impl Into<String>) -> Result<(), ReleaseError> {
        match self.state {
            GateState::ApprovalPending => {
                self.transition(GateState::Approved { by: by.into() });
                Ok(())
            }
            _ => Err(self.invalid("approve")),
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), ReleaseError> {
        match self.state {
            GateState::ApprovalPending => {
                self.transition(GateState::Rejected {
                    reason: reason.into(),
                });
                Ok(())
            }
            _ => Err(self.invalid("reject")),
        }
    }

    /// Route the test listener to green. Production traffic is untouched.
    pub fn begin_shift(&mut self) -> Result<(), ReleaseError> {
        match self.state {
            GateState::Approved { .. } => {
                self.test_route = Some(self.group.green_target_group.clone());
                self.transition(GateState::ShiftingTraffic { green: 0 });
                Ok(())
            }
            _ => Err(self.invalid("begin shifting traffic")),
        }
    }

    /// Apply the next increment of the policy.
    pub fn advance(&mut self) -> Result<TrafficSplit, ReleaseError> {
        if !matches!(self.state, GateState::ShiftingTraffic { .. }) {
            return Err(self.invalid("advance traffic"));
        }
        let green = self.schedule.get(self.applied).copied().unwrap_or(100);
        self.applied += 1;
        self.split = TrafficSplit::with_green(green);

        METRICS.inc_traffic_increments();
        emit_traffic_shifted(&self.group.name, self.split.blue, self.split.green);

        if self.split.green >= 100 {
            self.transition(GateState::Complete);
        } else {
            self.transition(GateState::ShiftingTraffic { green });
        }
        Ok(self.split)
    }

    /// Halt the shift, keeping the current split.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ReleaseError> {
        match self.state {
            GateState::ShiftingTraffic { .. } => {
                let reason = reason.into();
                warn!(
                    deployment_group = %self.group.name,
                    split = %self.split,
                    reason = %reason,
                    "traffic shift halted"
                );
                self.transition(GateState::Failed { reason });
                Ok(())
            }
            _ => Err(self.invalid("fail")),
        }
    }

    /// Shift traffic to completion, waiting the policy interval after each
    /// increment and probing green before the next one.
    ///
    /// Starts the shift when the gate is `Approved`. Returns the final state,
    /// which is `Failed` when the probe reports green unhealthy.
    pub async fn run_to_completion(
        &mut self,
        clock: &dyn ShiftClock,
        probe: &dyn HealthProbe,
    ) -> Result<GateState, ReleaseError> {
        if matches!(self.state, GateState::Approved { .. }) {
            self.begin_shift()?;
        }
        let interval = Duration::from_secs(u64::from(self.group.config.interval_minutes()) * 60);

        loop {
            let split = self.advance()?;
            if self.state == GateState::Complete {
                break;
            }
            clock.wait(interval).await;
            if !probe.healthy(split).await {
                self.fail(format!("green target unhealthy at {}", split))?;
                break;
            }
        }
        Ok(self.state.clone())
    }
}
