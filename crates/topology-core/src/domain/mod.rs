//! Domain models for pipeline topologies.
//!
//! Canonical definitions for the declared entities:
//! - `Pipeline` / `Stage` / `Action`: the ordered execution topology
//! - `ArtifactName`: handoffs between actions
//! - `BuildProject` / `PolicyStatement`: build projects and their role grants
//! - `DeploymentGroup`: blue/green release configuration
//! - `ObservabilityOverlay`: dashboard, topic and failure alert rule

pub mod action;
pub mod artifact;
pub mod build;
pub mod deployment;
pub mod error;
pub mod events;
pub mod observability;
pub mod permissions;
pub mod pipeline;
pub mod source;
pub mod stage;
pub mod topology;

pub use action::{
    Action, ActionCategory, ActionKind, ApprovalAction, BlueGreenDeployAction, BuildAction,
    EcsDeployAction, SourceAction, DEFAULT_RUN_ORDER,
};
pub use artifact::ArtifactName;
pub use build::{BuildEnvironment, BuildProject, ComputeType, EnvVar, EnvVarKind};
pub use deployment::{DeploymentGroup, TrafficShiftPolicy};
pub use error::{Result, TopologyError, ValidationError, ValidationErrorKind};
pub use events::{ExecutionDetail, ExecutionState, PipelineExecutionEvent};
pub use observability::{
    AlertRule, Dashboard, EventPattern, GraphView, MessageTemplate, Metric,
    ObservabilityOverlay, Statistic, Subscription, Topic, Widget,
};
pub use permissions::{Effect, PolicyDocument, PolicyStatement};
pub use pipeline::{ExecutionMode, Pipeline, PipelineType};
pub use source::{ManagedRepository, ProviderType, SourceConnection, SourceTrigger};
pub use stage::Stage;
pub use topology::{StringParameter, Topology};
