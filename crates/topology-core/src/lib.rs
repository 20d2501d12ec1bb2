//! Declarative CI/CD pipeline topologies.
//!
//! Models a pipeline's stages, actions and artifact handoffs together with the
//! build projects, permission grants, blue/green deployment group and optional
//! observability overlay it references. Topologies are validated as a whole
//! and synthesized into a provisioning template.

pub mod blueprint;
pub mod config;
pub mod domain;
pub mod graph;
pub mod metrics;
pub mod obs;
pub mod telemetry;
pub mod template;
pub mod validation;

pub use blueprint::WorkshopBlueprint;
pub use config::{ProductionConfig, ProvisioningConfig, SignerConfig, SourceConfig};
pub use domain::{
    Action, ActionCategory, ActionKind, AlertRule, ArtifactName, BuildProject, DeploymentGroup,
    ExecutionDetail, ExecutionMode, ExecutionState, ObservabilityOverlay, Pipeline,
    PipelineExecutionEvent, PolicyStatement, Result, SourceTrigger, Stage, Topology,
    TopologyError, TrafficShiftPolicy, ValidationError, ValidationErrorKind,
};
pub use graph::{ArtifactEdge, ArtifactGraph, GraphError};
pub use template::{synthesize, Template};
pub use validation::{validate, TopologyValidator, ValidationReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
