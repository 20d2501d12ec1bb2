//! The full provisioning unit: pipeline plus everything it references.

use serde::{Deserialize, Serialize};

use super::build::BuildProject;
use super::deployment::DeploymentGroup;
use super::observability::ObservabilityOverlay;
use super::pipeline::Pipeline;
use super::source::{ManagedRepository, SourceConnection};

/// Plain string parameter stored in the provider's parameter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringParameter {
    pub id: String,
    pub parameter_name: String,
    pub value: String,
}

/// Everything declared at provisioning time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub pipeline: Pipeline,
    pub projects: Vec<BuildProject>,
    pub deployment_groups: Vec<DeploymentGroup>,
    pub connection: Option<SourceConnection>,
    pub repository: Option<ManagedRepository>,
    #[serde(default)]
    pub parameters: Vec<StringParameter>,
    pub observability: Option<ObservabilityOverlay>,
}

impl Topology {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            projects: Vec::new(),
            deployment_groups: Vec::new(),
            connection: None,
            repository: None,
            parameters: Vec::new(),
            observability: None,
        }
    }

    pub fn project(&self, id: &str) -> Option<&BuildProject> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn deployment_group(&self, name: &str) -> Option<&DeploymentGroup> {
        self.deployment_groups.iter().find(|g| g.name == name)
    }
}
