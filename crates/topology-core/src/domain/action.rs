//! Actions: single units of work delegated to an external service.

use serde::{Deserialize, Serialize};

use super::artifact::ArtifactName;
use super::source::SourceTrigger;

/// Default run-order for an action that does not declare one.
pub const DEFAULT_RUN_ORDER: u32 = 1;

/// Broad category of an action, as seen by the stage sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Source,
    Build,
    Deploy,
    Approval,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Source => "Source",
            ActionCategory::Build => "Build",
            ActionCategory::Deploy => "Deploy",
            ActionCategory::Approval => "Approval",
        }
    }
}

/// Fetches a source snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAction {
    pub trigger: SourceTrigger,
    pub output: ArtifactName,
}

/// Runs a build project against an input artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAction {
    /// Id of the [`BuildProject`](super::build::BuildProject) to run.
    pub project: String,
    pub input: ArtifactName,
    pub outputs: Vec<ArtifactName>,
}

/// Rolling deploy of an image definition to a container service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsDeployAction {
    pub service: String,
    pub input: ArtifactName,
}

/// Blue/green deploy through a deployment group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueGreenDeployAction {
    /// Name of the [`DeploymentGroup`](super::deployment::DeploymentGroup).
    pub deployment_group: String,
    pub app_spec_template_input: ArtifactName,
    pub task_definition_template_input: ArtifactName,
}

/// Human approval gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub notify_topic: Option<String>,
    pub comment: Option<String>,
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Source(SourceAction),
    Build(BuildAction),
    EcsDeploy(EcsDeployAction),
    BlueGreenDeploy(BlueGreenDeployAction),
    ManualApproval(ApprovalAction),
}

impl ActionKind {
    pub fn category(&self) -> ActionCategory {
        match self {
            ActionKind::Source(_) => ActionCategory::Source,
            ActionKind::Build(_) => ActionCategory::Build,
            ActionKind::EcsDeploy(_) | ActionKind::BlueGreenDeploy(_) => ActionCategory::Deploy,
            ActionKind::ManualApproval(_) => ActionCategory::Approval,
        }
    }

    /// Provider identifier of the action type.
    pub fn provider(&self) -> &'static str {
        match self {
            ActionKind::Source(a) => match a.trigger {
                SourceTrigger::Connection { .. } => "CodeStarSourceConnection",
                SourceTrigger::ManagedRepository { .. } => "CodeCommit",
            },
            ActionKind::Build(_) => "CodeBuild",
            ActionKind::EcsDeploy(_) => "ECS",
            ActionKind::BlueGreenDeploy(_) => "CodeDeployToECS",
            ActionKind::ManualApproval(_) => "Manual",
        }
    }
}

/// A single delegated unit of work within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default = "default_run_order")]
    pub run_order: u32,
    #[serde(flatten)]
    pub kind: ActionKind,
}

fn default_run_order() -> u32 {
    DEFAULT_RUN_ORDER
}

impl Action {
    fn with_kind(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            run_order: DEFAULT_RUN_ORDER,
            kind,
        }
    }

    pub fn source(name: impl Into<String>, trigger: SourceTrigger, output: ArtifactName) -> Self {
        Self::with_kind(name, ActionKind::Source(SourceAction { trigger, output }))
    }

    pub fn build(
        name: impl Into<String>,
        project: impl Into<String>,
        input: ArtifactName,
        outputs: Vec<ArtifactName>,
    ) -> Self {
        Self::with_kind(
            name,
            ActionKind::Build(BuildAction {
                project: project.into(),
                input,
                outputs,
            }),
        )
    }

    pub fn ecs_deploy(
        name: impl Into<String>,
        service: impl Into<String>,
        input: ArtifactName,
    ) -> Self {
        Self::with_kind(
            name,
            ActionKind::EcsDeploy(EcsDeployAction {
                service: service.into(),
                input,
            }),
        )
    }

    /// Blue/green deploy where both templates come from the same artifact.
    pub fn blue_green_deploy(
        name: impl Into<String>,
        deployment_group: impl Into<String>,
        templates: ArtifactName,
    ) -> Self {
        Self::with_kind(
            name,
            ActionKind::BlueGreenDeploy(BlueGreenDeployAction {
                deployment_group: deployment_group.into(),
                app_spec_template_input: templates.clone(),
                task_definition_template_input: templates,
            }),
        )
    }

    pub fn manual_approval(name: impl Into<String>) -> Self {
        Self::with_kind(name, ActionKind::ManualApproval(ApprovalAction::default()))
    }

    /// Set an explicit run-order.
    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn category(&self) -> ActionCategory {
        self.kind.category()
    }

    /// Distinct input artifacts, in declaration order.
    pub fn inputs(&self) -> Vec<&ArtifactName> {
        match &self.kind {
            ActionKind::Source(_) | ActionKind::ManualApproval(_) => Vec::new(),
            ActionKind::Build(a) => vec![&a.input],
            ActionKind::EcsDeploy(a) => vec![&a.input],
            ActionKind::BlueGreenDeploy(a) => {
                let mut inputs = vec![&a.app_spec_template_input];
                if a.task_definition_template_input != a.app_spec_template_input {
                    inputs.push(&a.task_definition_template_input);
                }
                inputs
            }
        }
    }

    pub fn outputs(&self) -> Vec<&ArtifactName> {
        match &self.kind {
            ActionKind::Source(a) => vec![&a.output],
            ActionKind::Build(a) => a.outputs.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Deployment group targeted by this action, if any.
    pub fn deployment_group(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::BlueGreenDeploy(a) => Some(&a.deployment_group),
            _ => None,
        }
    }
}
