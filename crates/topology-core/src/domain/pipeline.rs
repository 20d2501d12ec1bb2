//! Pipeline: the ordered stage sequence.

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::error::{Result, TopologyError};
use super::stage::Stage;

/// Pipeline generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineType {
    V1,
    #[default]
    V2,
}

/// How concurrent executions of the same pipeline are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    /// Executions wait and run one at a time in arrival order.
    #[default]
    Queued,
    /// A newer execution overtakes an older one waiting between stages.
    Superseded,
    /// Executions run independently of each other.
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Queued => "QUEUED",
            ExecutionMode::Superseded => "SUPERSEDED",
            ExecutionMode::Parallel => "PARALLEL",
        }
    }
}

/// Top-level ordered stage sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub pipeline_type: PipelineType,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub cross_account_keys: bool,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline_type: PipelineType::default(),
            execution_mode: ExecutionMode::default(),
            cross_account_keys: false,
            stages: Vec::new(),
        }
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Append a stage. Stage names are unique within a pipeline.
    pub fn add_stage(&mut self, name: impl Into<String>, actions: Vec<Action>) -> Result<&Stage> {
        let name = name.into();
        if self.stage(&name).is_some() {
            return Err(TopologyError::DuplicateStage(name));
        }
        self.stages.push(Stage::new(name, actions));
        let index = self.stages.len() - 1;
        Ok(&self.stages[index])
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Position of a stage in execution order.
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Every action paired with its owning stage, in execution order.
    pub fn actions(&self) -> impl Iterator<Item = (&Stage, &Action)> {
        self.stages
            .iter()
            .flat_map(|stage| stage.actions.iter().map(move |action| (stage, action)))
    }

    pub fn find_action(&self, name: &str) -> Option<(&Stage, &Action)> {
        self.actions().find(|(_, a)| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::ArtifactName;

    #[test]
    fn test_defaults() {
        let pipeline = Pipeline::new("CICD_Pipeline");
        assert_eq!(pipeline.pipeline_type, PipelineType::V2);
        assert_eq!(pipeline.execution_mode, ExecutionMode::Queued);
        assert!(!pipeline.cross_account_keys);
    }

    #[test]
    fn test_add_stage_keeps_declaration_order() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .add_stage("First", vec![Action::manual_approval("a")])
            .expect("first");
        pipeline
            .add_stage("Second", vec![Action::manual_approval("b")])
            .expect("second");
        assert_eq!(pipeline.stage_names(), vec!["First", "Second"]);
        assert_eq!(pipeline.stage_index("Second"), Some(1));
    }

    #[test]
    fn test_add_stage_rejects_duplicate_name() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .add_stage("Build", vec![Action::manual_approval("a")])
            .expect("first");
        let err = pipeline
            .add_stage("Build", vec![Action::manual_approval("b")])
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateStage(ref n) if n == "Build"));
        assert_eq!(pipeline.stages.len(), 1);
    }

    #[test]
    fn test_find_action_reports_owning_stage() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .add_stage(
                "Deploy-Test",
                vec![Action::ecs_deploy(
                    "Deploy-Fargate-Test",
                    "svc",
                    ArtifactName::docker_build_output(),
                )],
            )
            .expect("stage");
        let (stage, action) = pipeline.find_action("Deploy-Fargate-Test").expect("found");
        assert_eq!(stage.name, "Deploy-Test");
        assert_eq!(action.inputs(), vec![&ArtifactName::docker_build_output()]);
    }

    #[test]
    fn test_execution_mode_serde() {
        let json = serde_json::to_string(&ExecutionMode::Queued).expect("serialize");
        assert_eq!(json, "\"QUEUED\"");
    }
}
