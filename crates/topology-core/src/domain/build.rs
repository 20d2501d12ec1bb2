//! Build projects run by build actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::permissions::{PolicyDocument, PolicyStatement};

/// Curated build image.
pub const STANDARD_5_0: &str = "aws/codebuild/standard:5.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeType {
    Small,
    #[default]
    Medium,
    Large,
}

impl ComputeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeType::Small => "BUILD_GENERAL1_SMALL",
            ComputeType::Medium => "BUILD_GENERAL1_MEDIUM",
            ComputeType::Large => "BUILD_GENERAL1_LARGE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvVarKind {
    #[default]
    Plaintext,
    ParameterStore,
}

/// Environment variable baked into the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub kind: EnvVarKind,
    pub value: String,
}

impl EnvVar {
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self {
            kind: EnvVarKind::Plaintext,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub image: String,
    pub compute_type: ComputeType,
    /// Required to run a Docker daemon inside the build.
    pub privileged: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, EnvVar>,
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self {
            image: STANDARD_5_0.to_string(),
            compute_type: ComputeType::default(),
            privileged: false,
            variables: BTreeMap::new(),
        }
    }
}

/// A build project whose commands live in an external buildspec file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProject {
    pub id: String,
    pub buildspec: PathBuf,
    pub environment: BuildEnvironment,
    /// Statements added to the project's execution role.
    #[serde(default)]
    pub policy: Vec<PolicyStatement>,
}

impl BuildProject {
    pub fn new(id: impl Into<String>, buildspec: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            buildspec: buildspec.into(),
            environment: BuildEnvironment::default(),
            policy: Vec::new(),
        }
    }

    pub fn with_environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, var: EnvVar) -> Self {
        self.environment.variables.insert(name.into(), var);
        self
    }

    /// Append a statement to the execution role policy.
    pub fn add_to_role_policy(&mut self, statement: PolicyStatement) {
        self.policy.push(statement);
    }

    pub fn role_policy(&self) -> PolicyDocument {
        PolicyDocument::new(self.policy.clone())
    }
}
