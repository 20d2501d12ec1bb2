//! Named artifact handoffs between actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Artifact produced by the source action.
pub const SOURCE_OUTPUT: &str = "source_output";

/// Artifact produced by the code-quality build.
pub const UNIT_TEST_OUTPUT: &str = "unit_test_output";

/// Artifact produced by the Docker image build.
pub const DOCKER_BUILD_OUTPUT: &str = "docker_build_output";

/// Name of an artifact threaded between actions.
///
/// Artifacts are immutable once produced; every consumer sees the same
/// snapshot. A name identifies exactly one producing action within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The initial source snapshot.
    pub fn source_output() -> Self {
        Self::new(SOURCE_OUTPUT)
    }

    pub fn unit_test_output() -> Self {
        Self::new(UNIT_TEST_OUTPUT)
    }

    pub fn docker_build_output() -> Self {
        Self::new(DOCKER_BUILD_OUTPUT)
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_names() {
        assert_eq!(ArtifactName::source_output().as_str(), "source_output");
        assert_eq!(ArtifactName::docker_build_output().to_string(), "docker_build_output");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&ArtifactName::unit_test_output()).expect("serialize");
        assert_eq!(json, "\"unit_test_output\"");
    }
}
