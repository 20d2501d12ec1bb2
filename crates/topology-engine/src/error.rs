//! Engine errors.

use topology_core::TopologyError;

use crate::release::ReleaseError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error("artifact '{0}' has not been produced")]
    MissingArtifact(String),

    #[error("artifact '{artifact}' was already produced by '{producer}'")]
    ArtifactExists { artifact: String, producer: String },

    #[error("no notification topic named '{0}'")]
    UnknownTopic(String),

    #[error("publishing to topic '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
