//! Immutable artifact snapshots produced during an execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use topology_core::ArtifactName;

use crate::error::{EngineError, Result};

/// Content of a produced artifact. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSnapshot {
    pub name: ArtifactName,
    pub producer: String,
    pub payload: Value,
    pub produced_at: DateTime<Utc>,
}

/// Artifacts produced so far in one execution.
///
/// Consumers receive clones of the same [`Arc`], so fan-out never copies or
/// diverges.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    snapshots: BTreeMap<ArtifactName, Arc<ArtifactSnapshot>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot`. An artifact can only be produced once.
    pub fn put(&mut self, snapshot: ArtifactSnapshot) -> Result<Arc<ArtifactSnapshot>> {
        if let Some(existing) = self.snapshots.get(&snapshot.name) {
            return Err(EngineError::ArtifactExists {
                artifact: snapshot.name.to_string(),
                producer: existing.producer.clone(),
            });
        }
        let snapshot = Arc::new(snapshot);
        self.snapshots
            .insert(snapshot.name.clone(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn get(&self, name: &ArtifactName) -> Option<Arc<ArtifactSnapshot>> {
        self.snapshots.get(name).cloned()
    }

    /// Snapshots for every name in `names`, failing on the first one missing.
    pub fn resolve<'a, I>(&self, names: I) -> Result<Vec<Arc<ArtifactSnapshot>>>
    where
        I: IntoIterator<Item = &'a ArtifactName>,
    {
        names
            .into_iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| EngineError::MissingArtifact(name.to_string()))
            })
            .collect()
    }

    pub fn names(&self) -> Vec<ArtifactName> {
        self.snapshots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(name: &str, producer: &str) -> ArtifactSnapshot {
        ArtifactSnapshot {
            name: ArtifactName::new(name),
            producer: producer.to_string(),
            payload: json!({ "revision": "abc123" }),
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn test_consumers_share_one_snapshot() {
        let mut store = ArtifactStore::new();
        store.put(snapshot("source_output", "GitHub")).expect("put");

        let name = ArtifactName::source_output();
        let a = store.get(&name).expect("a");
        let b = store.get(&name).expect("b");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_second_producer_rejected() {
        let mut store = ArtifactStore::new();
        store.put(snapshot("source_output", "GitHub")).expect("put");
        let err = store.put(snapshot("source_output", "Other")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ArtifactExists { ref producer, .. } if producer == "GitHub"
        ));
    }

    #[test]
    fn test_resolve_reports_missing() {
        let store = ArtifactStore::new();
        let names = [ArtifactName::docker_build_output()];
        let err = store.resolve(&names).unwrap_err();
        assert_eq!(err.to_string(), "artifact 'docker_build_output' has not been produced");
    }
}
