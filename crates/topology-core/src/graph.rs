//! Artifact dependency graph over pipeline actions.
//!
//! Nodes are actions; an edge `A → B` means "B consumes an artifact A
//! produces". The graph is built straight from a [`Pipeline`] and is used by
//! the validator (single producer, acyclicity, reachability) and by the CLI
//! to print handoffs.
//!
//! Ordering is computed with Kahn's algorithm over `BTreeMap`s so results are
//! deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use thiserror::Error;

use crate::domain::{ActionCategory, ArtifactName, Pipeline};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Artifact handoffs loop back on themselves.
    #[error("artifact cycle detected involving actions: {actions:?}")]
    Cycle { actions: Vec<String> },

    #[error("action not found in graph: {0}")]
    UnknownAction(String),
}

/// Where an action sits in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionNode {
    pub name: String,
    pub stage: String,
    pub stage_index: usize,
    pub run_order: u32,
    pub category: ActionCategory,
}

/// One artifact handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEdge {
    pub artifact: ArtifactName,
    pub producer: String,
    pub consumer: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactGraph {
    nodes: BTreeMap<String, ActionNode>,
    /// Every declared producer per artifact (more than one is an error).
    producers: BTreeMap<ArtifactName, Vec<String>>,
    consumers: BTreeMap<ArtifactName, Vec<String>>,
    /// `producer → {consumer, ...}`
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// `consumer → {producer, ...}`
    upstream: BTreeMap<String, BTreeSet<String>>,
}

impl ArtifactGraph {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let mut graph = Self::default();

        for (stage_index, stage) in pipeline.stages.iter().enumerate() {
            for action in &stage.actions {
                graph.nodes.insert(
                    action.name.clone(),
                    ActionNode {
                        name: action.name.clone(),
                        stage: stage.name.clone(),
                        stage_index,
                        run_order: action.run_order,
                        category: action.category(),
                    },
                );
                graph.downstream.entry(action.name.clone()).or_default();
                graph.upstream.entry(action.name.clone()).or_default();

                for output in action.outputs() {
                    graph
                        .producers
                        .entry(output.clone())
                        .or_default()
                        .push(action.name.clone());
                }
                for input in action.inputs() {
                    graph
                        .consumers
                        .entry(input.clone())
                        .or_default()
                        .push(action.name.clone());
                }
            }
        }

        let mut edges = Vec::new();
        for (artifact, consumers) in &graph.consumers {
            if let Some(producers) = graph.producers.get(artifact) {
                for producer in producers {
                    for consumer in consumers {
                        edges.push((producer.clone(), consumer.clone()));
                    }
                }
            }
        }
        for (producer, consumer) in edges {
            graph
                .downstream
                .entry(producer.clone())
                .or_default()
                .insert(consumer.clone());
            graph.upstream.entry(consumer).or_default().insert(producer);
        }

        graph
    }

    pub fn node(&self, action: &str) -> Option<&ActionNode> {
        self.nodes.get(action)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every artifact that is produced or consumed.
    pub fn artifacts(&self) -> BTreeSet<&ArtifactName> {
        self.producers.keys().chain(self.consumers.keys()).collect()
    }

    /// The producing action, when exactly one exists.
    pub fn producer(&self, artifact: &ArtifactName) -> Option<&str> {
        match self.producers.get(artifact).map(Vec::as_slice) {
            Some([only]) => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn consumers(&self, artifact: &ArtifactName) -> Vec<&str> {
        self.consumers
            .get(artifact)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Artifacts declared as output by more than one action.
    pub fn duplicate_producers(&self) -> Vec<(&ArtifactName, &[String])> {
        self.producers
            .iter()
            .filter(|(_, producers)| producers.len() > 1)
            .map(|(artifact, producers)| (artifact, producers.as_slice()))
            .collect()
    }

    /// `(consumer, artifact)` pairs whose artifact nobody produces.
    pub fn unresolved_inputs(&self) -> Vec<(&str, &ArtifactName)> {
        let mut unresolved = Vec::new();
        for (artifact, consumers) in &self.consumers {
            if !self.producers.contains_key(artifact) {
                for consumer in consumers {
                    unresolved.push((consumer.as_str(), artifact));
                }
            }
        }
        unresolved
    }

    /// Artifacts produced but never consumed.
    pub fn unconsumed(&self) -> Vec<&ArtifactName> {
        self.producers
            .keys()
            .filter(|a| !self.consumers.contains_key(*a))
            .collect()
    }

    pub fn edges(&self) -> Vec<ArtifactEdge> {
        let mut edges = Vec::new();
        for (artifact, consumers) in &self.consumers {
            for producer in self.producers.get(artifact).into_iter().flatten() {
                for consumer in consumers {
                    edges.push(ArtifactEdge {
                        artifact: artifact.clone(),
                        producer: producer.clone(),
                        consumer: consumer.clone(),
                    });
                }
            }
        }
        edges
    }

    /// Actions ordered so every producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), self.upstream.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            for dependent in self.downstream.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let done: BTreeSet<&str> = sorted.iter().map(String::as_str).collect();
            return Err(GraphError::Cycle {
                actions: self
                    .nodes
                    .keys()
                    .filter(|id| !done.contains(id.as_str()))
                    .cloned()
                    .collect(),
            });
        }
        Ok(sorted)
    }

    /// All transitive producers feeding `action`.
    pub fn upstream_of(&self, action: &str) -> Result<BTreeSet<String>, GraphError> {
        if !self.nodes.contains_key(action) {
            return Err(GraphError::UnknownAction(action.to_string()));
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([action.to_string()]);
        while let Some(current) = queue.pop_front() {
            for producer in self.upstream.get(&current).into_iter().flatten() {
                if visited.insert(producer.clone()) {
                    queue.push_back(producer.clone());
                }
            }
        }
        Ok(visited)
    }

    /// Whether `artifact` flows into `action`, directly or through
    /// intermediate artifacts.
    pub fn reaches(&self, artifact: &ArtifactName, action: &str) -> bool {
        let consumes = |name: &str| self.consumers(artifact).contains(&name);
        if consumes(action) {
            return true;
        }
        self.upstream_of(action)
            .map(|upstream| upstream.iter().any(|a| consumes(a.as_str())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ProviderType, SourceTrigger};

    fn source() -> Action {
        Action::source(
            "GitHub",
            SourceTrigger::Connection {
                connection_name: "conn".to_string(),
                provider_type: ProviderType::GitHub,
                owner: "o".to_string(),
                repo: "r".to_string(),
                branch: "main".to_string(),
                trigger_on_push: true,
                connection_arn: None,
            },
            ArtifactName::source_output(),
        )
    }

    fn pipeline() -> Pipeline {
        let mut p = Pipeline::new("CICD_Pipeline");
        p.add_stage("Source", vec![source()]).expect("stage");
        p.add_stage(
            "Code-Quality-Testing",
            vec![Action::build(
                "Unit-Test",
                "CodeBuild",
                ArtifactName::source_output(),
                vec![ArtifactName::unit_test_output()],
            )],
        )
        .expect("stage");
        p.add_stage(
            "Docker-Push-ECR",
            vec![Action::build(
                "Docker-Build",
                "DockerBuild",
                ArtifactName::source_output(),
                vec![ArtifactName::docker_build_output()],
            )],
        )
        .expect("stage");
        p.add_stage(
            "Deploy-Test",
            vec![Action::ecs_deploy(
                "Deploy-Fargate-Test",
                "test-service",
                ArtifactName::docker_build_output(),
            )],
        )
        .expect("stage");
        p
    }

    #[test]
    fn test_source_output_fans_out() {
        let graph = ArtifactGraph::from_pipeline(&pipeline());
        assert_eq!(graph.producer(&ArtifactName::source_output()), Some("GitHub"));
        assert_eq!(
            graph.consumers(&ArtifactName::source_output()),
            vec!["Unit-Test", "Docker-Build"]
        );
        assert_eq!(
            graph.consumers(&ArtifactName::docker_build_output()),
            vec!["Deploy-Fargate-Test"]
        );
    }

    #[test]
    fn test_topological_order_respects_handoffs() {
        let graph = ArtifactGraph::from_pipeline(&pipeline());
        let order = graph.topological_order().expect("acyclic");
        let pos = |name: &str| order.iter().position(|a| a == name).expect("present");
        assert!(pos("GitHub") < pos("Docker-Build"));
        assert!(pos("Docker-Build") < pos("Deploy-Fargate-Test"));
    }

    #[test]
    fn test_reaches_through_intermediate_artifact() {
        let graph = ArtifactGraph::from_pipeline(&pipeline());
        assert!(graph.reaches(&ArtifactName::source_output(), "Deploy-Fargate-Test"));
        assert!(graph.reaches(&ArtifactName::source_output(), "Unit-Test"));
        assert!(!graph.reaches(&ArtifactName::unit_test_output(), "Deploy-Fargate-Test"));
    }

    #[test]
    fn test_unconsumed_and_unresolved() {
        let mut p = pipeline();
        p.add_stage(
            "Orphan",
            vec![Action::ecs_deploy("Deploy-Ghost", "svc", ArtifactName::new("ghost"))],
        )
        .expect("stage");
        let graph = ArtifactGraph::from_pipeline(&p);
        assert_eq!(graph.unconsumed(), vec![&ArtifactName::unit_test_output()]);
        assert_eq!(
            graph.unresolved_inputs(),
            vec![("Deploy-Ghost", &ArtifactName::new("ghost"))]
        );
    }

    #[test]
    fn test_duplicate_producers_detected() {
        let mut p = pipeline();
        p.add_stage(
            "Rebuild",
            vec![Action::build(
                "Docker-Build-Again",
                "DockerBuild",
                ArtifactName::source_output(),
                vec![ArtifactName::docker_build_output()],
            )],
        )
        .expect("stage");
        let graph = ArtifactGraph::from_pipeline(&p);
        let dups = graph.duplicate_producers();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].0, &ArtifactName::docker_build_output());
        assert!(graph.producer(&ArtifactName::docker_build_output()).is_none());
    }

    #[test]
    fn test_cycle_detected() {
        let mut p = Pipeline::new("loop");
        p.add_stage(
            "Loop",
            vec![
                Action::build(
                    "A",
                    "p",
                    ArtifactName::new("b_out"),
                    vec![ArtifactName::new("a_out")],
                ),
                Action::build(
                    "B",
                    "p",
                    ArtifactName::new("a_out"),
                    vec![ArtifactName::new("b_out")],
                ),
            ],
        )
        .expect("stage");
        let graph = ArtifactGraph::from_pipeline(&p);
        let err = graph.topological_order().unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                actions: vec!["A".to_string(), "B".to_string()]
            }
        );
    }

    #[test]
    fn test_upstream_of_unknown_action() {
        let graph = ArtifactGraph::from_pipeline(&pipeline());
        assert!(matches!(
            graph.upstream_of("nope"),
            Err(GraphError::UnknownAction(_))
        ));
    }
}
