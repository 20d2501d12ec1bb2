//! Stages: named, sequential phases of a pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::action::{Action, ActionCategory};

/// A named phase gating pipeline progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Actions grouped by run-order, ascending.
    ///
    /// Actions within a group run concurrently; groups run one after another.
    /// Declaration order is kept inside each group.
    pub fn run_order_groups(&self) -> Vec<(u32, Vec<&Action>)> {
        let mut groups: BTreeMap<u32, Vec<&Action>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups.into_iter().collect()
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Whether every action in this stage is a source action.
    pub fn is_source_stage(&self) -> bool {
        !self.actions.is_empty()
            && self
                .actions
                .iter()
                .all(|a| a.category() == ActionCategory::Source)
    }
}
