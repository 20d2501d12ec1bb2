//! Definition-time validation of a [`Topology`].
//!
//! The validator collects every problem instead of stopping at the first one,
//! so a single run reports everything the provider would reject. Problems
//! that would not block provisioning (an artifact nobody consumes, an unused
//! deployment group) are reported as warnings.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::domain::observability::DASHBOARD_GRID_WIDTH;
use crate::domain::{
    Action, ActionCategory, ActionKind, Pipeline, Result, Stage, SourceTrigger, Subscription,
    Topology, TopologyError, ValidationError, ValidationErrorKind, Widget,
};
use crate::graph::{ArtifactGraph, GraphError};

/// Provider rule for pipeline, stage and action names.
pub const NAME_PATTERN: &str = r"^[A-Za-z0-9.@_-]{1,100}$";

/// Highest run-order the provider accepts.
pub const MAX_RUN_ORDER: u32 = 999;

/// Email placeholder shipped in sample configuration.
pub const PLACEHOLDER_EMAIL: &str = "YOUR_EMAIL_ADDRESS@your_provider.com";

fn name_rule() -> Option<&'static Regex> {
    static RULE: OnceLock<Option<Regex>> = OnceLock::new();
    RULE.get_or_init(|| Regex::new(NAME_PATTERN).ok()).as_ref()
}

/// Whether `name` is acceptable as a pipeline, stage or action name.
pub fn is_valid_name(name: &str) -> bool {
    match name_rule() {
        Some(rule) => rule.is_match(name),
        None => !name.is_empty(),
    }
}

fn stage_location(stage: &Stage) -> String {
    format!("stages[{}]", stage.name)
}

fn action_location(stage: &Stage, action: &Action) -> String {
    format!("stages[{}].actions[{}]", stage.name, action.name)
}

/// Outcome of validating a topology.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_kind(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Warnings on success, every error otherwise.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(TopologyError::Invalid(self.errors))
        }
    }
}

/// Validator for topology definitions.
#[derive(Debug, Default)]
pub struct TopologyValidator {
    report: ValidationReport,
}

impl TopologyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, topology: &Topology) -> ValidationReport {
        let pipeline = &topology.pipeline;

        self.validate_pipeline(pipeline);
        self.validate_stages(pipeline);
        self.validate_artifacts(pipeline);
        self.validate_references(topology);
        self.validate_release_gating(topology);
        self.validate_source(topology);
        self.validate_deployment_groups(topology);
        self.validate_projects(topology);
        self.validate_observability(topology);

        debug!(
            pipeline = %pipeline.name,
            errors = self.report.errors.len(),
            warnings = self.report.warnings.len(),
            "topology validated"
        );
        self.report
    }

    fn add_error(&mut self, error: ValidationError) {
        self.report.errors.push(error);
    }

    fn add_warning(&mut self, warning: impl Into<String>) {
        self.report.warnings.push(warning.into());
    }

    fn validate_pipeline(&mut self, pipeline: &Pipeline) {
        if pipeline.name.is_empty() {
            self.add_error(ValidationError::missing_field("pipeline", "name"));
        } else if !is_valid_name(&pipeline.name) {
            self.add_error(ValidationError::invalid_value(
                "pipeline",
                format!("name '{}' does not match {}", pipeline.name, NAME_PATTERN),
            ));
        }

        if pipeline.stages.len() < 2 {
            self.add_error(ValidationError::invalid_value(
                "pipeline.stages",
                format!(
                    "a pipeline needs at least 2 stages, found {}",
                    pipeline.stages.len()
                ),
            ));
        }
    }

    fn validate_stages(&mut self, pipeline: &Pipeline) {
        let mut stage_names = HashSet::new();
        let mut action_names = HashSet::new();

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let location = stage_location(stage);

            if !stage_names.insert(stage.name.as_str()) {
                self.add_error(ValidationError::duplicate_name(&location, &stage.name));
            }
            if !is_valid_name(&stage.name) {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    format!("stage name '{}' does not match {}", stage.name, NAME_PATTERN),
                ));
            }
            if stage.actions.is_empty() {
                self.add_error(ValidationError::missing_field(&location, "actions"));
                continue;
            }

            if index == 0 && !stage.is_source_stage() {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::InvalidOrdering,
                    &location,
                    "the first stage must contain only source actions",
                ));
            }

            for action in &stage.actions {
                let location = action_location(stage, action);

                if !action_names.insert(action.name.as_str()) {
                    self.add_error(ValidationError::duplicate_name(&location, &action.name));
                }
                if !is_valid_name(&action.name) {
                    self.add_error(ValidationError::invalid_value(
                        &location,
                        format!("action name '{}' does not match {}", action.name, NAME_PATTERN),
                    ));
                }
                if action.run_order == 0 || action.run_order > MAX_RUN_ORDER {
                    self.add_error(ValidationError::invalid_value(
                        &location,
                        format!(
                            "run_order must be between 1 and {}, got {}",
                            MAX_RUN_ORDER, action.run_order
                        ),
                    ));
                }
                if index > 0 && action.category() == ActionCategory::Source {
                    self.add_error(ValidationError::new(
                        ValidationErrorKind::InvalidOrdering,
                        &location,
                        "source actions are only allowed in the first stage",
                    ));
                }
            }
        }
    }

    fn validate_artifacts(&mut self, pipeline: &Pipeline) {
        let graph = ArtifactGraph::from_pipeline(pipeline);

        for (artifact, producers) in graph.duplicate_producers() {
            self.add_error(ValidationError::new(
                ValidationErrorKind::DuplicateProducer,
                format!("artifacts[{}]", artifact),
                format!("produced by more than one action: {}", producers.join(", ")),
            ));
        }

        for (consumer, artifact) in graph.unresolved_inputs() {
            self.add_error(ValidationError::new(
                ValidationErrorKind::UnresolvedArtifact,
                format!("actions[{}]", consumer),
                format!("input artifact '{}' is never produced", artifact),
            ));
        }

        // Inputs must come from a strictly earlier stage.
        for (stage_index, stage) in pipeline.stages.iter().enumerate() {
            for action in &stage.actions {
                for input in action.inputs() {
                    let Some(producer) = graph.producer(input) else {
                        continue;
                    };
                    let Some(node) = graph.node(producer) else {
                        continue;
                    };
                    if node.stage_index >= stage_index {
                        self.add_error(ValidationError::new(
                            ValidationErrorKind::InvalidOrdering,
                            action_location(stage, action),
                            format!(
                                "input artifact '{}' is produced by '{}' in stage '{}', which does not run earlier",
                                input, producer, node.stage
                            ),
                        ));
                    }
                }
            }
        }

        if let Err(GraphError::Cycle { actions }) = graph.topological_order() {
            self.add_error(ValidationError::new(
                ValidationErrorKind::CycleDetected,
                "artifacts",
                format!("artifact handoffs form a cycle through: {}", actions.join(", ")),
            ));
        }

        for artifact in graph.unconsumed() {
            self.add_warning(format!("artifact '{}' is produced but never consumed", artifact));
        }
    }

    fn validate_references(&mut self, topology: &Topology) {
        for (stage, action) in topology.pipeline.actions() {
            let location = action_location(stage, action);
            match &action.kind {
                ActionKind::Build(build) => {
                    if topology.project(&build.project).is_none() {
                        self.add_error(ValidationError::invalid_reference(
                            &location,
                            "build project",
                            &build.project,
                        ));
                    }
                }
                ActionKind::BlueGreenDeploy(deploy) => {
                    if topology.deployment_group(&deploy.deployment_group).is_none() {
                        self.add_error(ValidationError::invalid_reference(
                            &location,
                            "deployment group",
                            &deploy.deployment_group,
                        ));
                    }
                }
                ActionKind::EcsDeploy(deploy) => {
                    if deploy.service.is_empty() {
                        self.add_error(ValidationError::missing_field(&location, "service"));
                    }
                }
                ActionKind::ManualApproval(approval) => {
                    if let Some(topic) = &approval.notify_topic {
                        let declared = topology
                            .observability
                            .as_ref()
                            .is_some_and(|o| &o.topic.name == topic);
                        if !declared {
                            self.add_error(ValidationError::invalid_reference(
                                &location, "topic", topic,
                            ));
                        }
                    }
                }
                ActionKind::Source(_) => {}
            }
        }
    }

    /// Exactly one deploy action per deployment group, gated by an approval
    /// with a strictly lower run-order in the same stage.
    fn validate_release_gating(&mut self, topology: &Topology) {
        let mut targeting: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for stage in &topology.pipeline.stages {
            for action in &stage.actions {
                let Some(group) = action.deployment_group() else {
                    continue;
                };
                targeting
                    .entry(group)
                    .or_default()
                    .push(action_location(stage, action));

                let gated = stage.actions.iter().any(|other| {
                    other.category() == ActionCategory::Approval
                        && other.run_order < action.run_order
                });
                if !gated {
                    self.add_error(ValidationError::new(
                        ValidationErrorKind::InvalidOrdering,
                        action_location(stage, action),
                        "blue/green deploy must be preceded in its stage by a manual approval with a lower run_order",
                    ));
                }
            }
        }

        for (group, locations) in &targeting {
            if locations.len() > 1 {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::DuplicateName,
                    format!("deployment_groups[{}]", group),
                    format!(
                        "targeted by {} deploy actions, expected exactly one: {}",
                        locations.len(),
                        locations.join(", ")
                    ),
                ));
            }
        }

        for group in &topology.deployment_groups {
            if !targeting.contains_key(group.name.as_str()) {
                self.add_warning(format!(
                    "deployment group '{}' is not targeted by any deploy action",
                    group.name
                ));
            }
        }
    }

    fn validate_source(&mut self, topology: &Topology) {
        for (stage, action) in topology.pipeline.actions() {
            let ActionKind::Source(source) = &action.kind else {
                continue;
            };
            let location = action_location(stage, action);

            match &source.trigger {
                SourceTrigger::Connection {
                    connection_name,
                    owner,
                    repo,
                    branch,
                    connection_arn,
                    ..
                } => {
                    for (field, value) in [("owner", owner), ("repo", repo), ("branch", branch)] {
                        if value.is_empty() {
                            self.add_error(ValidationError::missing_field(&location, field));
                        }
                    }
                    let declared = topology
                        .connection
                        .as_ref()
                        .is_some_and(|c| &c.connection_name == connection_name);
                    if connection_arn.is_none() && !declared {
                        self.add_error(ValidationError::invalid_reference(
                            &location,
                            "connection",
                            connection_name,
                        ));
                    }
                }
                SourceTrigger::ManagedRepository {
                    repository_name,
                    branch,
                } => {
                    if branch.is_empty() {
                        self.add_error(ValidationError::missing_field(&location, "branch"));
                    }
                    let declared = topology
                        .repository
                        .as_ref()
                        .is_some_and(|r| &r.repository_name == repository_name);
                    if !declared {
                        self.add_error(ValidationError::invalid_reference(
                            &location,
                            "repository",
                            repository_name,
                        ));
                    }
                }
            }
        }
    }

    fn validate_deployment_groups(&mut self, topology: &Topology) {
        let mut names = HashSet::new();
        for group in &topology.deployment_groups {
            let location = format!("deployment_groups[{}]", group.name);
            if !names.insert(group.name.as_str()) {
                self.add_error(ValidationError::duplicate_name(&location, &group.name));
            }

            let required = [
                ("application", &group.application),
                ("service", &group.service),
                ("blue_target_group", &group.blue_target_group),
                ("green_target_group", &group.green_target_group),
                ("listener", &group.listener),
                ("test_listener", &group.test_listener),
            ];
            for (field, value) in required {
                if value.is_empty() {
                    self.add_error(ValidationError::missing_field(&location, field));
                }
            }

            if !group.blue_target_group.is_empty()
                && group.blue_target_group == group.green_target_group
            {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    "blue and green target groups must differ",
                ));
            }
            if !group.listener.is_empty() && group.listener == group.test_listener {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    "production and test listeners must differ",
                ));
            }
        }
    }

    fn validate_projects(&mut self, topology: &Topology) {
        let mut ids = HashSet::new();
        for project in &topology.projects {
            let location = format!("projects[{}]", project.id);
            if !ids.insert(project.id.as_str()) {
                self.add_error(ValidationError::duplicate_name(&location, &project.id));
            }
            if project.buildspec.as_os_str().is_empty() {
                self.add_error(ValidationError::missing_field(&location, "buildspec"));
            }
            for (index, statement) in project.policy.iter().enumerate() {
                if statement.actions.is_empty() || statement.resources.is_empty() {
                    self.add_error(ValidationError::invalid_value(
                        format!("{}.policy[{}]", location, index),
                        "policy statements need at least one action and one resource",
                    ));
                }
            }
        }
    }

    fn validate_observability(&mut self, topology: &Topology) {
        let Some(overlay) = &topology.observability else {
            return;
        };

        if overlay.topic.name.is_empty() {
            self.add_error(ValidationError::missing_field("observability.topic", "name"));
        }
        if overlay.topic.subscriptions.is_empty() {
            self.add_warning(format!(
                "topic '{}' has no subscriptions; failure notifications go nowhere",
                overlay.topic.name
            ));
        }
        for subscription in &overlay.topic.subscriptions {
            let Subscription::Email(address) = subscription;
            let well_formed = address
                .split_once('@')
                .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
            if !well_formed {
                self.add_error(ValidationError::invalid_value(
                    "observability.topic.subscriptions",
                    format!("'{}' is not an email address", address),
                ));
            } else if address == PLACEHOLDER_EMAIL {
                self.add_error(ValidationError::invalid_value(
                    "observability.topic.subscriptions",
                    "placeholder email address must be replaced through configuration",
                ));
            }
        }

        for rule in &overlay.rules {
            let location = format!("observability.rules[{}]", rule.name);
            for problem in rule.pattern.problems() {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::MalformedPattern,
                    &location,
                    problem,
                ));
            }
            if rule.message.0.is_empty() {
                self.add_error(ValidationError::missing_field(&location, "message"));
            }
            let malformed = rule.message.malformed_placeholders();
            if malformed > 0 {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::MalformedPattern,
                    &location,
                    format!("message has {} malformed placeholder(s)", malformed),
                ));
            }
            if rule.topic != overlay.topic.name {
                self.add_error(ValidationError::invalid_reference(&location, "topic", &rule.topic));
            }
        }

        for widget in &overlay.dashboard.widgets {
            let location = format!("observability.dashboard.widgets[{}]", widget.title());
            let (width, height) = widget.size();
            if width == 0 || width > DASHBOARD_GRID_WIDTH || height == 0 {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    format!("widget size {}x{} is outside the dashboard grid", width, height),
                ));
            }
            if widget.metrics().is_empty() {
                self.add_error(ValidationError::missing_field(&location, "metrics"));
            }
            if let Widget::Gauge { min, max, .. } = widget {
                if min >= max {
                    self.add_error(ValidationError::invalid_value(
                        &location,
                        format!("gauge range {}..{} is empty", min, max),
                    ));
                }
            }
        }
    }
}

/// Validate `topology` with the default validator.
pub fn validate(topology: &Topology) -> ValidationReport {
    TopologyValidator::new().validate(topology)
}
