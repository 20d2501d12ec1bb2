//! Observability overlay: build dashboard, failure topic and alert rule.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::events::{ExecutionState, EXECUTION_STATE_CHANGE, PIPELINE_EVENT_SOURCE};

/// Grid width of a dashboard row.
pub const DASHBOARD_GRID_WIDTH: u32 = 24;

/// Namespace of build project metrics.
pub const BUILD_NAMESPACE: &str = "AWS/CodeBuild";

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    Average,
    Maximum,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Sum => "Sum",
            Statistic::Average => "Average",
            Statistic::Maximum => "Maximum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    pub statistic: Statistic,
    pub label: String,
    pub period_secs: u64,
    pub color: Option<String>,
}

impl Metric {
    /// Build project metric.
    pub fn build(
        metric_name: impl Into<String>,
        statistic: Statistic,
        label: impl Into<String>,
        period_secs: u64,
    ) -> Self {
        Self {
            namespace: BUILD_NAMESPACE.to_string(),
            metric_name: metric_name.into(),
            statistic,
            label: label.into(),
            period_secs,
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    fn to_widget_entry(&self) -> Value {
        let mut options = json!({
            "label": self.label,
            "stat": self.statistic.as_str(),
            "period": self.period_secs,
        });
        if let Some(color) = &self.color {
            options["color"] = json!(color);
        }
        json!([self.namespace, self.metric_name, options])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphView {
    TimeSeries,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Graph {
        title: String,
        width: u32,
        height: u32,
        view: GraphView,
        metrics: Vec<Metric>,
    },
    SingleValue {
        title: String,
        width: u32,
        height: u32,
        metrics: Vec<Metric>,
    },
    Gauge {
        title: String,
        width: u32,
        height: u32,
        metrics: Vec<Metric>,
        min: u32,
        max: u32,
    },
}

impl Widget {
    pub fn title(&self) -> &str {
        match self {
            Widget::Graph { title, .. }
            | Widget::SingleValue { title, .. }
            | Widget::Gauge { title, .. } => title,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            Widget::Graph { width, height, .. }
            | Widget::SingleValue { width, height, .. }
            | Widget::Gauge { width, height, .. } => (*width, *height),
        }
    }

    pub fn metrics(&self) -> &[Metric] {
        match self {
            Widget::Graph { metrics, .. }
            | Widget::SingleValue { metrics, .. }
            | Widget::Gauge { metrics, .. } => metrics,
        }
    }

    fn properties(&self, region: &str) -> Value {
        let metrics: Vec<Value> = self.metrics().iter().map(Metric::to_widget_entry).collect();
        let mut props = json!({
            "title": self.title(),
            "region": region,
            "metrics": metrics,
        });
        match self {
            Widget::Graph { view, .. } => {
                props["view"] = json!(match view {
                    GraphView::TimeSeries => "timeSeries",
                    GraphView::Pie => "pie",
                });
            }
            Widget::SingleValue { .. } => {
                props["view"] = json!("singleValue");
            }
            Widget::Gauge { min, max, .. } => {
                props["view"] = json!("gauge");
                props["yAxis"] = json!({ "left": { "min": min, "max": max } });
            }
        }
        props
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub name: String,
    pub widgets: Vec<Widget>,
}

impl Dashboard {
    /// Dashboard body with widgets laid out left to right, wrapping rows at
    /// the grid width.
    pub fn body(&self, region: &str) -> Value {
        let mut x = 0u32;
        let mut y = 0u32;
        let mut row_height = 0u32;
        let mut widgets = Vec::with_capacity(self.widgets.len());

        for widget in &self.widgets {
            let (width, height) = widget.size();
            if x + width > DASHBOARD_GRID_WIDTH && x > 0 {
                y += row_height;
                x = 0;
                row_height = 0;
            }
            widgets.push(json!({
                "type": "metric",
                "x": x,
                "y": y,
                "width": width,
                "height": height,
                "properties": widget.properties(region),
            }));
            x += width;
            row_height = row_height.max(height);
        }

        json!({ "widgets": widgets })
    }
}

// ---------------------------------------------------------------------------
// Event patterns
// ---------------------------------------------------------------------------

/// One node of an event pattern: a list of accepted scalar values, or a
/// nested pattern for an object field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternNode {
    Values(Vec<Value>),
    Nested(EventPattern),
}

/// Pure structural matcher over event JSON.
///
/// Every key in the pattern must be present in the event. A value list
/// matches when the event value (or any element of an event array) equals
/// one of the listed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPattern(pub BTreeMap<String, PatternNode>);

impl EventPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.0.insert(
            key.into(),
            PatternNode::Values(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn with_nested(mut self, key: impl Into<String>, nested: EventPattern) -> Self {
        self.0.insert(key.into(), PatternNode::Nested(nested));
        self
    }

    /// Matches failed pipeline executions.
    pub fn pipeline_execution_failed() -> Self {
        Self::new()
            .with_values("source", [PIPELINE_EVENT_SOURCE])
            .with_values("detail-type", [EXECUTION_STATE_CHANGE])
            .with_nested(
                "detail",
                Self::new().with_values("state", [ExecutionState::Failed.as_str()]),
            )
    }

    pub fn matches(&self, event: &Value) -> bool {
        self.0.iter().all(|(key, node)| match (node, event.get(key)) {
            (_, None) => false,
            (PatternNode::Values(accepted), Some(Value::Array(items))) => {
                items.iter().any(|item| accepted.contains(item))
            }
            (PatternNode::Values(accepted), Some(actual)) => accepted.contains(actual),
            (PatternNode::Nested(nested), Some(actual)) => {
                actual.is_object() && nested.matches(actual)
            }
        })
    }

    /// Structural problems that would make the provider reject the pattern.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        self.collect_problems("", &mut problems);
        problems
    }

    fn collect_problems(&self, prefix: &str, problems: &mut Vec<String>) {
        if self.0.is_empty() {
            let at = if prefix.is_empty() { "pattern" } else { prefix };
            problems.push(format!("{} must not be empty", at));
        }
        for (key, node) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match node {
                PatternNode::Values(values) if values.is_empty() => {
                    problems.push(format!("{} must list at least one value", path));
                }
                PatternNode::Values(values) => {
                    if values.iter().any(|v| v.is_object() || v.is_array()) {
                        problems.push(format!("{} must list scalar values only", path));
                    }
                }
                PatternNode::Nested(nested) => nested.collect_problems(&path, problems),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message templates
// ---------------------------------------------------------------------------

fn placeholder_rule() -> Option<&'static Regex> {
    static RULE: OnceLock<Option<Regex>> = OnceLock::new();
    RULE.get_or_init(|| Regex::new(r"<\$\.([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)>").ok())
        .as_ref()
}

/// Text with `<$.path.to.field>` placeholders filled from the matched event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplate(pub String);

impl MessageTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// `Pipeline Failure Detected! Pipeline: <name> Execution ID: <id>`.
    pub fn pipeline_failure() -> Self {
        Self::new(
            "Pipeline Failure Detected! Pipeline: <$.detail.pipeline> Execution ID: <$.detail.execution-id>",
        )
    }

    /// JSON paths referenced by the template, without the `$.` prefix.
    pub fn paths(&self) -> Vec<String> {
        match placeholder_rule() {
            Some(rule) => rule
                .captures_iter(&self.0)
                .map(|c| c[1].to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Placeholders opened with `<$.` that do not form a valid path.
    pub fn malformed_placeholders(&self) -> usize {
        self.0.matches("<$.").count().saturating_sub(self.paths().len())
    }

    /// Fill placeholders from `event`. Missing paths render as empty text.
    pub fn render(&self, event: &Value) -> String {
        let Some(rule) = placeholder_rule() else {
            return self.0.clone();
        };
        rule.replace_all(&self.0, |caps: &regex::Captures<'_>| {
            let mut current = event;
            for segment in caps[1].split('.') {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => return String::new(),
                }
            }
            match current {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }
        })
        .into_owned()
    }
}

// ---------------------------------------------------------------------------
// Topics and rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "endpoint", rename_all = "lowercase")]
pub enum Subscription {
    Email(String),
}

impl Subscription {
    pub fn endpoint(&self) -> &str {
        match self {
            Subscription::Email(address) => address,
        }
    }
}

/// Notification topic fanned out to its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub display_name: String,
    pub subscriptions: Vec<Subscription>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            subscriptions: Vec::new(),
        }
    }

    pub fn add_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }
}

/// Event-pattern rule forwarding a formatted message to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub pattern: EventPattern,
    /// Name of the target [`Topic`].
    pub topic: String,
    pub message: MessageTemplate,
}

impl AlertRule {
    pub fn pipeline_failure(topic: impl Into<String>) -> Self {
        Self {
            name: "PipelineFailureRule".to_string(),
            description: "Notify on pipeline failures".to_string(),
            pattern: EventPattern::pipeline_execution_failed(),
            topic: topic.into(),
            message: MessageTemplate::pipeline_failure(),
        }
    }

    /// Rendered message when `event` matches, `None` otherwise.
    pub fn evaluate(&self, event: &Value) -> Option<String> {
        self.pattern
            .matches(event)
            .then(|| self.message.render(event))
    }
}

/// Optional dashboard and failure notifier declared next to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityOverlay {
    pub dashboard: Dashboard,
    pub topic: Topic,
    pub rules: Vec<AlertRule>,
}
