//! Execution events and failure alerting.
//!
//! The sequencer publishes [`PipelineExecutionEvent`]s to an [`EventSink`].
//! [`EventBus`] fans them out over a tokio broadcast channel; an
//! [`AlertDispatcher`] subscribed to the bus evaluates every alert rule and
//! publishes one [`Notification`] per match to the rule's topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use topology_core::metrics::METRICS;
use topology_core::obs::emit_notification_published;
use topology_core::{AlertRule, ObservabilityOverlay, PipelineExecutionEvent};

use crate::error::{EngineError, Result};

/// Receives execution events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineExecutionEvent);
}

/// Broadcast bus for execution events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: PipelineExecutionEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(event_id = %event.id, "no subscribers for execution event");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: PipelineExecutionEvent) {
        self.publish(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineExecutionEvent) {}
}

/// Message delivered to a topic's subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub topic: String,
    pub rule: String,
    pub subject: String,
    pub message: String,
}

/// A destination for notifications.
#[async_trait]
pub trait NotificationTopic: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, notification: Notification) -> Result<()>;
}

/// Topic that keeps every published notification in memory.
#[derive(Debug, Default)]
pub struct MemoryTopic {
    name: String,
    published: Mutex<Vec<Notification>>,
}

impl MemoryTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<Notification> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationTopic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, notification: Notification) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

/// Evaluates alert rules against events and publishes matches.
///
/// Pure pattern matching: one notification per matching rule per event, no
/// retries and no deduplication.
pub struct AlertDispatcher {
    rules: Vec<AlertRule>,
    topics: HashMap<String, Arc<dyn NotificationTopic>>,
}

impl AlertDispatcher {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            topics: HashMap::new(),
        }
    }

    pub fn from_overlay(overlay: &ObservabilityOverlay) -> Self {
        Self::new(overlay.rules.clone())
    }

    pub fn with_topic(mut self, topic: Arc<dyn NotificationTopic>) -> Self {
        self.topics.insert(topic.name().to_string(), topic);
        self
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Notifications `event` would trigger, without publishing them.
    pub fn evaluate(&self, event: &Value) -> Vec<Notification> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.evaluate(event).map(|message| Notification {
                    topic: rule.topic.clone(),
                    rule: rule.name.clone(),
                    subject: rule.description.clone(),
                    message,
                })
            })
            .collect()
    }

    /// Evaluate `event` and publish every resulting notification.
    pub async fn dispatch(&self, event: &Value) -> Result<Vec<Notification>> {
        let notifications = self.evaluate(event);
        for notification in &notifications {
            let topic = self
                .topics
                .get(&notification.topic)
                .ok_or_else(|| EngineError::UnknownTopic(notification.topic.clone()))?;
            topic.publish(notification.clone()).await?;
            METRICS.inc_notifications_published();
            emit_notification_published(&notification.topic, &notification.rule);
        }
        Ok(notifications)
    }

    /// Dispatch every event received on `events` until the bus closes.
    /// The task resolves to the number of notifications published.
    pub fn spawn(
        self: Arc<Self>,
        mut events: broadcast::Receiver<PipelineExecutionEvent>,
    ) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut published = 0;
            loop {
                match events.recv().await {
                    Ok(event) => match self.dispatch(&event.to_value()).await {
                        Ok(sent) => published += sent.len(),
                        Err(err) => {
                            warn!(event_id = %event.id, error = %err, "alert dispatch failed")
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "alert dispatcher lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            published
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use topology_core::ExecutionState;

    fn dispatcher(topic: Arc<MemoryTopic>) -> AlertDispatcher {
        AlertDispatcher::new(vec![AlertRule::pipeline_failure("BuildFailure")]).with_topic(topic)
    }

    #[tokio::test]
    async fn test_failed_event_notifies_once() {
        let topic = Arc::new(MemoryTopic::new("BuildFailure"));
        let dispatcher = dispatcher(Arc::clone(&topic));
        let event = PipelineExecutionEvent::state_change(
            "CICD_Pipeline",
            "abc-123",
            ExecutionState::Failed,
            Utc::now(),
        );

        let sent = dispatcher.dispatch(&event.to_value()).await.expect("dispatch");
        assert_eq!(sent.len(), 1);
        let published = topic.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].message,
            "Pipeline Failure Detected! Pipeline: CICD_Pipeline Execution ID: abc-123"
        );
    }

    #[tokio::test]
    async fn test_other_states_are_ignored() {
        let topic = Arc::new(MemoryTopic::new("BuildFailure"));
        let dispatcher = dispatcher(Arc::clone(&topic));
        for state in [ExecutionState::Started, ExecutionState::Succeeded] {
            let event =
                PipelineExecutionEvent::state_change("CICD_Pipeline", "x", state, Utc::now());
            dispatcher.dispatch(&event.to_value()).await.expect("dispatch");
        }
        assert!(topic.published().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let dispatcher = AlertDispatcher::new(vec![AlertRule::pipeline_failure("Elsewhere")]);
        let event = PipelineExecutionEvent::state_change(
            "CICD_Pipeline",
            "abc-123",
            ExecutionState::Failed,
            Utc::now(),
        );
        let err = dispatcher.dispatch(&event.to_value()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTopic(name) if name == "Elsewhere"));
    }

    #[tokio::test]
    async fn test_bus_feeds_spawned_dispatcher() {
        let bus = EventBus::default();
        let topic = Arc::new(MemoryTopic::new("BuildFailure"));
        let handle = Arc::new(dispatcher(Arc::clone(&topic))).spawn(bus.subscribe());

        bus.emit(PipelineExecutionEvent::state_change(
            "CICD_Pipeline",
            "abc-123",
            ExecutionState::Failed,
            Utc::now(),
        ));
        drop(bus);

        assert_eq!(handle.await.expect("join"), 1);
        assert_eq!(topic.published().len(), 1);
    }
}
