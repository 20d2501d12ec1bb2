//! Structured lifecycle events for pipeline executions and releases.
//!
//! Every emitter logs at `info!` (or `warn!` for failures) with a stable
//! `event` field so log pipelines can filter on it.

use tracing::{info, warn, Span};

/// Span scoping every event of one execution.
///
/// ```ignore
/// run(pipeline).instrument(execution_span("CICD_Pipeline", &execution_id)).await
/// ```
pub fn execution_span(pipeline: &str, execution_id: &str) -> Span {
    tracing::info_span!(
        "topology.execution",
        pipeline = %pipeline,
        execution_id = %execution_id
    )
}

pub fn emit_execution_started(pipeline: &str, execution_id: &str, stages: usize) {
    info!(
        event = "execution.started",
        pipeline = %pipeline,
        execution_id = %execution_id,
        stages = stages,
    );
}

/// `status` is the action's final status label (`succeeded`, `failed`, `skipped`).
pub fn emit_action_finished(stage: &str, action: &str, status: &str, duration_ms: u64) {
    info!(
        event = "action.finished",
        stage = %stage,
        action = %action,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_execution_finished(pipeline: &str, execution_id: &str, state: &str, duration_ms: u64) {
    if state == "FAILED" {
        warn!(
            event = "execution.finished",
            pipeline = %pipeline,
            execution_id = %execution_id,
            state = %state,
            duration_ms = duration_ms,
        );
    } else {
        info!(
            event = "execution.finished",
            pipeline = %pipeline,
            execution_id = %execution_id,
            state = %state,
            duration_ms = duration_ms,
        );
    }
}

pub fn emit_traffic_shifted(deployment_group: &str, blue: u8, green: u8) {
    info!(
        event = "release.traffic_shifted",
        deployment_group = %deployment_group,
        blue = blue,
        green = green,
    );
}

pub fn emit_notification_published(topic: &str, rule: &str) {
    info!(event = "notification.published", topic = %topic, rule = %rule);
}
