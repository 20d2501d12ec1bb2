//! End-to-end executions of the workshop topology against scripted executors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use topology_core::{
    Action, ArtifactName, ExecutionMode, ExecutionState, Pipeline, PipelineExecutionEvent,
    ProvisioningConfig, SourceTrigger, Topology, WorkshopBlueprint,
};
use topology_engine::{
    ActionStatus, AlertDispatcher, AlwaysHealthy, ApprovalDecision, EventBus, GateState,
    InstantClock, MemoryTopic, NotificationTopic, NullSink, ReleaseExecutor, ScriptedExecutor,
    StageSequencer, TrafficSplit, UnhealthyFrom,
};

fn workshop() -> Topology {
    let config = ProvisioningConfig {
        region: Some("us-east-2".to_string()),
        image_repo_uri: Some("123456789012.dkr.ecr.us-east-2.amazonaws.com/my-app".to_string()),
        notification_email: Some("ops@example.com".to_string()),
        ..ProvisioningConfig::default()
    };
    WorkshopBlueprint::new(&config).build().expect("blueprint")
}

fn release_executor(
    topology: &Topology,
    inner: ScriptedExecutor,
    decision: ApprovalDecision,
) -> ReleaseExecutor<ScriptedExecutor> {
    ReleaseExecutor::new(
        topology,
        inner,
        decision,
        Arc::new(InstantClock::new()),
        Arc::new(AlwaysHealthy),
    )
}

fn approve() -> ApprovalDecision {
    ApprovalDecision::Approve {
        by: "release-manager".to_string(),
    }
}

fn drain(rx: &mut broadcast::Receiver<PipelineExecutionEvent>) -> Vec<PipelineExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Bus, sequencer and a spawned dispatcher publishing to a memory topic.
struct Harness {
    bus: EventBus,
    sequencer: StageSequencer,
    topic: Arc<MemoryTopic>,
    dispatcher: tokio::task::JoinHandle<usize>,
    events: broadcast::Receiver<PipelineExecutionEvent>,
}

impl Harness {
    fn new(topology: &Topology) -> Self {
        let overlay = topology.observability.as_ref().expect("overlay");
        let bus = EventBus::default();
        let topic = Arc::new(MemoryTopic::new(overlay.topic.name.clone()));
        let sink: Arc<dyn NotificationTopic> = topic.clone();
        let dispatcher = Arc::new(AlertDispatcher::from_overlay(overlay).with_topic(sink))
            .spawn(bus.subscribe());
        let events = bus.subscribe();
        let sequencer = StageSequencer::new(Arc::new(bus.clone()));
        Self {
            bus,
            sequencer,
            topic,
            dispatcher,
            events,
        }
    }

    /// Close the bus and wait for the dispatcher to drain it.
    async fn finish(self) -> (Vec<PipelineExecutionEvent>, Arc<MemoryTopic>, usize) {
        let Harness {
            bus,
            sequencer,
            topic,
            dispatcher,
            mut events,
        } = self;
        drop(sequencer);
        drop(bus);
        let published = dispatcher.await.expect("dispatcher task");
        (drain(&mut events), topic, published)
    }
}

#[tokio::test]
async fn approved_release_succeeds_end_to_end() {
    let topology = workshop();
    let harness = Harness::new(&topology);
    let executor = release_executor(&topology, ScriptedExecutor::new(), approve());

    let record = harness.sequencer.run(&topology.pipeline, &executor).await;
    assert!(record.succeeded(), "failed: {:?}", record.failed_action());
    assert_eq!(record.count("succeeded"), 6);

    let gate = executor.gate("my-app-dg").await.expect("gate");
    assert_eq!(gate.state(), &GateState::Complete);
    assert_eq!(gate.split(), TrafficSplit::with_green(100));

    let (events, topic, published) = harness.finish().await;
    let states: Vec<_> = events.iter().map(|e| e.detail.state).collect();
    assert_eq!(states, vec![ExecutionState::Started, ExecutionState::Succeeded]);
    assert!(events.iter().all(|e| e.detail.execution_id == record.execution_id));
    assert_eq!(published, 0);
    assert!(topic.published().is_empty());
}

#[tokio::test]
async fn failing_action_halts_pipeline_and_notifies_once() {
    let topology = workshop();
    let harness = Harness::new(&topology);
    let executor = release_executor(
        &topology,
        ScriptedExecutor::new().fail("Unit-Test", "3 tests failed"),
        approve(),
    );

    let record = harness.sequencer.run(&topology.pipeline, &executor).await;
    assert_eq!(record.state, ExecutionState::Failed);
    assert_eq!(
        record.result("Unit-Test").map(|r| &r.status),
        Some(&ActionStatus::Failed {
            reason: "3 tests failed".to_string()
        })
    );
    for later in [
        "Docker-Build",
        "Deploy-Fargate-Test",
        "Approve-Prod-Deploy",
        "ABlueGreen-deployECS",
    ] {
        assert_eq!(
            record.result(later).map(|r| &r.status),
            Some(&ActionStatus::Skipped),
            "{} should be skipped",
            later
        );
    }
    assert!(!executor.inner().called().contains("Docker-Build"));

    let (events, topic, published) = harness.finish().await;
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e.detail.state == ExecutionState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);

    assert_eq!(published, 1);
    let notifications = topic.published();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].message.contains("CICD_Pipeline"));
    assert!(notifications[0].message.contains(&record.execution_id));
}

#[tokio::test]
async fn rejected_approval_never_starts_the_deploy() {
    let topology = workshop();
    let harness = Harness::new(&topology);
    let executor = release_executor(
        &topology,
        ScriptedExecutor::new(),
        ApprovalDecision::Reject {
            reason: "change freeze".to_string(),
        },
    );

    let record = harness.sequencer.run(&topology.pipeline, &executor).await;
    assert_eq!(record.state, ExecutionState::Failed);
    assert_eq!(
        record.result("ABlueGreen-deployECS").map(|r| &r.status),
        Some(&ActionStatus::Skipped)
    );

    let gate = executor.gate("my-app-dg").await.expect("gate");
    assert!(matches!(gate.state(), GateState::Rejected { .. }));
    assert_eq!(gate.split(), TrafficSplit::all_blue());
    assert_eq!(gate.test_target(), None);

    let (_, topic, _) = harness.finish().await;
    assert_eq!(topic.published().len(), 1);
}

#[tokio::test]
async fn repeated_executions_release_through_one_executor() {
    let topology = workshop();
    let harness = Harness::new(&topology);
    let executor = release_executor(&topology, ScriptedExecutor::new(), approve());

    for production in ["prod-app-green-tg", "prod-app-blue-tg"] {
        let record = harness.sequencer.run(&topology.pipeline, &executor).await;
        assert!(record.succeeded(), "failed: {:?}", record.failed_action());
        let gate = executor.gate("my-app-dg").await.expect("gate");
        assert_eq!(gate.state(), &GateState::Complete);
        assert_eq!(gate.production_target(), production);
    }

    let (events, _, published) = harness.finish().await;
    assert_eq!(events.len(), 4);
    assert_eq!(published, 0);
}

#[tokio::test]
async fn failed_shift_does_not_lock_out_the_next_execution() {
    let topology = workshop();
    let harness = Harness::new(&topology);
    let executor = ReleaseExecutor::new(
        &topology,
        ScriptedExecutor::new(),
        approve(),
        Arc::new(InstantClock::new()),
        Arc::new(UnhealthyFrom(30)),
    );

    for _ in 0..2 {
        let record = harness.sequencer.run(&topology.pipeline, &executor).await;
        assert_eq!(record.state, ExecutionState::Failed);
        assert_eq!(
            record.failed_action().map(|r| r.action.as_str()),
            Some("ABlueGreen-deployECS")
        );
        assert_eq!(
            record.result("Approve-Prod-Deploy").map(|r| &r.status),
            Some(&ActionStatus::Succeeded)
        );
    }

    let (_, topic, _) = harness.finish().await;
    assert_eq!(topic.published().len(), 2);
}

#[tokio::test]
async fn source_output_fans_out_as_one_snapshot() {
    let topology = workshop();
    let executor = ScriptedExecutor::new();
    let sequencer = StageSequencer::new(Arc::new(NullSink));

    // Stop before production so the scripted executor handles every action.
    let mut pipeline = topology.pipeline.clone();
    pipeline.stages.truncate(4);
    let record = sequencer.run(&pipeline, &executor).await;
    assert!(record.succeeded());

    let calls = executor.calls();
    let input_of = |action: &str| {
        calls
            .iter()
            .find(|c| c.action == action)
            .and_then(|c| c.inputs.first().cloned())
            .expect("input")
    };
    let unit_test = input_of("Unit-Test");
    let docker = input_of("Docker-Build");
    assert!(Arc::ptr_eq(&unit_test, &docker));
    assert_eq!(unit_test.name, ArtifactName::source_output());
    assert_eq!(input_of("Deploy-Fargate-Test").producer, "Docker-Build");
}

fn two_stage_pipeline(mode: ExecutionMode) -> Pipeline {
    let mut pipeline = Pipeline::new("CICD_Pipeline").with_execution_mode(mode);
    pipeline
        .add_stage(
            "Source",
            vec![Action::source(
                "Source",
                SourceTrigger::ManagedRepository {
                    repository_name: "CICD_Workshop".to_string(),
                    branch: "main".to_string(),
                },
                ArtifactName::source_output(),
            )],
        )
        .expect("source");
    pipeline
        .add_stage(
            "Checks",
            vec![
                Action::build("Lint", "CodeBuild", ArtifactName::source_output(), Vec::new()),
                Action::build("Test", "CodeBuild", ArtifactName::source_output(), Vec::new()),
                Action::build("Report", "CodeBuild", ArtifactName::source_output(), Vec::new())
                    .with_run_order(2),
            ],
        )
        .expect("checks");
    pipeline
}

#[tokio::test]
async fn same_run_order_actions_overlap() {
    let executor = ScriptedExecutor::new()
        .delay("Lint", Duration::from_millis(50))
        .delay("Test", Duration::from_millis(50));
    let sequencer = StageSequencer::new(Arc::new(NullSink));

    let record = sequencer
        .run(&two_stage_pipeline(ExecutionMode::Parallel), &executor)
        .await;
    assert!(record.succeeded());
    assert!(executor.overlapped("Lint", "Test"));
    assert!(!executor.overlapped("Lint", "Report"));
    assert!(!executor.overlapped("Test", "Report"));
}

#[tokio::test]
async fn queued_executions_run_one_at_a_time() {
    let executor = ScriptedExecutor::new().delay("Source", Duration::from_millis(30));
    let sequencer = StageSequencer::new(Arc::new(NullSink));
    let pipeline = two_stage_pipeline(ExecutionMode::Queued);

    let (a, b) = tokio::join!(
        sequencer.run(&pipeline, &executor),
        sequencer.run(&pipeline, &executor)
    );
    assert!(a.succeeded() && b.succeeded());
    assert!(a.finished_at <= b.started_at || b.finished_at <= a.started_at);
}

#[tokio::test]
async fn superseded_execution_stops_at_stage_boundary() {
    let executor = ScriptedExecutor::new().delay("Source", Duration::from_millis(50));
    let sequencer = StageSequencer::new(Arc::new(NullSink));
    let pipeline = two_stage_pipeline(ExecutionMode::Superseded);

    let (older, newer) = tokio::join!(sequencer.run(&pipeline, &executor), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        sequencer.run(&pipeline, &executor).await
    });
    assert_eq!(older.state, ExecutionState::Superseded);
    assert_eq!(older.count("skipped"), 3);
    assert!(newer.succeeded());
}

#[tokio::test]
async fn spawned_executions_run_on_separate_tasks() {
    let sequencer = Arc::new(StageSequencer::new(Arc::new(NullSink)));
    let executor = Arc::new(ScriptedExecutor::new().delay("Lint", Duration::from_millis(20)));
    let pipeline = Arc::new(two_stage_pipeline(ExecutionMode::Parallel));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let sequencer = Arc::clone(&sequencer);
            let executor = Arc::clone(&executor);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { sequencer.run(&pipeline, &*executor).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let record = handle.await.expect("execution task");
        assert!(record.succeeded());
        ids.push(record.execution_id);
    }
    assert_ne!(ids[0], ids[1]);
    assert_eq!(executor.calls().len(), 8);
}
