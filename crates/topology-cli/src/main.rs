//! `topology` - inspect, synthesize and simulate the CI/CD pipeline topology.
//!
//! ## Commands
//!
//! - `validate`: build the topology from configuration and run every check
//! - `plan`: stages, run-order groups and artifact handoffs
//! - `graph`: artifact edges between actions
//! - `synth`: provisioning template plus its digest
//! - `run`: simulate one execution with scripted actions
//! - `release`: simulate the blue/green traffic shift
//! - `notify`: evaluate an event against the failure alert rule

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};

use topology_core::blueprint::FAILURE_TOPIC;
use topology_core::domain::PipelineType;
use topology_core::metrics::METRICS;
use topology_core::{
    synthesize, validate, AlertRule, ArtifactGraph, ProvisioningConfig, Topology,
    WorkshopBlueprint,
};
use topology_engine::{
    ActionStatus, AlertDispatcher, AlwaysHealthy, ApprovalDecision, BlueGreenGate, EventBus,
    HealthProbe, InstantClock, MemoryTopic, ReleaseExecutor, ScriptedExecutor, StageSequencer,
    UnhealthyFrom,
};

#[derive(Parser)]
#[command(name = "topology")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Declarative CI/CD pipeline topology with blue/green release gating",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Provisioning config (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "TOPOLOGY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the topology and run all validators
    Validate,

    /// Print stages, run-order groups and artifacts in/out
    Plan,

    /// Print artifact edges and consumers
    Graph,

    /// Emit the provisioning template
    Synth {
        /// Write the template here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Simulate one pipeline execution
    Run {
        /// Make this action fail
        #[arg(long)]
        fail_action: Option<String>,

        /// Reject the production approval
        #[arg(long)]
        reject: bool,
    },

    /// Simulate the blue/green release of the production deployment group
    Release {
        /// Report green unhealthy once it carries this percentage of traffic
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        fail_at_percent: Option<u8>,
    },

    /// Evaluate an event (JSON file) against the failure alert rule
    Notify {
        #[arg(short, long)]
        event: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    topology_core::telemetry::init_tracing(cli.json, level);

    let config = cli.config.as_deref();
    let outcome = match cli.command {
        Commands::Validate => cmd_validate(config),
        Commands::Plan => cmd_plan(config),
        Commands::Graph => cmd_graph(config),
        Commands::Synth { out } => cmd_synth(config, out.as_deref()),
        Commands::Run {
            fail_action,
            reject,
        } => cmd_run(config, fail_action, reject).await,
        Commands::Release { fail_at_percent } => cmd_release(config, fail_at_percent).await,
        Commands::Notify { event } => cmd_notify(config, &event).await,
    };
    METRICS.flush();
    outcome
}

fn load(config: Option<&Path>) -> Result<(ProvisioningConfig, Topology)> {
    let config = ProvisioningConfig::load(config).context("Failed to load provisioning config")?;
    let topology = WorkshopBlueprint::new(&config)
        .build()
        .context("Failed to build topology")?;
    Ok((config, topology))
}

fn cmd_validate(config: Option<&Path>) -> Result<()> {
    let (_, topology) = load(config)?;
    let report = validate(&topology);

    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    for error in &report.errors {
        println!("error: {}", error);
    }
    if !report.is_ok() {
        bail!(
            "topology '{}' has {} validation error(s)",
            topology.pipeline.name,
            report.errors.len()
        );
    }
    println!(
        "topology '{}' is valid ({} stages, {} warning(s))",
        topology.pipeline.name,
        topology.pipeline.stages.len(),
        report.warnings.len()
    );
    Ok(())
}

fn cmd_plan(config: Option<&Path>) -> Result<()> {
    let (_, topology) = load(config)?;
    let pipeline = &topology.pipeline;
    println!(
        "pipeline {} ({}, {})",
        pipeline.name,
        pipeline.execution_mode.as_str(),
        match pipeline.pipeline_type {
            PipelineType::V1 => "V1",
            PipelineType::V2 => "V2",
        }
    );
    for (index, stage) in pipeline.stages.iter().enumerate() {
        println!("{}. {}", index + 1, stage.name);
        for (run_order, actions) in stage.run_order_groups() {
            for action in actions {
                let inputs: Vec<&str> = action.inputs().iter().map(|a| a.as_str()).collect();
                let outputs: Vec<&str> = action.outputs().iter().map(|a| a.as_str()).collect();
                println!(
                    "   [{}] {} ({} via {}) in: [{}] out: [{}]",
                    run_order,
                    action.name,
                    action.category().as_str(),
                    action.kind.provider(),
                    inputs.join(", "),
                    outputs.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn cmd_graph(config: Option<&Path>) -> Result<()> {
    let (_, topology) = load(config)?;
    let graph = ArtifactGraph::from_pipeline(&topology.pipeline);

    for edge in graph.edges() {
        println!("{} --{}--> {}", edge.producer, edge.artifact, edge.consumer);
    }
    println!();
    for artifact in graph.artifacts() {
        let consumers = graph.consumers(artifact);
        println!(
            "{}: produced by {}, consumed by [{}]",
            artifact,
            graph.producer(artifact).unwrap_or("<nobody>"),
            consumers.join(", ")
        );
    }
    let order = graph
        .topological_order()
        .context("Artifact handoffs are not acyclic")?;
    println!();
    println!("order: {}", order.join(" -> "));
    Ok(())
}

fn cmd_synth(config: Option<&Path>, out: Option<&Path>) -> Result<()> {
    let (config, topology) = load(config)?;
    let region = config.region().context("A region is required for synthesis")?;
    let template = synthesize(&topology, region).context("Failed to synthesize template")?;
    let body = template.to_pretty_json()?;
    let digest = template.digest()?;

    match out {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            println!("Wrote template to {}", path.display());
        }
        None => println!("{}", body),
    }
    println!("digest: sha256:{}", digest);
    Ok(())
}

/// Alert rules from the overlay, or the default failure rule.
fn dispatcher(topology: &Topology) -> (AlertDispatcher, Arc<MemoryTopic>) {
    match &topology.observability {
        Some(overlay) => {
            let topic = Arc::new(MemoryTopic::new(overlay.topic.name.clone()));
            let dispatcher = AlertDispatcher::from_overlay(overlay).with_topic(topic.clone());
            (dispatcher, topic)
        }
        None => {
            let topic = Arc::new(MemoryTopic::new(FAILURE_TOPIC));
            let dispatcher = AlertDispatcher::new(vec![AlertRule::pipeline_failure(FAILURE_TOPIC)])
                .with_topic(topic.clone());
            (dispatcher, topic)
        }
    }
}

async fn cmd_run(config: Option<&Path>, fail_action: Option<String>, reject: bool) -> Result<()> {
    let (_, topology) = load(config)?;
    validate(&topology)
        .into_result()
        .context("Refusing to run an invalid topology")?;

    let mut scripted = ScriptedExecutor::new();
    if let Some(action) = &fail_action {
        if topology.pipeline.find_action(action).is_none() {
            bail!("No action named '{}' in pipeline '{}'", action, topology.pipeline.name);
        }
        scripted = scripted.fail(action.clone(), "failure requested from the command line");
    }
    let decision = if reject {
        ApprovalDecision::Reject {
            reason: "rejected from the command line".to_string(),
        }
    } else {
        ApprovalDecision::Approve {
            by: "topology-cli".to_string(),
        }
    };
    let executor = ReleaseExecutor::new(
        &topology,
        scripted,
        decision,
        Arc::new(InstantClock::new()),
        Arc::new(AlwaysHealthy),
    );

    let (dispatcher, topic) = dispatcher(&topology);
    let bus = EventBus::default();
    let alerts = Arc::new(dispatcher).spawn(bus.subscribe());
    let sequencer = StageSequencer::new(Arc::new(bus.clone()));

    let record = sequencer.run(&topology.pipeline, &executor).await;
    drop(sequencer);
    drop(bus);
    let published = alerts.await.context("Alert dispatcher task failed")?;

    println!("execution {} {}", record.execution_id, record.state);
    for result in &record.actions {
        let detail = match &result.status {
            ActionStatus::Failed { reason } => format!(" ({})", reason),
            _ => String::new(),
        };
        println!(
            "  {:<22} {:<24} {}{}",
            result.stage,
            result.action,
            result.status.label(),
            detail
        );
    }
    for group in &topology.deployment_groups {
        if let Some(gate) = executor.gate(&group.name).await {
            println!("release {}: {} ({})", group.name, gate.state(), gate.split());
        }
    }
    if published > 0 {
        println!();
        for notification in topic.published() {
            println!("notification to {}: {}", notification.topic, notification.message);
        }
    }
    info!(execution_id = %record.execution_id, notifications = published, "simulated run finished");
    Ok(())
}

async fn cmd_release(config: Option<&Path>, fail_at_percent: Option<u8>) -> Result<()> {
    let (_, topology) = load(config)?;
    let group = topology
        .deployment_groups
        .first()
        .context("The topology declares no deployment group")?;

    let mut gate = BlueGreenGate::new(group);
    gate.request_approval()?;
    gate.approve("topology-cli")?;

    let probe: Box<dyn HealthProbe> = match fail_at_percent {
        Some(percent) => Box::new(UnhealthyFrom(percent)),
        None => Box::new(AlwaysHealthy),
    };
    let clock = InstantClock::new();
    let state = gate.run_to_completion(&clock, probe.as_ref()).await?;

    println!(
        "release {} using {}",
        gate.deployment_group(),
        gate.policy().config_name()
    );
    for transition in gate.history() {
        println!(
            "  {} {} -> {}",
            transition.at.format("%H:%M:%S%.3f"),
            transition.from,
            transition.to
        );
    }
    println!("final state: {} ({})", state, gate.split());
    println!(
        "production listener -> {}, test listener -> {}",
        gate.production_target(),
        gate.test_target().unwrap_or("<none>")
    );
    Ok(())
}

async fn cmd_notify(config: Option<&Path>, event: &Path) -> Result<()> {
    let (_, topology) = load(config)?;
    let text = std::fs::read_to_string(event)
        .with_context(|| format!("Failed to read event {}", event.display()))?;
    let event: Value = serde_json::from_str(&text).context("Event is not valid JSON")?;

    let (dispatcher, _) = dispatcher(&topology);
    let notifications = dispatcher.dispatch(&event).await?;
    if notifications.is_empty() {
        println!("no rule matched; nothing published");
    }
    for notification in notifications {
        println!("topic:   {}", notification.topic);
        println!("subject: {}", notification.subject);
        println!("message: {}", notification.message);
    }
    Ok(())
}
