//! The workshop blueprint: source → code quality → image build → test deploy
//! → gated blue/green production deploy, with an optional observability
//! overlay.

use tracing::info;

use crate::config::{ProvisioningConfig, SourceConfig};
use crate::domain::build::STANDARD_5_0;
use crate::domain::{
    Action, AlertRule, ArtifactName, BuildEnvironment, BuildProject, ComputeType, Dashboard,
    DeploymentGroup, EnvVar, GraphView, ManagedRepository, Metric, ObservabilityOverlay,
    Pipeline, PolicyStatement, Result, SourceConnection, SourceTrigger, Statistic,
    StringParameter, Subscription, Topic, Topology, Widget,
};

pub const STAGE_SOURCE: &str = "Source";
pub const STAGE_CODE_QUALITY: &str = "Code-Quality-Testing";
pub const STAGE_DOCKER_BUILD: &str = "Docker-Build";
pub const STAGE_DEPLOY_TEST: &str = "Deploy-Test";
pub const STAGE_DEPLOY_PRODUCTION: &str = "Deploy-Production";

pub const ACTION_UNIT_TEST: &str = "Unit-Test";
pub const ACTION_DOCKER_BUILD: &str = "Docker-Build";
pub const ACTION_DEPLOY_TEST: &str = "Deploy-Fargate-Test";
pub const ACTION_APPROVE: &str = "Approve-Prod-Deploy";
pub const ACTION_BLUE_GREEN: &str = "ABlueGreen-deployECS";

pub const PROJECT_CODE_QUALITY: &str = "CodeBuild";
pub const PROJECT_DOCKER_BUILD: &str = "DockerBuild";

pub const FAILURE_TOPIC: &str = "BuildFailure";
pub const DASHBOARD_NAME: &str = "CICD_Dashboard";

const DAY_SECS: u64 = 24 * 60 * 60;
const HOUR_SECS: u64 = 60 * 60;
const FIVE_MINUTES_SECS: u64 = 5 * 60;
const PURPLE: &str = "#9467bd";

/// Builds the workshop [`Topology`] from a [`ProvisioningConfig`].
pub struct WorkshopBlueprint<'a> {
    config: &'a ProvisioningConfig,
}

impl<'a> WorkshopBlueprint<'a> {
    pub fn new(config: &'a ProvisioningConfig) -> Self {
        Self { config }
    }

    pub fn build(&self) -> Result<Topology> {
        let config = self.config;
        let region = config.region()?;
        let image_repo_uri = config.image_repo_uri()?;

        let mut pipeline = Pipeline::new(&config.pipeline_name);
        let mut topology_connection = None;
        let mut topology_repository = None;

        let (source_name, trigger) = match &config.source {
            SourceConfig::Connection {
                connection_name,
                provider_type,
                owner,
                repo,
                branch,
                connection_arn,
            } => {
                if connection_arn.is_none() {
                    topology_connection = Some(SourceConnection {
                        connection_name: connection_name.clone(),
                        provider_type: *provider_type,
                    });
                }
                (
                    provider_type.as_str().to_string(),
                    SourceTrigger::Connection {
                        connection_name: connection_name.clone(),
                        provider_type: *provider_type,
                        owner: owner.clone(),
                        repo: repo.clone(),
                        branch: branch.clone(),
                        trigger_on_push: true,
                        connection_arn: connection_arn.clone(),
                    },
                )
            }
            SourceConfig::ManagedRepository {
                repository_name,
                branch,
                description,
            } => {
                topology_repository = Some(ManagedRepository {
                    repository_name: repository_name.clone(),
                    description: description.clone(),
                });
                (
                    "CodeCommit".to_string(),
                    SourceTrigger::ManagedRepository {
                        repository_name: repository_name.clone(),
                        branch: branch.clone(),
                    },
                )
            }
        };

        pipeline.add_stage(
            STAGE_SOURCE,
            vec![Action::source(source_name, trigger, ArtifactName::source_output())],
        )?;
        pipeline.add_stage(
            STAGE_CODE_QUALITY,
            vec![Action::build(
                ACTION_UNIT_TEST,
                PROJECT_CODE_QUALITY,
                ArtifactName::source_output(),
                vec![ArtifactName::unit_test_output()],
            )],
        )?;
        pipeline.add_stage(
            STAGE_DOCKER_BUILD,
            vec![Action::build(
                ACTION_DOCKER_BUILD,
                PROJECT_DOCKER_BUILD,
                ArtifactName::source_output(),
                vec![ArtifactName::docker_build_output()],
            )],
        )?;
        pipeline.add_stage(
            STAGE_DEPLOY_TEST,
            vec![Action::ecs_deploy(
                ACTION_DEPLOY_TEST,
                &config.test_service,
                ArtifactName::docker_build_output(),
            )],
        )?;

        let production = &config.production;
        pipeline.add_stage(
            STAGE_DEPLOY_PRODUCTION,
            vec![
                Action::manual_approval(ACTION_APPROVE).with_run_order(1),
                Action::blue_green_deploy(
                    ACTION_BLUE_GREEN,
                    &production.deployment_group,
                    ArtifactName::source_output(),
                )
                .with_run_order(2),
            ],
        )?;

        let mut topology = Topology::new(pipeline);
        topology.connection = topology_connection;
        topology.repository = topology_repository;
        topology.projects = self.projects(region, image_repo_uri);
        topology.deployment_groups = vec![DeploymentGroup {
            application: production.application.clone(),
            name: production.deployment_group.clone(),
            service: production.service.clone(),
            blue_target_group: production.blue_target_group.clone(),
            green_target_group: production.green_target_group.clone(),
            listener: production.listener.clone(),
            test_listener: production.test_listener.clone(),
            config: production.traffic_shift,
        }];
        if let Some(signer) = &config.signer {
            topology.parameters.push(StringParameter {
                id: "SignerProfileARN".to_string(),
                parameter_name: "signer-profile-arn".to_string(),
                value: signer.profile_arn.clone(),
            });
        }
        topology.observability = config.notification_email.as_deref().map(overlay);

        info!(
            pipeline = %topology.pipeline.name,
            stages = topology.pipeline.stages.len(),
            observability = topology.observability.is_some(),
            signer = config.signer.is_some(),
            "blueprint built"
        );
        Ok(topology)
    }

    fn projects(&self, region: &str, image_repo_uri: &str) -> Vec<BuildProject> {
        let code_quality = BuildProject::new(PROJECT_CODE_QUALITY, "./buildspec_test.yml")
            .with_environment(BuildEnvironment {
                image: STANDARD_5_0.to_string(),
                compute_type: ComputeType::Large,
                privileged: true,
                ..BuildEnvironment::default()
            });

        let mut docker = BuildProject::new(PROJECT_DOCKER_BUILD, "./buildspec_docker.yml")
            .with_environment(BuildEnvironment {
                image: STANDARD_5_0.to_string(),
                compute_type: ComputeType::Large,
                privileged: true,
                ..BuildEnvironment::default()
            })
            .with_variable("IMAGE_TAG", EnvVar::plaintext(&self.config.image_tag))
            .with_variable("IMAGE_REPO_URI", EnvVar::plaintext(image_repo_uri))
            .with_variable("AWS_DEFAULT_REGION", EnvVar::plaintext(region));
        docker.add_to_role_policy(PolicyStatement::ecr_read_write());
        if self.config.signer.is_some() {
            docker.add_to_role_policy(PolicyStatement::ssm_parameter_read());
            docker.add_to_role_policy(PolicyStatement::signer_operations());
        }

        vec![code_quality, docker]
    }
}

/// Build dashboard plus the failure topic and rule.
pub fn overlay(email: &str) -> ObservabilityOverlay {
    let month = 30 * DAY_SECS;

    let dashboard = Dashboard {
        name: DASHBOARD_NAME.to_string(),
        widgets: vec![
            Widget::Graph {
                title: "Build Successes and Failures".to_string(),
                width: 6,
                height: 6,
                view: GraphView::Pie,
                metrics: vec![
                    Metric::build("SucceededBuilds", Statistic::Sum, "Succeeded Builds", month),
                    Metric::build("FailedBuilds", Statistic::Sum, "Failed Builds", month),
                ],
            },
            Widget::SingleValue {
                title: "Successes and Failures".to_string(),
                width: 6,
                height: 6,
                metrics: vec![Metric::build("Builds", Statistic::Sum, "Builds", month)],
            },
            Widget::Gauge {
                title: "Average Build Time".to_string(),
                width: 6,
                height: 6,
                metrics: vec![Metric::build("Duration", Statistic::Average, "Duration", HOUR_SECS)],
                min: 0,
                max: 300,
            },
            Widget::Gauge {
                title: "Build Queue Duration".to_string(),
                width: 6,
                height: 6,
                metrics: vec![Metric::build(
                    "QueuedDuration",
                    Statistic::Average,
                    "Duration",
                    HOUR_SECS,
                )],
                min: 0,
                max: 60,
            },
            Widget::Graph {
                title: "Checkout Duration".to_string(),
                width: 24,
                height: 5,
                view: GraphView::TimeSeries,
                metrics: vec![Metric::build(
                    "DownloadSourceDuration",
                    Statistic::Maximum,
                    "Duration",
                    FIVE_MINUTES_SECS,
                )
                .with_color(PURPLE)],
            },
        ],
    };

    let mut topic = Topic::new(FAILURE_TOPIC);
    topic.add_subscription(Subscription::Email(email.to_string()));

    ObservabilityOverlay {
        dashboard,
        topic,
        rules: vec![AlertRule::pipeline_failure(FAILURE_TOPIC)],
    }
}
