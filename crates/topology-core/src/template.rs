//! Synthesis of a [`Topology`] into a provisioning template.
//!
//! The template is a JSON document with `Resources` and `Outputs` sections.
//! `serde_json` keeps object keys sorted, so the serialized body is canonical
//! and its digest is stable for a given topology.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::{
    Action, ActionKind, AlertRule, ArtifactName, BuildProject, DeploymentGroup, EnvVarKind,
    ObservabilityOverlay, PipelineType, Result, SourceTrigger, Topology,
};
use crate::validation::validate;

pub const PIPELINE_ID: &str = "Pipeline";
pub const ARTIFACT_BUCKET_ID: &str = "PipelineArtifactsBucket";
pub const CONNECTION_ID: &str = "SourceConnection";
pub const REPOSITORY_ID: &str = "SourceRepository";

/// A synthesized template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub body: Value,
}

impl Template {
    /// SHA-256 of the canonical (compact, key-sorted) body.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.body)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.body)?)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.body.get("Resources")?.get(logical_id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.body
            .get("Resources")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|resources| resources.iter())
            .filter(move |(_, r)| r.get("Type").and_then(Value::as_str) == Some(kind))
            .map(|(id, r)| (id.as_str(), r))
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.body.get("Outputs")?.get(name)
    }
}

/// Logical id for `name`: alphanumerics only, first letter upper-cased.
pub fn logical_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if upper_next {
                id.push(c.to_ascii_uppercase());
                upper_next = false;
            } else {
                id.push(c);
            }
        } else {
            upper_next = true;
        }
    }
    id
}

fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

fn attribute(logical_id: &str, attr: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attr] })
}

/// Validate `topology` and render it as a template for `region`.
pub fn synthesize(topology: &Topology, region: &str) -> Result<Template> {
    let warnings = validate(topology).into_result()?;
    for warning in &warnings {
        debug!(warning = %warning, "synthesizing despite warning");
    }

    let mut resources = Map::new();
    let mut outputs = Map::new();

    if let Some(connection) = &topology.connection {
        resources.insert(
            CONNECTION_ID.to_string(),
            json!({
                "Type": "AWS::CodeStarConnections::Connection",
                "Properties": {
                    "ConnectionName": connection.connection_name,
                    "ProviderType": connection.provider_type.as_str(),
                }
            }),
        );
        outputs.insert(
            "SourceConnectionArn".to_string(),
            json!({ "Value": attribute(CONNECTION_ID, "ConnectionArn") }),
        );
        outputs.insert(
            "SourceConnectionStatus".to_string(),
            json!({ "Value": attribute(CONNECTION_ID, "ConnectionStatus") }),
        );
    }

    if let Some(repository) = &topology.repository {
        let mut properties = json!({ "RepositoryName": repository.repository_name });
        if let Some(description) = &repository.description {
            properties["RepositoryDescription"] = json!(description);
        }
        resources.insert(
            REPOSITORY_ID.to_string(),
            json!({ "Type": "AWS::CodeCommit::Repository", "Properties": properties }),
        );
        outputs.insert(
            "CodeCommitRepositoryUrl".to_string(),
            json!({ "Value": repository.clone_url_grc(region) }),
        );
    }

    for project in &topology.projects {
        insert_project(&mut resources, project);
    }

    for parameter in &topology.parameters {
        resources.insert(
            logical_id(&parameter.id),
            json!({
                "Type": "AWS::SSM::Parameter",
                "Properties": {
                    "Name": parameter.parameter_name,
                    "Type": "String",
                    "Value": parameter.value,
                }
            }),
        );
    }

    for group in &topology.deployment_groups {
        insert_deployment_group(&mut resources, group);
    }

    resources.insert(
        ARTIFACT_BUCKET_ID.to_string(),
        json!({
            "Type": "AWS::S3::Bucket",
            "Properties": {
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [
                        { "ServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms" } }
                    ]
                }
            }
        }),
    );
    resources.insert(PIPELINE_ID.to_string(), pipeline_resource(topology));

    if let Some(overlay) = &topology.observability {
        insert_overlay(&mut resources, overlay, region);
    }

    let template = Template {
        body: json!({ "Resources": resources, "Outputs": outputs }),
    };
    info!(
        pipeline = %topology.pipeline.name,
        resources = template.body["Resources"].as_object().map_or(0, Map::len),
        "template synthesized"
    );
    Ok(template)
}

fn insert_project(resources: &mut Map<String, Value>, project: &BuildProject) {
    let id = logical_id(&project.id);
    let role_id = format!("{}Role", id);
    let policy_id = format!("{}RoleDefaultPolicy", id);

    let variables: Vec<Value> = project
        .environment
        .variables
        .iter()
        .map(|(name, var)| {
            json!({
                "Name": name,
                "Type": match var.kind {
                    EnvVarKind::Plaintext => "PLAINTEXT",
                    EnvVarKind::ParameterStore => "PARAMETER_STORE",
                },
                "Value": var.value,
            })
        })
        .collect();

    resources.insert(
        role_id.clone(),
        json!({
            "Type": "AWS::IAM::Role",
            "Properties": {
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": "codebuild.amazonaws.com" }
                    }]
                }
            }
        }),
    );
    if !project.policy.is_empty() {
        resources.insert(
            policy_id.clone(),
            json!({
                "Type": "AWS::IAM::Policy",
                "Properties": {
                    "PolicyName": policy_id,
                    "PolicyDocument": project.role_policy(),
                    "Roles": [reference(&role_id)],
                }
            }),
        );
    }
    resources.insert(
        id,
        json!({
            "Type": "AWS::CodeBuild::Project",
            "Properties": {
                "Name": project.id,
                "ServiceRole": attribute(&role_id, "Arn"),
                "Source": {
                    "Type": "CODEPIPELINE",
                    "BuildSpec": project.buildspec.to_string_lossy(),
                },
                "Artifacts": { "Type": "CODEPIPELINE" },
                "Environment": {
                    "Type": "LINUX_CONTAINER",
                    "Image": project.environment.image,
                    "ComputeType": project.environment.compute_type.as_str(),
                    "PrivilegedMode": project.environment.privileged,
                    "EnvironmentVariables": variables,
                }
            }
        }),
    );
}

fn insert_deployment_group(resources: &mut Map<String, Value>, group: &DeploymentGroup) {
    let app_id = logical_id(&group.application);
    resources.insert(
        app_id.clone(),
        json!({
            "Type": "AWS::CodeDeploy::Application",
            "Properties": { "ApplicationName": group.application, "ComputePlatform": "ECS" }
        }),
    );
    resources.insert(
        logical_id(&group.name),
        json!({
            "Type": "AWS::CodeDeploy::DeploymentGroup",
            "Properties": {
                "ApplicationName": reference(&app_id),
                "DeploymentGroupName": group.name,
                "DeploymentConfigName": group.config.config_name(),
                "DeploymentStyle": {
                    "DeploymentType": "BLUE_GREEN",
                    "DeploymentOption": "WITH_TRAFFIC_CONTROL",
                },
                "ECSServices": [{ "ServiceName": group.service }],
                "LoadBalancerInfo": {
                    "TargetGroupPairInfoList": [{
                        "TargetGroups": [
                            { "Name": group.blue_target_group },
                            { "Name": group.green_target_group },
                        ],
                        "ProdTrafficRoute": { "ListenerArns": [group.listener] },
                        "TestTrafficRoute": { "ListenerArns": [group.test_listener] },
                    }]
                },
                "AutoRollbackConfiguration": { "Enabled": false },
            }
        }),
    );
}

fn pipeline_resource(topology: &Topology) -> Value {
    let pipeline = &topology.pipeline;
    let stages: Vec<Value> = pipeline
        .stages
        .iter()
        .map(|stage| {
            let actions: Vec<Value> = stage
                .actions
                .iter()
                .map(|action| action_declaration(topology, action))
                .collect();
            json!({ "Name": stage.name, "Actions": actions })
        })
        .collect();

    json!({
        "Type": "AWS::CodePipeline::Pipeline",
        "Properties": {
            "Name": pipeline.name,
            "PipelineType": match pipeline.pipeline_type {
                PipelineType::V1 => "V1",
                PipelineType::V2 => "V2",
            },
            "ExecutionMode": pipeline.execution_mode.as_str(),
            "ArtifactStore": { "Type": "S3", "Location": reference(ARTIFACT_BUCKET_ID) },
            "Stages": stages,
        }
    })
}

fn action_declaration(topology: &Topology, action: &Action) -> Value {
    let configuration = match &action.kind {
        ActionKind::Source(source) => match &source.trigger {
            SourceTrigger::Connection {
                owner,
                repo,
                branch,
                trigger_on_push,
                connection_arn,
                ..
            } => json!({
                "ConnectionArn": connection_arn
                    .as_ref()
                    .map(|arn| json!(arn))
                    .unwrap_or_else(|| attribute(CONNECTION_ID, "ConnectionArn")),
                "FullRepositoryId": format!("{}/{}", owner, repo),
                "BranchName": branch,
                "DetectChanges": trigger_on_push,
            }),
            SourceTrigger::ManagedRepository {
                repository_name,
                branch,
            } => json!({
                "RepositoryName": repository_name,
                "BranchName": branch,
                "PollForSourceChanges": false,
            }),
        },
        ActionKind::Build(build) => {
            json!({ "ProjectName": reference(&logical_id(&build.project)) })
        }
        ActionKind::EcsDeploy(deploy) => json!({ "ServiceName": deploy.service }),
        ActionKind::BlueGreenDeploy(deploy) => json!({
            "ApplicationName": topology
                .deployment_group(&deploy.deployment_group)
                .map(|group| group.application.as_str()),
            "DeploymentGroupName": deploy.deployment_group,
            "TaskDefinitionTemplateArtifact": deploy.task_definition_template_input.as_str(),
            "AppSpecTemplateArtifact": deploy.app_spec_template_input.as_str(),
        }),
        ActionKind::ManualApproval(approval) => {
            let mut config = Map::new();
            if let Some(topic) = &approval.notify_topic {
                config.insert("NotificationArn".to_string(), reference(&logical_id(topic)));
            }
            if let Some(comment) = &approval.comment {
                config.insert("CustomData".to_string(), json!(comment));
            }
            Value::Object(config)
        }
    };

    let artifact = |name: &&ArtifactName| json!({ "Name": name.as_str() });
    let inputs: Vec<Value> = action.inputs().iter().map(artifact).collect();
    let outputs: Vec<Value> = action.outputs().iter().map(artifact).collect();

    json!({
        "Name": action.name,
        "RunOrder": action.run_order,
        "ActionTypeId": {
            "Category": action.category().as_str(),
            "Owner": "AWS",
            "Provider": action.kind.provider(),
            "Version": "1",
        },
        "Configuration": configuration,
        "InputArtifacts": inputs,
        "OutputArtifacts": outputs,
    })
}

fn insert_overlay(
    resources: &mut Map<String, Value>,
    overlay: &ObservabilityOverlay,
    region: &str,
) {
    let body = overlay.dashboard.body(region).to_string();
    resources.insert(
        logical_id(&overlay.dashboard.name),
        json!({
            "Type": "AWS::CloudWatch::Dashboard",
            "Properties": { "DashboardName": overlay.dashboard.name, "DashboardBody": body }
        }),
    );

    let topic_id = logical_id(&overlay.topic.name);
    resources.insert(
        topic_id.clone(),
        json!({
            "Type": "AWS::SNS::Topic",
            "Properties": {
                "TopicName": overlay.topic.name,
                "DisplayName": overlay.topic.display_name,
            }
        }),
    );
    for (index, subscription) in overlay.topic.subscriptions.iter().enumerate() {
        resources.insert(
            format!("{}Subscription{}", topic_id, index),
            json!({
                "Type": "AWS::SNS::Subscription",
                "Properties": {
                    "Protocol": "email",
                    "Endpoint": subscription.endpoint(),
                    "TopicArn": reference(&topic_id),
                }
            }),
        );
    }

    for rule in &overlay.rules {
        resources.insert(logical_id(&rule.name), rule_resource(rule));
    }
}

/// Events rule with an input transformer built from the rule's message.
fn rule_resource(rule: &AlertRule) -> Value {
    let mut paths = Map::new();
    let mut text = rule.message.0.clone();
    for path in rule.message.paths() {
        let key = path.replace('.', "-");
        text = text.replace(&format!("<$.{}>", path), &format!("<{}>", key));
        paths.insert(key, json!(format!("$.{}", path)));
    }

    json!({
        "Type": "AWS::Events::Rule",
        "Properties": {
            "Name": rule.name,
            "Description": rule.description,
            "EventPattern": rule.pattern,
            "State": "ENABLED",
            "Targets": [{
                "Id": "Target0",
                "Arn": reference(&logical_id(&rule.topic)),
                "InputTransformer": {
                    "InputPathsMap": paths,
                    "InputTemplate": Value::String(text).to_string(),
                }
            }]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ArtifactName, BuildEnvironment, Dashboard, EnvVar, Pipeline, PolicyStatement,
        ProviderType, SourceConnection, Subscription, Topic, TrafficShiftPolicy,
    };

    fn topology() -> Topology {
        let mut pipeline = Pipeline::new("CICD_Pipeline");
        pipeline
            .add_stage(
                "Source",
                vec![Action::source(
                    "GitHub",
                    SourceTrigger::Connection {
                        connection_name: "CICD_Workshop_Connection".to_string(),
                        provider_type: ProviderType::GitHub,
                        owner: "example-org".to_string(),
                        repo: "CICD_Workshop".to_string(),
                        branch: "main".to_string(),
                        trigger_on_push: true,
                        connection_arn: None,
                    },
                    ArtifactName::source_output(),
                )],
            )
            .expect("source stage");
        pipeline
            .add_stage(
                "Docker-Build",
                vec![Action::build(
                    "Docker-Build",
                    "DockerBuild",
                    ArtifactName::source_output(),
                    vec![ArtifactName::docker_build_output()],
                )],
            )
            .expect("build stage");
        pipeline
            .add_stage(
                "Deploy-Production",
                vec![
                    Action::manual_approval("Approve-Prod-Deploy"),
                    Action::blue_green_deploy(
                        "ABlueGreen-deployECS",
                        "my-app-dg",
                        ArtifactName::source_output(),
                    )
                    .with_run_order(2),
                ],
            )
            .expect("prod stage");

        let mut project = BuildProject::new("DockerBuild", "./buildspec_docker.yml")
            .with_environment(BuildEnvironment {
                privileged: true,
                ..BuildEnvironment::default()
            })
            .with_variable("IMAGE_TAG", EnvVar::plaintext("latest"));
        project.add_to_role_policy(PolicyStatement::ecr_read_write());

        let mut topology = Topology::new(pipeline);
        topology.connection = Some(SourceConnection {
            connection_name: "CICD_Workshop_Connection".to_string(),
            provider_type: ProviderType::GitHub,
        });
        topology.projects.push(project);
        topology.deployment_groups.push(DeploymentGroup {
            application: "my-app".to_string(),
            name: "my-app-dg".to_string(),
            service: "prod-app-service".to_string(),
            blue_target_group: "blue".to_string(),
            green_target_group: "green".to_string(),
            listener: "listener".to_string(),
            test_listener: "test-listener".to_string(),
            config: TrafficShiftPolicy::LINEAR_10_PERCENT_EVERY_1_MINUTES,
        });
        topology
    }

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id("my-app-dg"), "MyAppDg");
        assert_eq!(logical_id("CICD_Dashboard"), "CICDDashboard");
        assert_eq!(logical_id("DockerBuild"), "DockerBuild");
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = synthesize(&topology(), "us-east-2").expect("synth");
        let b = synthesize(&topology(), "us-east-2").expect("synth");
        assert_eq!(a.digest().expect("digest"), b.digest().expect("digest"));
        assert_eq!(a.digest().expect("digest").len(), 64);

        let c = synthesize(&topology(), "eu-west-1").expect("synth");
        assert_eq!(
            a.digest().expect("digest"),
            c.digest().expect("digest"),
            "region only feeds outputs and dashboards"
        );
    }

    #[test]
    fn test_pipeline_stages_and_run_order() {
        let template = synthesize(&topology(), "us-east-2").expect("synth");
        let pipeline = template.resource(PIPELINE_ID).expect("pipeline");
        let stages = pipeline["Properties"]["Stages"].as_array().expect("stages");
        assert_eq!(stages.len(), 3);
        let prod = &stages[2]["Actions"];
        assert_eq!(prod[0]["RunOrder"], 1);
        assert_eq!(prod[1]["RunOrder"], 2);
        assert_eq!(prod[1]["ActionTypeId"]["Provider"], "CodeDeployToECS");
        assert_eq!(prod[1]["Configuration"]["ApplicationName"], "my-app");
        assert_eq!(pipeline["Properties"]["ExecutionMode"], "QUEUED");
    }

    #[test]
    fn test_role_policy_rendered() {
        let template = synthesize(&topology(), "us-east-2").expect("synth");
        let policy = template
            .resource("DockerBuildRoleDefaultPolicy")
            .expect("policy");
        let statements = &policy["Properties"]["PolicyDocument"]["Statement"];
        assert_eq!(statements[0]["Resource"][0], "*");
        assert_eq!(statements[0]["Action"].as_array().map(Vec::len), Some(12));
    }

    #[test]
    fn test_connection_outputs() {
        let template = synthesize(&topology(), "us-east-2").expect("synth");
        assert!(template.output("SourceConnectionArn").is_some());
        assert!(template.output("SourceConnectionStatus").is_some());
        assert!(template.output("CodeCommitRepositoryUrl").is_none());
    }

    #[test]
    fn test_failure_rule_input_transformer() {
        let mut topology = topology();
        let mut topic = Topic::new("BuildFailure");
        topic.add_subscription(Subscription::Email("ops@example.com".to_string()));
        topology.observability = Some(ObservabilityOverlay {
            dashboard: Dashboard {
                name: "CICD_Dashboard".to_string(),
                widgets: Vec::new(),
            },
            topic,
            rules: vec![AlertRule::pipeline_failure("BuildFailure")],
        });

        let template = synthesize(&topology, "us-east-2").expect("synth");
        let rule = template.resource("PipelineFailureRule").expect("rule");
        let transformer = &rule["Properties"]["Targets"][0]["InputTransformer"];
        assert_eq!(transformer["InputPathsMap"]["detail-pipeline"], "$.detail.pipeline");
        let input = transformer["InputTemplate"].as_str().expect("template");
        assert!(input.contains("<detail-execution-id>"));
        assert_eq!(template.resources_of_type("AWS::SNS::Subscription").count(), 1);
    }

    #[test]
    fn test_invalid_topology_is_not_synthesized() {
        let mut topology = topology();
        topology.deployment_groups.clear();
        assert!(synthesize(&topology, "us-east-2").is_err());
    }
}
