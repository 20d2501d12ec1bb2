//! Provisioning configuration.
//!
//! Loaded from a TOML file, then overridden from the environment. Values that
//! differ per deployment (region, image repository, notification address)
//! are never baked into the blueprint itself.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::domain::{ProviderType, Result, TopologyError, TrafficShiftPolicy};

/// Region the pipeline is provisioned into.
pub const ENV_CDK_DEFAULT_REGION: &str = "CDK_DEFAULT_REGION";
/// Fallback when `CDK_DEFAULT_REGION` is unset.
pub const ENV_AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const ENV_NOTIFICATION_EMAIL: &str = "TOPOLOGY_NOTIFICATION_EMAIL";
pub const ENV_IMAGE_REPO_URI: &str = "TOPOLOGY_IMAGE_REPO_URI";

/// Source of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Connection {
        #[serde(default = "default_connection_name")]
        connection_name: String,
        #[serde(default = "default_provider_type")]
        provider_type: ProviderType,
        owner: String,
        repo: String,
        #[serde(default = "default_branch")]
        branch: String,
        /// Reuse an existing connection instead of declaring one.
        connection_arn: Option<String>,
    },
    ManagedRepository {
        repository_name: String,
        #[serde(default = "default_branch")]
        branch: String,
        description: Option<String>,
    },
}

fn default_connection_name() -> String {
    "CICD_Workshop_Connection".to_string()
}

fn default_provider_type() -> ProviderType {
    ProviderType::GitHub
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Connection {
            connection_name: default_connection_name(),
            provider_type: default_provider_type(),
            owner: "example-org".to_string(),
            repo: "CICD_Workshop".to_string(),
            branch: default_branch(),
            connection_arn: None,
        }
    }
}

/// Production blue/green wiring. Listeners and target groups are provisioned
/// elsewhere and only referenced here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    pub application: String,
    pub deployment_group: String,
    pub service: String,
    pub blue_target_group: String,
    pub green_target_group: String,
    pub listener: String,
    pub test_listener: String,
    pub traffic_shift: TrafficShiftPolicy,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            application: "my-app".to_string(),
            deployment_group: "my-app-dg".to_string(),
            service: "prod-app-service".to_string(),
            blue_target_group: "prod-app-blue-tg".to_string(),
            green_target_group: "prod-app-green-tg".to_string(),
            listener: "prod-app-listener".to_string(),
            test_listener: "prod-app-test-listener".to_string(),
            traffic_shift: TrafficShiftPolicy::LINEAR_10_PERCENT_EVERY_1_MINUTES,
        }
    }
}

/// Image signing variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub profile_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub region: Option<String>,
    pub pipeline_name: String,
    pub source: SourceConfig,
    pub image_repo_uri: Option<String>,
    pub image_tag: String,
    pub test_service: String,
    pub production: ProductionConfig,
    pub signer: Option<SignerConfig>,
    /// Enables the observability overlay when set.
    pub notification_email: Option<String>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            region: None,
            pipeline_name: "CICD_Pipeline".to_string(),
            source: SourceConfig::default(),
            image_repo_uri: None,
            image_tag: "latest".to_string(),
            test_service: "test-app-service".to_string(),
            production: ProductionConfig::default(),
            signer: None,
            notification_email: None,
        }
    }
}

impl ProvisioningConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `path` (or defaults) and apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading provisioning config");
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(region) = non_empty(ENV_CDK_DEFAULT_REGION) {
            self.region = Some(region);
        } else if self.region.is_none() {
            self.region = non_empty(ENV_AWS_DEFAULT_REGION);
        }
        if let Some(email) = non_empty(ENV_NOTIFICATION_EMAIL) {
            self.notification_email = Some(email);
        }
        if let Some(uri) = non_empty(ENV_IMAGE_REPO_URI) {
            self.image_repo_uri = Some(uri);
        }
    }

    pub fn region(&self) -> Result<&str> {
        self.region
            .as_deref()
            .ok_or_else(|| TopologyError::MissingEnv(ENV_CDK_DEFAULT_REGION.to_string()))
    }

    pub fn image_repo_uri(&self) -> Result<&str> {
        self.image_repo_uri.as_deref().ok_or_else(|| {
            TopologyError::Config(format!(
                "image_repo_uri is required (set it in the config file or {})",
                ENV_IMAGE_REPO_URI
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.pipeline_name, "CICD_Pipeline");
        assert_eq!(config.image_tag, "latest");
        assert!(config.notification_email.is_none());
        assert!(matches!(config.region(), Err(TopologyError::MissingEnv(_))));
        assert!(matches!(config.image_repo_uri(), Err(TopologyError::Config(_))));
    }

    #[test]
    fn test_cdk_region_wins_over_aws_region() {
        let mut config = ProvisioningConfig::default();
        config.apply_env(env(&[
            (ENV_CDK_DEFAULT_REGION, "us-east-2"),
            (ENV_AWS_DEFAULT_REGION, "eu-west-1"),
        ]));
        assert_eq!(config.region().expect("region"), "us-east-2");
    }

    #[test]
    fn test_aws_region_fallback() {
        let mut config = ProvisioningConfig::default();
        config.apply_env(env(&[(ENV_AWS_DEFAULT_REGION, "eu-west-1")]));
        assert_eq!(config.region().expect("region"), "eu-west-1");
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = ProvisioningConfig::default();
        config.notification_email = Some("ops@example.com".to_string());
        config.apply_env(env(&[(ENV_NOTIFICATION_EMAIL, "  ")]));
        assert_eq!(config.notification_email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_toml_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
region = "us-east-2"
pipeline_name = "Shop_Pipeline"
image_repo_uri = "123456789012.dkr.ecr.us-east-2.amazonaws.com/shop"
notification_email = "ops@example.com"

[source]
type = "managed_repository"
repository_name = "Shop"

[production]
deployment_group = "shop-dg"

[production.traffic_shift]
type = "canary"
percent = 20
interval_minutes = 5
"#
        )
        .expect("write");

        let config = ProvisioningConfig::from_file(file.path()).expect("load");
        assert_eq!(config.pipeline_name, "Shop_Pipeline");
        assert_eq!(config.region().expect("region"), "us-east-2");
        assert_eq!(
            config.source,
            SourceConfig::ManagedRepository {
                repository_name: "Shop".to_string(),
                branch: "main".to_string(),
                description: None,
            }
        );
        assert_eq!(config.production.deployment_group, "shop-dg");
        assert_eq!(config.production.application, "my-app");
        assert_eq!(
            config.production.traffic_shift,
            TrafficShiftPolicy::Canary {
                percent: 20,
                interval_minutes: 5
            }
        );
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = ProvisioningConfig::from_toml_str("pipeline_name = [").unwrap_err();
        assert!(matches!(err, TopologyError::ConfigParse(_)));
    }
}
