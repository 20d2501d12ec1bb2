//! Source triggers: external host connections and managed repositories.

use serde::{Deserialize, Serialize};

/// External source host reached through a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    GitHub,
    Bitbucket,
    GitLab,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::GitHub => "GitHub",
            ProviderType::Bitbucket => "Bitbucket",
            ProviderType::GitLab => "GitLab",
        }
    }
}

/// Where the pipeline's source snapshot comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceTrigger {
    /// Repository on an external host, reached through a connection resource.
    Connection {
        connection_name: String,
        provider_type: ProviderType,
        owner: String,
        repo: String,
        branch: String,
        trigger_on_push: bool,
        /// ARN of an existing connection. When absent, the connection declared
        /// alongside the pipeline is referenced.
        connection_arn: Option<String>,
    },

    /// Repository hosted by the provider's own source control service.
    ManagedRepository {
        repository_name: String,
        branch: String,
    },
}

impl SourceTrigger {
    pub fn branch(&self) -> &str {
        match self {
            SourceTrigger::Connection { branch, .. } => branch,
            SourceTrigger::ManagedRepository { branch, .. } => branch,
        }
    }

    /// Whether a push to the branch starts an execution.
    ///
    /// Managed repositories always trigger through change events.
    pub fn triggers_on_push(&self) -> bool {
        match self {
            SourceTrigger::Connection {
                trigger_on_push, ..
            } => *trigger_on_push,
            SourceTrigger::ManagedRepository { .. } => true,
        }
    }

    /// Short description used in plans and logs, e.g. `GitHub:owner/repo@main`.
    pub fn describe(&self) -> String {
        match self {
            SourceTrigger::Connection {
                provider_type,
                owner,
                repo,
                branch,
                ..
            } => format!("{}:{}/{}@{}", provider_type.as_str(), owner, repo, branch),
            SourceTrigger::ManagedRepository {
                repository_name,
                branch,
            } => format!("managed:{}@{}", repository_name, branch),
        }
    }
}

/// Connection resource declared next to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConnection {
    pub connection_name: String,
    pub provider_type: ProviderType,
}

/// Managed source-control repository declared next to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRepository {
    pub repository_name: String,
    pub description: Option<String>,
}

impl ManagedRepository {
    /// Clone URL in the git-remote-codecommit form.
    pub fn clone_url_grc(&self, region: &str) -> String {
        format!("codecommit::{}://{}", region, self.repository_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github() -> SourceTrigger {
        SourceTrigger::Connection {
            connection_name: "CICD_Workshop_Connection".to_string(),
            provider_type: ProviderType::GitHub,
            owner: "octo".to_string(),
            repo: "CICD_Workshop".to_string(),
            branch: "main".to_string(),
            trigger_on_push: true,
            connection_arn: None,
        }
    }

    #[test]
    fn test_connection_trigger() {
        let trigger = github();
        assert_eq!(trigger.branch(), "main");
        assert!(trigger.triggers_on_push());
        assert_eq!(trigger.describe(), "GitHub:octo/CICD_Workshop@main");
    }

    #[test]
    fn test_managed_repository_always_triggers() {
        let trigger = SourceTrigger::ManagedRepository {
            repository_name: "CICD_Workshop".to_string(),
            branch: "main".to_string(),
        };
        assert!(trigger.triggers_on_push());
        assert_eq!(trigger.describe(), "managed:CICD_Workshop@main");
    }

    #[test]
    fn test_clone_url_grc() {
        let repo = ManagedRepository {
            repository_name: "CICD_Workshop".to_string(),
            description: None,
        };
        assert_eq!(
            repo.clone_url_grc("us-east-2"),
            "codecommit::us-east-2://CICD_Workshop"
        );
    }
}
