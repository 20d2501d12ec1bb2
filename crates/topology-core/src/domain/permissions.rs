//! Policy statements attached to build execution roles.
//!
//! Statements are additive and purely declarative; enforcement happens in the
//! provider's identity system.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One statement of an identity policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource")]
    pub resources: Vec<String>,
}

impl PolicyStatement {
    /// Allow `actions` on every resource.
    pub fn allow_all<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: vec!["*".to_string()],
        }
    }

    /// Image registry read/write, as needed to log in, pull and push images.
    pub fn ecr_read_write() -> Self {
        Self::allow_all([
            "ecr:GetAuthorizationToken",
            "ecr:BatchCheckLayerAvailability",
            "ecr:GetDownloadUrlForLayer",
            "ecr:GetRepositoryPolicy",
            "ecr:DescribeRepositories",
            "ecr:ListImages",
            "ecr:DescribeImages",
            "ecr:BatchGetImage",
            "ecr:InitiateLayerUpload",
            "ecr:UploadLayerPart",
            "ecr:CompleteLayerUpload",
            "ecr:PutImage",
        ])
    }

    /// Parameter store reads (signing profile lookup).
    pub fn ssm_parameter_read() -> Self {
        Self::allow_all(["ssm:GetParametersByPath", "ssm:GetParameters"])
    }

    /// Image signing operations.
    pub fn signer_operations() -> Self {
        Self::allow_all([
            "signer:PutSigningProfile",
            "signer:SignPayload",
            "signer:GetRevocationStatus",
        ])
    }

    pub fn is_wildcard_resource(&self) -> bool {
        self.resources.iter().any(|r| r == "*")
    }

    /// Whether this statement allows `action` (exact or `service:*` match).
    pub fn allows(&self, action: &str) -> bool {
        if self.effect != Effect::Allow {
            return false;
        }
        self.actions.iter().any(|granted| {
            granted == action
                || granted == "*"
                || granted
                    .strip_suffix('*')
                    .is_some_and(|prefix| action.starts_with(prefix))
        })
    }
}

/// Identity policy document: a version and its statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: "2012-10-17".to_string(),
            statement: statements,
        }
    }

    /// Explicit deny wins over any allow.
    pub fn allows(&self, action: &str) -> bool {
        let denied = self.statement.iter().any(|s| {
            s.effect == Effect::Deny && s.actions.iter().any(|a| a == action || a == "*")
        });
        !denied && self.statement.iter().any(|s| s.allows(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecr_statement_covers_push_and_pull() {
        let stmt = PolicyStatement::ecr_read_write();
        assert_eq!(stmt.actions.len(), 12);
        assert!(stmt.is_wildcard_resource());
        assert!(stmt.allows("ecr:PutImage"));
        assert!(stmt.allows("ecr:BatchGetImage"));
        assert!(!stmt.allows("ecr:DeleteRepository"));
    }

    #[test]
    fn test_wildcard_action_prefix() {
        let stmt = PolicyStatement::allow_all(["signer:*"]);
        assert!(stmt.allows("signer:SignPayload"));
        assert!(!stmt.allows("ssm:GetParameters"));
    }

    #[test]
    fn test_document_is_additive_and_deny_wins() {
        let mut doc = PolicyDocument::new(vec![
            PolicyStatement::ssm_parameter_read(),
            PolicyStatement::signer_operations(),
        ]);
        assert!(doc.allows("ssm:GetParameters"));
        assert!(doc.allows("signer:SignPayload"));

        doc.statement.push(PolicyStatement {
            effect: Effect::Deny,
            actions: vec!["signer:SignPayload".to_string()],
            resources: vec!["*".to_string()],
        });
        assert!(!doc.allows("signer:SignPayload"));
        assert!(doc.allows("signer:PutSigningProfile"));
    }

    #[test]
    fn test_statement_serializes_in_policy_shape() {
        let json = serde_json::to_value(PolicyStatement::ssm_parameter_read()).expect("serialize");
        assert_eq!(json["Effect"], "Allow");
        assert_eq!(json["Resource"][0], "*");
        assert_eq!(json["Action"][1], "ssm:GetParameters");
    }
}
