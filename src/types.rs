//! Core data model: account descriptors and desired-state documents.

use serde::{Deserialize, Serialize};

/// Registry entry for one managed account.
///
/// A missing `role_arn` means the account is either the root/base account
/// (processed without impersonation) or unknown (skipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDescriptor {
    /// Account name, as used in the registry and the state repository
    pub name: String,
    /// Trust role to assume for this account
    pub role_arn: Option<String>,
    /// Project contact for credential notifications
    pub project_mail: Option<String>,
}

impl AccountDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role_arn: None,
            project_mail: None,
        }
    }

    pub fn with_role(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    pub fn with_project_mail(mut self, mail: impl Into<String>) -> Self {
        self.project_mail = Some(mail.into());
        self
    }
}

/// One desired group: its members and the policy attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    pub policy: String,
}

/// One desired managed policy.
///
/// The document is kept as raw JSON; a missing document is a per-policy
/// creation failure, not a parse failure of the whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub document: Option<serde_json::Value>,
}

/// Declarative desired state for one account, assembled from the three
/// documents (users.yml, groups.yml, policies.yml) in the state repository.
/// Immutable input for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}
