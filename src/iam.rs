//! Identity-service capability boundary.
//!
//! All reconcilers speak to the identity service through [`IamOps`],
//! implemented by the AWS backend in production and by an in-memory
//! fake in tests. Throttling is retried inside the implementation,
//! transparently to callers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IamError;

/// A scoped handle to one account's identity service.
pub type Capability = Arc<dyn IamOps>;

/// A managed policy as seen in a live listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyHandle {
    pub name: String,
    pub arn: String,
}

/// Freshly generated programmatic access credentials.
pub struct AccessKey {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Identity-service primitives used by the reconcilers.
///
/// Listing operations are scoped to the configured identity path prefix.
#[async_trait]
pub trait IamOps: Send + Sync {
    async fn list_users(&self) -> Result<Vec<String>, IamError>;
    async fn create_user(&self, name: &str) -> Result<(), IamError>;
    async fn delete_user(&self, name: &str) -> Result<(), IamError>;

    async fn create_login_profile(
        &self,
        user: &str,
        password: &str,
        reset_required: bool,
    ) -> Result<(), IamError>;
    async fn delete_login_profile(&self, user: &str) -> Result<(), IamError>;

    async fn create_access_key(&self, user: &str) -> Result<AccessKey, IamError>;
    async fn delete_access_keys(&self, user: &str) -> Result<(), IamError>;

    /// Names of the groups the user currently belongs to.
    async fn list_groups_for_user(&self, user: &str) -> Result<Vec<String>, IamError>;
    /// Current members of a group; `NotFound` if the group does not exist.
    async fn group_members(&self, group: &str) -> Result<Vec<String>, IamError>;
    async fn create_group(&self, name: &str) -> Result<(), IamError>;
    async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), IamError>;
    async fn remove_user_from_group(&self, user: &str, group: &str) -> Result<(), IamError>;

    async fn list_policies(&self) -> Result<Vec<PolicyHandle>, IamError>;
    async fn create_policy(&self, name: &str, document: &str) -> Result<PolicyHandle, IamError>;
    /// Delete a policy; rejected while any attachment remains.
    async fn delete_policy(&self, arn: &str) -> Result<(), IamError>;
    /// Names of the groups a policy is currently attached to.
    async fn policy_attachments(&self, arn: &str) -> Result<Vec<String>, IamError>;
    async fn detach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError>;
    async fn attach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError>;
}

impl std::fmt::Debug for AccessKey {
    // Secret material must never reach logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_key_debug_redacts_secret() {
        let key = AccessKey {
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "topsecret".to_string(),
        };
        let rendered = format!("{key:?}");
        assert!(rendered.contains("AKIA123"));
        assert!(!rendered.contains("topsecret"));
    }
}
