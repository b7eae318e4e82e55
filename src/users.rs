//! User reconciliation: identity creation with credential material, and
//! ordered teardown of removed identities.

use base64::Engine as _;
use futures::future::join_all;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::diff::diff;
use crate::error::IamError;
use crate::groups::GroupReconciler;
use crate::iam::IamOps;
use crate::mail::{MailJob, NotificationQueue};
use crate::policies::EntityFailure;

/// Usernames carrying this suffix get programmatic access keys instead of
/// an interactive login profile.
const KEYS_SUFFIX: &str = "_keys";

/// Account-scoped inputs the user reconciler needs beyond the capability.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub account: String,
    /// Registered project contact, from the account registry
    pub project_mail: Option<String>,
}

/// Aggregate result of one user reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserOutcome {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<EntityFailure>,
}

pub struct UserReconciler {
    sender: String,
    mail_domain: Option<String>,
}

impl UserReconciler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            sender: config.mail_sender.clone(),
            mail_domain: config.mail_domain.clone(),
        }
    }

    /// Reconcile the account's users against the desired name set.
    /// Per-user failures are isolated; a listing failure aborts the stage.
    pub async fn apply(
        &self,
        desired: &[String],
        iam: &dyn IamOps,
        context: &AccountContext,
        groups: &GroupReconciler,
        queue: &NotificationQueue,
    ) -> Result<UserOutcome, IamError> {
        let observed = iam.list_users().await?;
        let d = diff(desired, &observed);
        info!(
            account = %context.account,
            to_create = d.to_create.len(),
            to_delete = d.to_delete.len(),
            "reconciling users"
        );

        let mut outcome = UserOutcome::default();

        // Unrelated users are independent once the diff is fixed; creations
        // and deletions fan out and are awaited jointly.
        let creations = join_all(
            d.to_create
                .iter()
                .map(|user| self.create_user(user, iam, context, queue)),
        )
        .await;
        for (user, result) in d.to_create.iter().zip(creations) {
            match result {
                Ok(()) => outcome.created.push(user.clone()),
                Err(err) => {
                    warn!(user = %user, error = %err, "failed to create user");
                    outcome.failed.push(EntityFailure::new(user, err));
                }
            }
        }

        let deletions = join_all(
            d.to_delete
                .iter()
                .map(|user| self.delete_user(user, iam, groups)),
        )
        .await;
        for (user, result) in d.to_delete.iter().zip(deletions) {
            match result {
                Ok(()) => outcome.deleted.push(user.clone()),
                Err(err) => {
                    warn!(user = %user, error = %err, "failed to delete user");
                    outcome.failed.push(EntityFailure::new(user, err));
                }
            }
        }

        Ok(outcome)
    }

    /// Create the identity plus its access method, and queue exactly one
    /// credential notification when a recipient can be resolved.
    async fn create_user(
        &self,
        user: &str,
        iam: &dyn IamOps,
        context: &AccountContext,
        queue: &NotificationQueue,
    ) -> Result<(), IamError> {
        info!(user = %user, account = %context.account, "creating user");
        iam.create_user(user).await?;

        if user.ends_with(KEYS_SUFFIX) {
            let key = iam.create_access_key(user).await?;
            match self.key_recipients(context) {
                Some(recipients) => {
                    queue.enqueue(MailJob::access_keys(recipients, user, &context.account, &key));
                }
                None => {
                    warn!(user = %user, account = %context.account, "no recipient for access keys, skipping notification");
                }
            }
        } else {
            let password = generate_password();
            iam.create_login_profile(user, &password, true).await?;
            match self.login_recipients(user) {
                Some(recipients) => {
                    queue.enqueue(MailJob::login_credentials(
                        recipients,
                        user,
                        &context.account,
                        &password,
                    ));
                }
                None => {
                    warn!(user = %user, "no mail domain configured, skipping notification");
                }
            }
        }

        Ok(())
    }

    /// Tear down an identity: group memberships first (the service rejects
    /// deleting a user that still belongs to a group), then the access
    /// method, then the identity itself.
    async fn delete_user(
        &self,
        user: &str,
        iam: &dyn IamOps,
        groups: &GroupReconciler,
    ) -> Result<(), IamError> {
        info!(user = %user, "deleting user");

        let memberships = iam.list_groups_for_user(user).await?;
        let removals = join_all(
            memberships
                .iter()
                .map(|group| groups.remove_member(user, group, iam)),
        )
        .await;
        // Every removal has settled here; surface the first failure only
        // after all of them resolved.
        for (group, result) in memberships.iter().zip(removals) {
            if let Err(err) = result {
                warn!(user = %user, group = %group, error = %err, "failed to remove membership");
                return Err(err);
            }
        }

        self.revoke_access(user, iam).await?;
        iam.delete_user(user).await
    }

    /// Revoke the identity's access method. A missing profile or key set
    /// already satisfies the goal state and is not an error.
    async fn revoke_access(&self, user: &str, iam: &dyn IamOps) -> Result<(), IamError> {
        let result = if user.ends_with(KEYS_SUFFIX) {
            iam.delete_access_keys(user).await
        } else {
            iam.delete_login_profile(user).await
        };
        match result {
            Err(IamError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn login_recipients(&self, user: &str) -> Option<Vec<String>> {
        let domain = self.mail_domain.as_ref()?;
        Some(vec![self.sender.clone(), format!("{user}@{domain}")])
    }

    fn key_recipients(&self, context: &AccountContext) -> Option<Vec<String>> {
        match &context.project_mail {
            Some(mail) => Some(vec![mail.clone()]),
            None if !self.sender.is_empty() => Some(vec![self.sender.clone()]),
            None => None,
        }
    }
}

/// 16 bytes from the OS random source, base64-encoded for transport.
fn generate_password() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIam;

    fn reconciler() -> UserReconciler {
        UserReconciler {
            sender: "ops@example.com".to_string(),
            mail_domain: Some("example.com".to_string()),
        }
    }

    fn context(project_mail: Option<&str>) -> AccountContext {
        AccountContext {
            account: "staging".to_string(),
            project_mail: project_mail.map(|m| m.to_string()),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_login_user_gets_profile_and_mail() {
        let iam = MemoryIam::new();
        let queue = NotificationQueue::new();

        let outcome = reconciler()
            .apply(
                &names(&["alice"]),
                &iam,
                &context(None),
                &GroupReconciler::new(),
                &queue,
            )
            .await
            .unwrap();

        assert_eq!(outcome.created, names(&["alice"]));
        assert_eq!(queue.len(), 1);
        let ops = iam.operations();
        assert!(ops.iter().any(|op| op.starts_with("create_login_profile alice")));
        assert!(!ops.iter().any(|op| op.starts_with("create_access_key")));
    }

    #[tokio::test]
    async fn test_keys_user_gets_access_key_mail_to_project_contact() {
        let iam = MemoryIam::new();
        let queue = NotificationQueue::new();

        reconciler()
            .apply(
                &names(&["ci_keys"]),
                &iam,
                &context(Some("team@example.com")),
                &GroupReconciler::new(),
                &queue,
            )
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
        let ops = iam.operations();
        assert!(ops.iter().any(|op| op.starts_with("create_access_key ci_keys")));
        assert!(!ops.iter().any(|op| op.starts_with("create_login_profile")));
    }

    #[tokio::test]
    async fn test_keys_user_without_contact_falls_back_to_operator() {
        let iam = MemoryIam::new();
        let queue = NotificationQueue::new();

        reconciler()
            .apply(
                &names(&["ci_keys"]),
                &iam,
                &context(None),
                &GroupReconciler::new(),
                &queue,
            )
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_no_mail_domain_skips_notification_but_creates() {
        let iam = MemoryIam::new();
        let queue = NotificationQueue::new();
        let reconciler = UserReconciler {
            sender: "ops@example.com".to_string(),
            mail_domain: None,
        };

        let outcome = reconciler
            .apply(
                &names(&["alice"]),
                &iam,
                &context(None),
                &GroupReconciler::new(),
                &queue,
            )
            .await
            .unwrap();

        assert_eq!(outcome.created, names(&["alice"]));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_memberships_before_identity() {
        let iam = MemoryIam::new();
        iam.seed_user("carol", true);
        iam.seed_group("devs", &["carol"]);
        iam.seed_group("ops", &["carol"]);
        let queue = NotificationQueue::new();

        let outcome = reconciler()
            .apply(&[], &iam, &context(None), &GroupReconciler::new(), &queue)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, names(&["carol"]));
        let ops = iam.operations();
        let removal_devs = ops
            .iter()
            .position(|op| op == "remove_user_from_group carol devs")
            .unwrap();
        let removal_ops = ops
            .iter()
            .position(|op| op == "remove_user_from_group carol ops")
            .unwrap();
        let delete = ops.iter().position(|op| op == "delete_user carol").unwrap();
        assert!(removal_devs < delete);
        assert!(removal_ops < delete);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_login_profile() {
        let iam = MemoryIam::new();
        iam.seed_user("carol", false);
        let queue = NotificationQueue::new();

        let outcome = reconciler()
            .apply(&[], &iam, &context(None), &GroupReconciler::new(), &queue)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, names(&["carol"]));
    }

    #[tokio::test]
    async fn test_failed_membership_removal_blocks_identity_delete() {
        let iam = MemoryIam::new();
        iam.seed_user("carol", false);
        iam.seed_group("devs", &["carol"]);
        iam.inject_failures("remove_user_from_group", 1);
        let queue = NotificationQueue::new();

        let outcome = reconciler()
            .apply(&[], &iam, &context(None), &GroupReconciler::new(), &queue)
            .await
            .unwrap();

        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert!(!iam.operations().iter().any(|op| op == "delete_user carol"));
    }

    #[test]
    fn test_generated_passwords_are_unique_and_encoded() {
        let a = generate_password();
        let b = generate_password();
        assert_ne!(a, b);
        // 16 bytes -> 24 base64 chars including padding
        assert_eq!(a.len(), 24);
        assert!(base64::engine::general_purpose::STANDARD.decode(&a).is_ok());
    }
}
