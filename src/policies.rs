//! Managed-policy reconciliation.
//!
//! Policy documents are immutable once created and the service bounds the
//! number of versions, so no content diff is attempted. Every pass deletes
//! all currently managed policies (detaching them first, since deletion is
//! rejected while attachments remain) and recreates the desired set from
//! scratch. Groups referencing an old ARN transiently lose that attachment
//! until the group reconciler re-attaches by name afterwards; this is a
//! documented limitation of the full-replace scheme.

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::IamError;
use crate::iam::{IamOps, PolicyHandle};
use crate::types::PolicySpec;

/// Aggregate result of one full-replace pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyOutcome {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    /// Per-policy failures; siblings proceed.
    pub failed: Vec<EntityFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityFailure {
    pub name: String,
    pub error: String,
}

impl EntityFailure {
    pub fn new(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PolicyReconciler;

impl PolicyReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Replace all managed policies with the desired set.
    ///
    /// All deletions complete before any creation starts. A listing
    /// failure aborts the stage; per-policy failures do not.
    pub async fn apply(
        &self,
        desired: &[PolicySpec],
        iam: &dyn IamOps,
    ) -> Result<PolicyOutcome, IamError> {
        let existing = iam.list_policies().await?;
        info!(
            existing = existing.len(),
            desired = desired.len(),
            "replacing managed policies"
        );

        let mut outcome = PolicyOutcome::default();

        let deletions = join_all(
            existing
                .iter()
                .map(|policy| self.remove_policy(policy, iam)),
        )
        .await;
        for (policy, result) in existing.iter().zip(deletions) {
            match result {
                Ok(()) => outcome.deleted.push(policy.name.clone()),
                Err(err) => {
                    warn!(policy = %policy.name, error = %err, "failed to remove policy");
                    outcome.failed.push(EntityFailure::new(&policy.name, err));
                }
            }
        }

        let creations = join_all(desired.iter().map(|spec| self.create_policy(spec, iam))).await;
        for (spec, result) in desired.iter().zip(creations) {
            match result {
                Ok(()) => outcome.created.push(spec.name.clone()),
                Err(err) => {
                    warn!(policy = %spec.name, error = %err, "failed to create policy");
                    outcome.failed.push(EntityFailure::new(&spec.name, err));
                }
            }
        }

        Ok(outcome)
    }

    /// All current policies whose name matches, from a fresh listing.
    ///
    /// Never cached: policies are deleted and recreated every pass, so a
    /// stale ARN is incorrect by construction.
    pub async fn matching_policies(
        &self,
        name: &str,
        iam: &dyn IamOps,
    ) -> Result<Vec<PolicyHandle>, IamError> {
        let policies = iam.list_policies().await?;
        Ok(policies.into_iter().filter(|p| p.name == name).collect())
    }

    /// Detach a policy from every group holding it, then delete it.
    async fn remove_policy(&self, policy: &PolicyHandle, iam: &dyn IamOps) -> Result<(), IamError> {
        let holders = iam.policy_attachments(&policy.arn).await?;
        for group in &holders {
            iam.detach_group_policy(group, &policy.arn).await?;
        }
        info!(policy = %policy.name, detached = holders.len(), "deleting policy");
        iam.delete_policy(&policy.arn).await
    }

    async fn create_policy(&self, spec: &PolicySpec, iam: &dyn IamOps) -> Result<(), IamError> {
        let document = spec
            .document
            .as_ref()
            .filter(|doc| doc.is_object())
            .ok_or_else(|| IamError::InvalidPolicyDocument(spec.name.clone()))?;
        let body = serde_json::to_string(document)
            .map_err(|_| IamError::InvalidPolicyDocument(spec.name.clone()))?;

        iam.create_policy(&spec.name, &body).await?;
        info!(policy = %spec.name, "policy created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIam;
    use serde_json::json;

    fn spec(name: &str) -> PolicySpec {
        PolicySpec {
            name: name.to_string(),
            document: Some(json!({"Version": "2012-10-17", "Statement": []})),
        }
    }

    #[tokio::test]
    async fn test_full_replace_deletes_before_creating() {
        let iam = MemoryIam::new();
        iam.seed_group("devs", &[]);
        let arn_a = iam.seed_policy("old-a");
        let arn_b = iam.seed_policy("old-b");
        iam.seed_attachment("devs", &arn_a);

        let outcome = PolicyReconciler::new()
            .apply(&[spec("fresh")], &iam)
            .await
            .unwrap();

        assert_eq!(outcome.deleted.len(), 2);
        assert_eq!(outcome.created, vec!["fresh".to_string()]);
        assert!(outcome.failed.is_empty());
        assert_eq!(iam.policy_names(), vec!["fresh".to_string()]);

        // Detach must precede the attached policy's delete, and every
        // delete must precede the first create.
        let ops = iam.operations();
        let detach = ops
            .iter()
            .position(|op| op.starts_with(&format!("detach_group_policy devs {arn_a}")))
            .unwrap();
        let delete_a = ops
            .iter()
            .position(|op| op.starts_with(&format!("delete_policy {arn_a}")))
            .unwrap();
        let delete_b = ops
            .iter()
            .position(|op| op.starts_with(&format!("delete_policy {arn_b}")))
            .unwrap();
        let create = ops
            .iter()
            .position(|op| op.starts_with("create_policy fresh"))
            .unwrap();
        assert!(detach < delete_a);
        assert!(delete_a < create);
        assert!(delete_b < create);
    }

    #[tokio::test]
    async fn test_missing_document_skips_that_policy_only() {
        let iam = MemoryIam::new();
        let bad = PolicySpec {
            name: "broken".to_string(),
            document: None,
        };

        let outcome = PolicyReconciler::new()
            .apply(&[bad, spec("good")], &iam)
            .await
            .unwrap();

        assert_eq!(outcome.created, vec!["good".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].name, "broken");
        assert_eq!(iam.policy_names(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_matching_policies_reflects_live_listing() {
        let iam = MemoryIam::new();
        iam.seed_policy("devs-policy");
        iam.seed_policy("devs-policy");

        let reconciler = PolicyReconciler::new();
        let matches = reconciler.matching_policies("devs-policy", &iam).await.unwrap();
        assert_eq!(matches.len(), 2);

        let none = reconciler.matching_policies("ghost", &iam).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_stage() {
        let iam = MemoryIam::new();
        iam.inject_failures("list_policies", 1);

        let err = PolicyReconciler::new().apply(&[], &iam).await.unwrap_err();
        assert!(matches!(err, IamError::Other(_)));
    }
}
