//! Group membership and policy-attachment reconciliation.

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::diff::diff;
use crate::error::IamError;
use crate::iam::IamOps;
use crate::policies::PolicyReconciler;
use crate::types::GroupSpec;

/// How the group was found at the start of its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOrigin {
    /// Existed already; current membership was used as observed state
    Found,
    /// Was absent and created fresh; membership treated as empty
    Forged,
}

/// Per-group result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub name: String,
    pub origin: GroupOrigin,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Members whose add/remove failed; the group still completes.
    pub failed_members: Vec<String>,
    /// False when no matching policy existed to attach or the attach failed.
    pub policy_attached: bool,
    /// Step that prevented the group from completing, if any.
    pub error: Option<String>,
}

impl GroupOutcome {
    fn failed(name: &str, origin: GroupOrigin, err: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            origin,
            added: Vec::new(),
            removed: Vec::new(),
            failed_members: Vec::new(),
            policy_attached: false,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct GroupReconciler;

impl GroupReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Reconcile every desired group: membership first, then the group's
    /// policy attachment resolved by name against the live policy listing.
    /// Per-group failures are isolated; siblings proceed.
    pub async fn apply(
        &self,
        desired: &[GroupSpec],
        policies: &PolicyReconciler,
        iam: &dyn IamOps,
    ) -> Result<Vec<GroupOutcome>, IamError> {
        info!(groups = desired.len(), "reconciling groups");

        let mut outcomes = Vec::with_capacity(desired.len());
        for group in desired {
            outcomes.push(self.reconcile_group(group, policies, iam).await);
        }
        Ok(outcomes)
    }

    /// Membership-removal primitive, also used by user deletion.
    pub async fn remove_member(
        &self,
        user: &str,
        group: &str,
        iam: &dyn IamOps,
    ) -> Result<(), IamError> {
        info!(user = %user, group = %group, "removing user from group");
        iam.remove_user_from_group(user, group).await
    }

    async fn reconcile_group(
        &self,
        group: &GroupSpec,
        policies: &PolicyReconciler,
        iam: &dyn IamOps,
    ) -> GroupOutcome {
        // Fetch membership; an absent group is forged and treated as empty.
        let (current, origin) = match iam.group_members(&group.name).await {
            Ok(members) => (members, GroupOrigin::Found),
            Err(IamError::NotFound(_)) => {
                info!(group = %group.name, "group not found, creating");
                if let Err(err) = iam.create_group(&group.name).await {
                    return GroupOutcome::failed(&group.name, GroupOrigin::Forged, err);
                }
                (Vec::new(), GroupOrigin::Forged)
            }
            Err(err) => return GroupOutcome::failed(&group.name, GroupOrigin::Found, err),
        };

        let membership = diff(&group.users, &current);
        let adds = membership
            .to_create
            .iter()
            .map(|user| iam.add_user_to_group(user, &group.name));
        let removes = membership
            .to_delete
            .iter()
            .map(|user| iam.remove_user_from_group(user, &group.name));

        // Sibling membership changes run concurrently but must all settle
        // before the group counts as processed.
        let (add_results, remove_results) = futures::join!(join_all(adds), join_all(removes));

        let mut outcome = GroupOutcome {
            name: group.name.clone(),
            origin,
            added: Vec::new(),
            removed: Vec::new(),
            failed_members: Vec::new(),
            policy_attached: false,
            error: None,
        };

        for (user, result) in membership.to_create.iter().zip(add_results) {
            match result {
                Ok(()) => outcome.added.push(user.clone()),
                Err(err) => {
                    warn!(user = %user, group = %group.name, error = %err, "failed to add member");
                    outcome.failed_members.push(user.clone());
                }
            }
        }
        for (user, result) in membership.to_delete.iter().zip(remove_results) {
            match result {
                Ok(()) => outcome.removed.push(user.clone()),
                Err(err) => {
                    warn!(user = %user, group = %group.name, error = %err, "failed to remove member");
                    outcome.failed_members.push(user.clone());
                }
            }
        }

        outcome.policy_attached = self.attach_policy(group, policies, iam).await;
        outcome
    }

    /// Resolve the desired policy name to its current ARN and attach it.
    /// Zero matches leaves the group policy-incomplete (non-fatal); more
    /// than one match is an anomaly and the first is used.
    async fn attach_policy(
        &self,
        group: &GroupSpec,
        policies: &PolicyReconciler,
        iam: &dyn IamOps,
    ) -> bool {
        let matches = match policies.matching_policies(&group.policy, iam).await {
            Ok(matches) => matches,
            Err(err) => {
                error!(group = %group.name, policy = %group.policy, error = %err, "policy lookup failed");
                return false;
            }
        };

        let handle = match matches.as_slice() {
            [] => {
                error!(group = %group.name, policy = %group.policy, "requested policy not found");
                return false;
            }
            [only] => only,
            [first, ..] => {
                warn!(
                    group = %group.name,
                    policy = %group.policy,
                    matches = matches.len(),
                    "multiple policies match, using first"
                );
                first
            }
        };

        match iam.attach_group_policy(&group.name, &handle.arn).await {
            Ok(()) => {
                info!(group = %group.name, policy_arn = %handle.arn, "policy attached");
                true
            }
            Err(err) => {
                warn!(group = %group.name, policy = %group.policy, error = %err, "failed to attach policy");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIam;

    fn spec(name: &str, users: &[&str], policy: &str) -> GroupSpec {
        GroupSpec {
            name: name.to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
            policy: policy.to_string(),
        }
    }

    #[tokio::test]
    async fn test_forge_creates_group_once_before_membership() {
        let iam = MemoryIam::new();
        iam.seed_user("alice", false);
        iam.seed_policy("devs-policy");

        let outcomes = GroupReconciler::new()
            .apply(
                &[spec("devs", &["alice"], "devs-policy")],
                &PolicyReconciler::new(),
                &iam,
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].origin, GroupOrigin::Forged);
        assert_eq!(outcomes[0].added, vec!["alice".to_string()]);
        assert!(outcomes[0].policy_attached);

        let ops = iam.operations();
        let creates: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.starts_with("create_group devs"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(creates.len(), 1);
        let first_membership = ops
            .iter()
            .position(|op| op.starts_with("add_user_to_group"))
            .unwrap();
        assert!(creates[0] < first_membership);
    }

    #[tokio::test]
    async fn test_membership_diff_applies_adds_and_removes() {
        let iam = MemoryIam::new();
        iam.seed_user("alice", false);
        iam.seed_user("bob", false);
        iam.seed_group("devs", &["bob", "carol"]);
        iam.seed_policy("devs-policy");

        let outcomes = GroupReconciler::new()
            .apply(
                &[spec("devs", &["alice", "bob"], "devs-policy")],
                &PolicyReconciler::new(),
                &iam,
            )
            .await
            .unwrap();

        let outcome = &outcomes[0];
        assert_eq!(outcome.origin, GroupOrigin::Found);
        assert_eq!(outcome.added, vec!["alice".to_string()]);
        assert_eq!(outcome.removed, vec!["carol".to_string()]);
        assert!(outcome.failed_members.is_empty());
    }

    #[tokio::test]
    async fn test_missing_policy_reports_incomplete() {
        let iam = MemoryIam::new();
        iam.seed_group("devs", &[]);

        let outcomes = GroupReconciler::new()
            .apply(
                &[spec("devs", &[], "ghost-policy")],
                &PolicyReconciler::new(),
                &iam,
            )
            .await
            .unwrap();

        assert!(!outcomes[0].policy_attached);
        assert!(outcomes[0].error.is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_policy_uses_first_match() {
        let iam = MemoryIam::new();
        iam.seed_group("devs", &[]);
        iam.seed_policy("dup");
        iam.seed_policy("dup");

        let outcomes = GroupReconciler::new()
            .apply(&[spec("devs", &[], "dup")], &PolicyReconciler::new(), &iam)
            .await
            .unwrap();

        assert!(outcomes[0].policy_attached);
        assert_eq!(iam.attached_policies("devs").len(), 1);
    }

    #[tokio::test]
    async fn test_member_failure_is_isolated() {
        let iam = MemoryIam::new();
        iam.seed_user("alice", false);
        iam.seed_group("devs", &[]);
        iam.seed_policy("devs-policy");

        // "ghost" has no user record, its add fails; alice still lands.
        let outcomes = GroupReconciler::new()
            .apply(
                &[spec("devs", &["alice", "ghost"], "devs-policy")],
                &PolicyReconciler::new(),
                &iam,
            )
            .await
            .unwrap();

        let outcome = &outcomes[0];
        assert_eq!(outcome.added, vec!["alice".to_string()]);
        assert_eq!(outcome.failed_members, vec!["ghost".to_string()]);
        assert!(outcome.error.is_none());
    }
}
