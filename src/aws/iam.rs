//! Production [`IamOps`] backend over the AWS IAM API.

use async_trait::async_trait;

use super::{collect_pages, map_sdk_err, next_marker, with_throttle_retry};
use crate::error::IamError;
use crate::iam::{AccessKey, IamOps, PolicyHandle};

/// IAM client scoped to the configured identity path prefix.
pub struct AwsIam {
    client: aws_sdk_iam::Client,
    path: String,
}

impl AwsIam {
    pub fn new(client: aws_sdk_iam::Client, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

/// Wrap one fluent-builder send in throttle retry with error mapping.
macro_rules! retried {
    ($name:literal, $builder:expr) => {
        with_throttle_retry($name, || {
            let fut = $builder.send();
            async move { fut.await.map_err(map_sdk_err) }
        })
    };
}

#[async_trait]
impl IamOps for AwsIam {
    async fn list_users(&self) -> Result<Vec<String>, IamError> {
        collect_pages(|marker| async move {
            let output = retried!(
                "list_users",
                self.client
                    .list_users()
                    .path_prefix(&self.path)
                    .set_marker(marker.clone())
            )
            .await?;
            let names = output
                .users()
                .iter()
                .map(|u| u.user_name().to_string())
                .collect();
            Ok((names, next_marker(output.is_truncated(), output.marker())))
        })
        .await
    }

    async fn create_user(&self, name: &str) -> Result<(), IamError> {
        retried!(
            "create_user",
            self.client.create_user().user_name(name).path(&self.path)
        )
        .await
        .map(|_| ())
    }

    async fn delete_user(&self, name: &str) -> Result<(), IamError> {
        retried!("delete_user", self.client.delete_user().user_name(name))
            .await
            .map(|_| ())
    }

    async fn create_login_profile(
        &self,
        user: &str,
        password: &str,
        reset_required: bool,
    ) -> Result<(), IamError> {
        retried!(
            "create_login_profile",
            self.client
                .create_login_profile()
                .user_name(user)
                .password(password)
                .password_reset_required(reset_required)
        )
        .await
        .map(|_| ())
    }

    async fn delete_login_profile(&self, user: &str) -> Result<(), IamError> {
        retried!(
            "delete_login_profile",
            self.client.delete_login_profile().user_name(user)
        )
        .await
        .map(|_| ())
    }

    async fn create_access_key(&self, user: &str) -> Result<AccessKey, IamError> {
        let output = retried!(
            "create_access_key",
            self.client.create_access_key().user_name(user)
        )
        .await?;

        let key = output
            .access_key()
            .ok_or_else(|| IamError::Other("CreateAccessKey returned no key".to_string()))?;
        Ok(AccessKey {
            access_key_id: key.access_key_id().to_string(),
            secret_access_key: key.secret_access_key().to_string(),
        })
    }

    async fn delete_access_keys(&self, user: &str) -> Result<(), IamError> {
        let key_ids = collect_pages(|marker| async move {
            let output = retried!(
                "list_access_keys",
                self.client
                    .list_access_keys()
                    .user_name(user)
                    .set_marker(marker.clone())
            )
            .await?;
            let ids = output
                .access_key_metadata()
                .iter()
                .filter_map(|m| m.access_key_id().map(str::to_string))
                .collect();
            Ok((ids, next_marker(output.is_truncated(), output.marker())))
        })
        .await?;

        for key_id in &key_ids {
            retried!(
                "delete_access_key",
                self.client
                    .delete_access_key()
                    .user_name(user)
                    .access_key_id(key_id)
            )
            .await?;
        }
        Ok(())
    }

    async fn list_groups_for_user(&self, user: &str) -> Result<Vec<String>, IamError> {
        collect_pages(|marker| async move {
            let output = retried!(
                "list_groups_for_user",
                self.client
                    .list_groups_for_user()
                    .user_name(user)
                    .set_marker(marker.clone())
            )
            .await?;
            let groups = output
                .groups()
                .iter()
                .map(|g| g.group_name().to_string())
                .collect();
            Ok((groups, next_marker(output.is_truncated(), output.marker())))
        })
        .await
    }

    async fn group_members(&self, group: &str) -> Result<Vec<String>, IamError> {
        collect_pages(|marker| async move {
            let output = retried!(
                "get_group",
                self.client
                    .get_group()
                    .group_name(group)
                    .set_marker(marker.clone())
            )
            .await?;
            let members = output
                .users()
                .iter()
                .map(|u| u.user_name().to_string())
                .collect();
            Ok((members, next_marker(output.is_truncated(), output.marker())))
        })
        .await
    }

    async fn create_group(&self, name: &str) -> Result<(), IamError> {
        retried!(
            "create_group",
            self.client.create_group().group_name(name).path(&self.path)
        )
        .await
        .map(|_| ())
    }

    async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), IamError> {
        retried!(
            "add_user_to_group",
            self.client
                .add_user_to_group()
                .user_name(user)
                .group_name(group)
        )
        .await
        .map(|_| ())
    }

    async fn remove_user_from_group(&self, user: &str, group: &str) -> Result<(), IamError> {
        retried!(
            "remove_user_from_group",
            self.client
                .remove_user_from_group()
                .user_name(user)
                .group_name(group)
        )
        .await
        .map(|_| ())
    }

    async fn list_policies(&self) -> Result<Vec<PolicyHandle>, IamError> {
        collect_pages(|marker| async move {
            let output = retried!(
                "list_policies",
                self.client
                    .list_policies()
                    .path_prefix(&self.path)
                    .set_marker(marker.clone())
            )
            .await?;
            let handles = output
                .policies()
                .iter()
                .filter_map(|p| {
                    Some(PolicyHandle {
                        name: p.policy_name()?.to_string(),
                        arn: p.arn()?.to_string(),
                    })
                })
                .collect();
            Ok((handles, next_marker(output.is_truncated(), output.marker())))
        })
        .await
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<PolicyHandle, IamError> {
        let output = retried!(
            "create_policy",
            self.client
                .create_policy()
                .policy_name(name)
                .policy_document(document)
                .path(&self.path)
        )
        .await?;

        let policy = output
            .policy()
            .ok_or_else(|| IamError::Other("CreatePolicy returned no policy".to_string()))?;
        match (policy.policy_name(), policy.arn()) {
            (Some(name), Some(arn)) => Ok(PolicyHandle {
                name: name.to_string(),
                arn: arn.to_string(),
            }),
            _ => Err(IamError::Other(
                "CreatePolicy response missing name or ARN".to_string(),
            )),
        }
    }

    async fn delete_policy(&self, arn: &str) -> Result<(), IamError> {
        retried!("delete_policy", self.client.delete_policy().policy_arn(arn))
            .await
            .map(|_| ())
    }

    async fn policy_attachments(&self, arn: &str) -> Result<Vec<String>, IamError> {
        collect_pages(|marker| async move {
            let output = retried!(
                "list_entities_for_policy",
                self.client
                    .list_entities_for_policy()
                    .policy_arn(arn)
                    .path_prefix(&self.path)
                    .set_marker(marker.clone())
            )
            .await?;
            let holders = output
                .policy_groups()
                .iter()
                .filter_map(|g| g.group_name().map(str::to_string))
                .collect();
            Ok((holders, next_marker(output.is_truncated(), output.marker())))
        })
        .await
    }

    async fn detach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError> {
        retried!(
            "detach_group_policy",
            self.client
                .detach_group_policy()
                .group_name(group)
                .policy_arn(arn)
        )
        .await
        .map(|_| ())
    }

    async fn attach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError> {
        retried!(
            "attach_group_policy",
            self.client
                .attach_group_policy()
                .group_name(group)
                .policy_arn(arn)
        )
        .await
        .map(|_| ())
    }
}
