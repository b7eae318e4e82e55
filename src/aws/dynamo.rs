//! Account registry backed by a DynamoDB table.
//!
//! One item per account, keyed by `account_name`, with `RoleArn` and
//! optional `ProjectMail` attributes.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::debug;

use crate::registry::AccountRegistry;
use crate::types::AccountDescriptor;

pub struct DynamoRegistry {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoRegistry {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl AccountRegistry for DynamoRegistry {
    async fn get(&self, account: &str) -> anyhow::Result<Option<AccountDescriptor>> {
        use anyhow::Context;

        debug!(account = %account, table = %self.table, "looking up account");
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("account_name", AttributeValue::S(account.to_string()))
            .send()
            .await
            .context("registry lookup failed")?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        let string_attr = |name: &str| -> Option<String> {
            item.get(name).and_then(|v| v.as_s().ok()).cloned()
        };

        Ok(Some(AccountDescriptor {
            name: account.to_string(),
            role_arn: string_attr("RoleArn"),
            project_mail: string_attr("ProjectMail"),
        }))
    }
}
