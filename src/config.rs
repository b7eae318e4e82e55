//! Agent configuration, sourced from the environment.

use std::env;
use std::time::Duration;

/// Recognized configuration surface for one sync pass.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// IAM path prefix applied to all managed users, groups and policies
    pub users_path: String,
    /// Root/base account identifier; processed without role assumption
    pub root_account: String,
    /// Sender and operator address for credential mails
    pub mail_sender: String,
    /// Domain suffix for deriving per-user recipient addresses
    pub mail_domain: Option<String>,
    /// DynamoDB table holding account -> trust role mappings
    pub registry_table: String,
    /// Upper bound for one account's reconciliation stages
    pub account_timeout: Duration,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// `USERS_PATH` defaults to `/`, `REGISTRY_TABLE` to `aim_roles`.
    /// `ROOT_ACCOUNT` and `MAIL_SENDER` are required; `EMAIL_DOMAIN` is
    /// optional (without it, login-profile mails are skipped and logged).
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let root_account = env::var("ROOT_ACCOUNT").context("ROOT_ACCOUNT must be set")?;
        let mail_sender = env::var("MAIL_SENDER").context("MAIL_SENDER must be set")?;

        Ok(Self {
            users_path: env::var("USERS_PATH").unwrap_or_else(|_| "/".to_string()),
            root_account,
            mail_sender,
            mail_domain: env::var("EMAIL_DOMAIN").ok(),
            registry_table: env::var("REGISTRY_TABLE").unwrap_or_else(|_| "aim_roles".to_string()),
            account_timeout: Duration::from_secs(
                env::var("ACCOUNT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            users_path: "/".to_string(),
            root_account: "root".to_string(),
            mail_sender: "ops@example.com".to_string(),
            mail_domain: None,
            registry_table: "aim_roles".to_string(),
            account_timeout: Duration::from_secs(300),
        }
    }
}
