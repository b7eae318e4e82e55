//! Account loop: one account at a time through assume -> policies ->
//! groups -> users -> revert, failures isolated per account.
//!
//! Accounts are strictly sequential because the assumed capability is the
//! one piece of shared mutable state in a run; two accounts in flight
//! would race on which credentials back each call. Within one account the
//! reconcilers fan out freely.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::credentials::CredentialContext;
use crate::error::{AccountError, IamError, Stage};
use crate::groups::{GroupOutcome, GroupReconciler};
use crate::iam::Capability;
use crate::mail::{DeliveryResult, MailTransport, NotificationQueue};
use crate::policies::{PolicyOutcome, PolicyReconciler};
use crate::registry::AccountRegistry;
use crate::source::DesiredStateSource;
use crate::types::DesiredState;
use crate::users::{AccountContext, UserOutcome, UserReconciler};

/// Success summary for one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub policies: PolicyOutcome,
    pub groups: Vec<GroupOutcome>,
    pub users: UserOutcome,
}

/// Per-account entry in the run report: either a summary or the captured
/// error, never both.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AccountSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AccountError>,
}

impl AccountReport {
    fn success(account: &str, summary: AccountSummary) -> Self {
        Self {
            account: account.to_string(),
            success: true,
            summary: Some(summary),
            error: None,
        }
    }

    fn failure(error: AccountError) -> Self {
        Self {
            account: error.account.clone(),
            success: false,
            summary: None,
            error: Some(error),
        }
    }
}

/// Final report for one pass over all accounts.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
    pub mail: Vec<DeliveryResult>,
    /// Failures outside any single account (e.g. listing accounts)
    pub errors: Vec<String>,
    pub started: chrono::DateTime<chrono::Utc>,
    pub finished: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    pub fn failed_accounts(&self) -> usize {
        self.accounts.iter().filter(|a| !a.success).count()
    }
}

pub struct Orchestrator {
    registry: Arc<dyn AccountRegistry>,
    source: Arc<dyn DesiredStateSource>,
    transport: Arc<dyn MailTransport>,
    queue: NotificationQueue,
    config: SyncConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        source: Arc<dyn DesiredStateSource>,
        transport: Arc<dyn MailTransport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            source,
            transport,
            queue: NotificationQueue::new(),
            config,
        }
    }

    /// Run one pass over every account in the state repository.
    pub async fn run(&self, context: &mut CredentialContext) -> RunReport {
        let started = chrono::Utc::now();
        match self.source.list_accounts().await {
            Ok(accounts) => self.run_accounts(&accounts, context).await,
            Err(err) => {
                error!(error = %err, "failed to list accounts");
                RunReport {
                    accounts: Vec::new(),
                    mail: Vec::new(),
                    errors: vec![format!("failed to list accounts: {err}")],
                    started,
                    finished: chrono::Utc::now(),
                }
            }
        }
    }

    /// Run one pass over the given accounts, strictly in order, then flush
    /// the notification queue under the base identity.
    pub async fn run_accounts(
        &self,
        accounts: &[String],
        context: &mut CredentialContext,
    ) -> RunReport {
        let started = chrono::Utc::now();
        info!(accounts = accounts.len(), "starting sync pass");

        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            let report = self.process_account(account, context).await;
            if let Some(err) = &report.error {
                warn!(account = %account, stage = %err.stage, error = %err.message, "account failed");
            } else {
                info!(account = %account, "account reconciled");
            }
            reports.push(report);
        }

        // All contexts are reverted here; deliveries run as the base identity.
        debug_assert!(context.is_base());
        let mail = self.queue.flush_all(self.transport.as_ref()).await;

        let report = RunReport {
            accounts: reports,
            mail,
            errors: Vec::new(),
            started,
            finished: chrono::Utc::now(),
        };
        info!(
            accounts = report.accounts.len(),
            failed = report.failed_accounts(),
            "sync pass finished"
        );
        report
    }

    async fn process_account(
        &self,
        account: &str,
        context: &mut CredentialContext,
    ) -> AccountReport {
        info!(account = %account, "processing account");

        let descriptor = match self.registry.get(account).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                return AccountReport::failure(AccountError::new(
                    account,
                    Stage::Registry,
                    IamError::AccountNotRegistered(account.to_string()),
                ))
            }
            Err(err) => {
                return AccountReport::failure(AccountError::new(account, Stage::Registry, err))
            }
        };

        let desired = match self.source.fetch(account).await {
            Ok(state) => state,
            Err(err) => {
                return AccountReport::failure(AccountError::new(account, Stage::Source, err))
            }
        };

        let capability = match context.assume(&descriptor).await {
            Ok(capability) => capability,
            Err(err) => {
                return AccountReport::failure(AccountError::new(account, Stage::Assume, err))
            }
        };

        // No early return between assume and revert: the base identity must
        // be restored whatever happens in the stages, including a timeout.
        let result = tokio::time::timeout(
            self.config.account_timeout,
            self.run_stages(&desired, &descriptor.project_mail, account, &capability),
        )
        .await;
        context.revert();

        match result {
            Ok(Ok(summary)) => AccountReport::success(account, summary),
            Ok(Err((stage, err))) => {
                AccountReport::failure(AccountError::new(account, stage, err))
            }
            Err(_) => AccountReport::failure(AccountError::new(
                account,
                Stage::Timeout,
                format!(
                    "account timed out after {:?}",
                    self.config.account_timeout
                ),
            )),
        }
    }

    /// Policy -> Group -> User is a strict happens-before chain: each
    /// stage's listing must reflect the previous stage's mutations.
    async fn run_stages(
        &self,
        desired: &DesiredState,
        project_mail: &Option<String>,
        account: &str,
        capability: &Capability,
    ) -> Result<AccountSummary, (Stage, IamError)> {
        let policy_reconciler = PolicyReconciler::new();
        let policies = policy_reconciler
            .apply(&desired.policies, capability.as_ref())
            .await
            .map_err(|err| (Stage::Policies, err))?;

        let group_reconciler = GroupReconciler::new();
        let groups = group_reconciler
            .apply(&desired.groups, &policy_reconciler, capability.as_ref())
            .await
            .map_err(|err| (Stage::Groups, err))?;

        let user_context = AccountContext {
            account: account.to_string(),
            project_mail: project_mail.clone(),
        };
        let users = UserReconciler::new(&self.config)
            .apply(
                &desired.users,
                capability.as_ref(),
                &user_context,
                &group_reconciler,
                &self.queue,
            )
            .await
            .map_err(|err| (Stage::Users, err))?;

        Ok(AccountSummary {
            policies,
            groups,
            users,
        })
    }
}
