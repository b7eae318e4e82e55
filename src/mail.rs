//! Outbound credential notifications.
//!
//! Mail jobs are buffered while accounts are being processed and drained
//! once, after the loop, under the base identity. The actual transport is
//! a collaborator behind [`MailTransport`].

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::iam::AccessKey;

/// One outbound notification. The body carries credential material, so
/// jobs are never logged beyond recipients and subject.
#[derive(Clone, Serialize)]
pub struct MailJob {
    pub recipients: Vec<String>,
    pub subject: String,
    #[serde(skip_serializing)]
    pub body: String,
}

impl MailJob {
    /// Notification for a freshly created interactive login.
    pub fn login_credentials(
        recipients: Vec<String>,
        user: &str,
        account: &str,
        password: &str,
    ) -> Self {
        Self {
            recipients,
            subject: "[iam-sync] Your AWS account is ready.".to_string(),
            body: format!(
                "Your IAM user has been created.\n\n\
                 Account: {account}\n\
                 Credentials: {user} / {password}\n\n\
                 You will be asked to change the password on first sign-in."
            ),
        }
    }

    /// Notification for freshly created programmatic access keys.
    pub fn access_keys(recipients: Vec<String>, user: &str, account: &str, key: &AccessKey) -> Self {
        Self {
            recipients,
            subject: "[iam-sync] Your AWS access keys are ready.".to_string(),
            body: format!(
                "Programmatic access for IAM user {user} has been created.\n\n\
                 Account: {account}\n\
                 AccessKeyId: {}\n\
                 SecretAccessKey: {}",
                key.access_key_id, key.secret_access_key
            ),
        }
    }
}

impl std::fmt::Debug for MailJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailJob")
            .field("recipients", &self.recipients)
            .field("subject", &self.subject)
            .field("body", &"<redacted>")
            .finish()
    }
}

/// Delivery transport; SES in production, a recording fake in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, job: &MailJob) -> anyhow::Result<()>;
}

/// Per-job flush result for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub recipients: Vec<String>,
    pub subject: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Append-only buffer of mail jobs for one run.
#[derive(Default)]
pub struct NotificationQueue {
    jobs: Mutex<Vec<MailJob>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: MailJob) {
        info!(recipients = ?job.recipients, subject = %job.subject, "queueing notification");
        self.jobs.lock().unwrap().push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the queue, delivering each job through the transport.
    /// Consumed jobs are discarded whether delivery succeeds or not.
    pub async fn flush_all(&self, transport: &dyn MailTransport) -> Vec<DeliveryResult> {
        let jobs: Vec<MailJob> = std::mem::take(&mut *self.jobs.lock().unwrap());
        info!(jobs = jobs.len(), "flushing notification queue");

        let mut results = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let result = match transport.send(job).await {
                Ok(()) => DeliveryResult {
                    recipients: job.recipients.clone(),
                    subject: job.subject.clone(),
                    delivered: true,
                    error: None,
                },
                Err(err) => {
                    warn!(recipients = ?job.recipients, error = %err, "mail delivery failed");
                    DeliveryResult {
                        recipients: job.recipients.clone(),
                        subject: job.subject.clone(),
                        delivered: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            results.push(result);
        }
        results
    }
}
