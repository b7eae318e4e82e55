//! Mail transport over Amazon SES.

use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use tracing::info;

use crate::mail::{MailJob, MailTransport};

pub struct SesTransport {
    client: aws_sdk_sesv2::Client,
    sender: String,
}

impl SesTransport {
    pub fn new(client: aws_sdk_sesv2::Client, sender: impl Into<String>) -> Self {
        Self {
            client,
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl MailTransport for SesTransport {
    async fn send(&self, job: &MailJob) -> anyhow::Result<()> {
        use anyhow::Context;

        let subject = Content::builder()
            .data(&job.subject)
            .build()
            .context("invalid mail subject")?;
        let text = Content::builder()
            .data(&job.body)
            .build()
            .context("invalid mail body")?;
        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();

        self.client
            .send_email()
            .from_email_address(&self.sender)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(job.recipients.clone()))
                    .build(),
            )
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("SES send failed")?;

        info!(recipients = ?job.recipients, subject = %job.subject, "mail sent");
        Ok(())
    }
}
