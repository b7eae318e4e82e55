//! Trust-role exchange via AWS STS.

use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use tracing::info;

use super::iam::AwsIam;
use super::map_sdk_err;
use crate::credentials::CapabilityExchange;
use crate::error::IamError;
use crate::iam::Capability;

/// Exchanges a trust role for a scoped IAM capability backed by the
/// session credentials. The base identity's long-lived credentials are
/// never replaced, only shadowed for the assumed session.
pub struct StsExchange {
    sts: aws_sdk_sts::Client,
    region: String,
    path: String,
}

impl StsExchange {
    pub fn new(sts: aws_sdk_sts::Client, region: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            sts,
            region: region.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl CapabilityExchange for StsExchange {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Capability, IamError> {
        let output = self
            .sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(map_sdk_err)?;

        let session = output
            .credentials()
            .ok_or_else(|| IamError::Other("AssumeRole returned no credentials".to_string()))?;

        let credentials = Credentials::new(
            session.access_key_id(),
            session.secret_access_key(),
            Some(session.session_token().to_string()),
            None,
            "iam-sync-assume-role",
        );

        let config = aws_sdk_iam::config::Builder::new()
            .behavior_version(aws_sdk_iam::config::BehaviorVersion::latest())
            .region(aws_sdk_iam::config::Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .build();

        info!(role_arn = %role_arn, session = %session_name, "assumed trust role");
        Ok(Arc::new(AwsIam::new(
            aws_sdk_iam::Client::from_conf(config),
            self.path.clone(),
        )))
    }
}
