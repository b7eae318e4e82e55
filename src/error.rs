//! Error taxonomy shared by the reconcilers and backends.

use serde::Serialize;
use thiserror::Error;

/// Typed failures surfaced by the identity-service capability.
///
/// `NotFound` drives the create-on-missing path for groups and is fatal
/// elsewhere. `Throttled` is retried inside the capability layer and
/// should never reach a reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IamError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    #[error("request throttled")]
    Throttled,

    #[error("invalid policy document: {0}")]
    InvalidPolicyDocument(String),

    #[error("account not registered: {0}")]
    AccountNotRegistered(String),

    #[error("{0}")]
    Other(String),
}

impl IamError {
    pub fn other(err: impl std::fmt::Display) -> Self {
        IamError::Other(err.to_string())
    }
}

/// Pipeline stage an account was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registry,
    Source,
    Assume,
    Policies,
    Groups,
    Users,
    /// The per-account deadline elapsed; which reconciler was running is
    /// not recoverable from the cancelled future.
    Timeout,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Registry => write!(f, "registry"),
            Stage::Source => write!(f, "source"),
            Stage::Assume => write!(f, "assume"),
            Stage::Policies => write!(f, "policies"),
            Stage::Groups => write!(f, "groups"),
            Stage::Users => write!(f, "users"),
            Stage::Timeout => write!(f, "timeout"),
        }
    }
}

/// A captured per-account failure with enough context to diagnose
/// without re-running the pass.
#[derive(Debug, Clone, Serialize, Error)]
#[error("account {account} failed during {stage}: {message}")]
pub struct AccountError {
    pub account: String,
    pub stage: Stage,
    pub message: String,
}

impl AccountError {
    pub fn new(account: impl Into<String>, stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            account: account.into(),
            stage,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_error_display() {
        let err = AccountError::new("staging", Stage::Groups, IamError::NotFound("g".into()));
        assert_eq!(
            err.to_string(),
            "account staging failed during groups: entity not found: g"
        );
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Stage::Policies).unwrap(), "\"policies\"");
    }
}
