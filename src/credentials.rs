//! Per-account credential context.
//!
//! The assumed capability is the only shared mutable resource in a run;
//! this module keeps it explicit. A [`CredentialContext`] tracks the base
//! identity and whichever scoped capability is currently active, and
//! guarantees the base identity is restored between accounts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::IamError;
use crate::iam::Capability;
use crate::types::AccountDescriptor;

/// Exchanges a trust role for a short-lived, account-scoped capability.
///
/// Implemented by the STS backend in production and by fakes in tests.
#[async_trait]
pub trait CapabilityExchange: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Capability, IamError>;
}

/// Tracks the active capability for the account currently being processed.
///
/// Invariant: after an account's processing finishes (success or failure),
/// [`revert`](CredentialContext::revert) restores the base identity before
/// any other account is touched. Impersonated credentials never span two
/// accounts.
pub struct CredentialContext {
    exchange: Arc<dyn CapabilityExchange>,
    base: Capability,
    active: Capability,
    assumed_account: Option<String>,
    root_account: String,
}

impl CredentialContext {
    pub fn new(
        base: Capability,
        exchange: Arc<dyn CapabilityExchange>,
        root_account: impl Into<String>,
    ) -> Self {
        let active = base.clone();
        Self {
            exchange,
            base,
            active,
            assumed_account: None,
            root_account: root_account.into(),
        }
    }

    /// Acquire a capability for the given account.
    ///
    /// With a trust role present, exchanges it for an impersonated
    /// capability; the base identity is shadowed, never replaced. Without
    /// one, the root/base account passes through unimpersonated and any
    /// other account fails with `AccountNotRegistered` — callers skip the
    /// account rather than retry.
    pub async fn assume(&mut self, account: &AccountDescriptor) -> Result<Capability, IamError> {
        match &account.role_arn {
            Some(role_arn) => {
                info!(account = %account.name, role_arn = %role_arn, "assuming trust role");
                let session_name = format!("iam-sync-{}", account.name);
                let capability = self.exchange.assume_role(role_arn, &session_name).await?;
                self.active = capability.clone();
                self.assumed_account = Some(account.name.clone());
                Ok(capability)
            }
            None if account.name == self.root_account => {
                debug!(account = %account.name, "root account, using base identity");
                self.assumed_account = Some(account.name.clone());
                Ok(self.base.clone())
            }
            None => Err(IamError::AccountNotRegistered(account.name.clone())),
        }
    }

    /// Restore the base identity as the active capability. Idempotent;
    /// must run exactly once per successful `assume`, whatever the outcome
    /// of the work done under the assumption.
    pub fn revert(&mut self) {
        if let Some(account) = self.assumed_account.take() {
            debug!(account = %account, "reverting to base identity");
        }
        self.active = self.base.clone();
    }

    /// Whether the active capability is the base identity.
    pub fn is_base(&self) -> bool {
        Arc::ptr_eq(&self.active, &self.base)
    }

    pub fn active(&self) -> Capability {
        self.active.clone()
    }

    pub fn assumed_account(&self) -> Option<&str> {
        self.assumed_account.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIam;

    struct FixedExchange {
        capability: Capability,
    }

    #[async_trait]
    impl CapabilityExchange for FixedExchange {
        async fn assume_role(
            &self,
            _role_arn: &str,
            _session_name: &str,
        ) -> Result<Capability, IamError> {
            Ok(self.capability.clone())
        }
    }

    struct FailingExchange;

    #[async_trait]
    impl CapabilityExchange for FailingExchange {
        async fn assume_role(
            &self,
            role_arn: &str,
            _session_name: &str,
        ) -> Result<Capability, IamError> {
            Err(IamError::Other(format!("denied: {role_arn}")))
        }
    }

    fn context(exchange: Arc<dyn CapabilityExchange>) -> CredentialContext {
        CredentialContext::new(Arc::new(MemoryIam::new()), exchange, "root")
    }

    #[tokio::test]
    async fn test_assume_with_role_shadows_base() {
        let assumed: Capability = Arc::new(MemoryIam::new());
        let mut ctx = context(Arc::new(FixedExchange {
            capability: assumed,
        }));

        let account = AccountDescriptor::new("staging").with_role("arn:aws:iam::111:role/t");
        ctx.assume(&account).await.unwrap();

        assert!(!ctx.is_base());
        assert_eq!(ctx.assumed_account(), Some("staging"));

        ctx.revert();
        assert!(ctx.is_base());
        assert_eq!(ctx.assumed_account(), None);
    }

    #[tokio::test]
    async fn test_root_account_passes_through_base() {
        let assumed: Capability = Arc::new(MemoryIam::new());
        let mut ctx = context(Arc::new(FixedExchange {
            capability: assumed,
        }));

        ctx.assume(&AccountDescriptor::new("root")).await.unwrap();
        assert!(ctx.is_base());
    }

    #[tokio::test]
    async fn test_unregistered_account_is_rejected() {
        let mut ctx = context(Arc::new(FailingExchange));
        let err = match ctx.assume(&AccountDescriptor::new("mystery")).await {
            Ok(_) => panic!("assume must reject an account without a trust role"),
            Err(err) => err,
        };
        assert_eq!(err, IamError::AccountNotRegistered("mystery".to_string()));
        assert!(ctx.is_base());
    }

    #[tokio::test]
    async fn test_failed_exchange_leaves_base_active() {
        let mut ctx = context(Arc::new(FailingExchange));
        let account = AccountDescriptor::new("staging").with_role("arn:aws:iam::111:role/t");

        assert!(ctx.assume(&account).await.is_err());
        assert!(ctx.is_base());
    }

    #[tokio::test]
    async fn test_revert_is_idempotent() {
        let mut ctx = context(Arc::new(FailingExchange));
        ctx.revert();
        ctx.revert();
        assert!(ctx.is_base());
    }
}
