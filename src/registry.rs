//! Account registry: name -> trust role and project contact.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::AccountDescriptor;

/// Read-only lookup backed by a persistent key-value store. `None` means
/// the account is unknown and must be skipped.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn get(&self, account: &str) -> anyhow::Result<Option<AccountDescriptor>>;
}

/// Map-backed registry for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: HashMap<String, AccountDescriptor>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: AccountDescriptor) {
        self.entries.insert(descriptor.name.clone(), descriptor);
    }
}

#[async_trait]
impl AccountRegistry for MemoryRegistry {
    async fn get(&self, account: &str) -> anyhow::Result<Option<AccountDescriptor>> {
        Ok(self.entries.get(account).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_round_trip() {
        let mut registry = MemoryRegistry::new();
        registry.insert(AccountDescriptor::new("staging").with_role("arn:aws:iam::1:role/t"));

        let found = registry.get("staging").await.unwrap().unwrap();
        assert_eq!(found.role_arn.as_deref(), Some("arn:aws:iam::1:role/t"));
        assert!(registry.get("unknown").await.unwrap().is_none());
    }
}
