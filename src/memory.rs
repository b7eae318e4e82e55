//! In-memory identity service.
//!
//! Backs the test suites: full [`IamOps`] semantics over in-process maps,
//! an operation log for ordering assertions, and per-operation fault
//! injection for partial-failure scenarios.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::IamError;
use crate::iam::{AccessKey, IamOps, PolicyHandle};

#[derive(Debug, Default, Clone)]
struct UserRecord {
    login_profile: bool,
    access_keys: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct GroupRecord {
    members: BTreeSet<String>,
    attached_policies: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, UserRecord>,
    groups: BTreeMap<String, GroupRecord>,
    /// arn -> name
    policies: BTreeMap<String, String>,
    serial: u64,
}

/// In-memory [`IamOps`] implementation.
#[derive(Default)]
pub struct MemoryIam {
    state: Mutex<State>,
    /// operation -> remaining injected failures
    faults: Mutex<HashMap<String, usize>>,
    log: Mutex<Vec<String>>,
}

impl MemoryIam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing user, optionally with a login profile.
    pub fn seed_user(&self, name: &str, login_profile: bool) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(
            name.to_string(),
            UserRecord {
                login_profile,
                access_keys: Vec::new(),
            },
        );
    }

    /// Seed an existing group with members.
    pub fn seed_group(&self, name: &str, members: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let record = state.groups.entry(name.to_string()).or_default();
        record.members = members.iter().map(|m| m.to_string()).collect();
    }

    /// Seed an existing policy; returns its ARN.
    pub fn seed_policy(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.serial += 1;
        let arn = format!("arn:mem:policy/{name}/{}", state.serial);
        state.policies.insert(arn.clone(), name.to_string());
        arn
    }

    /// Attach a seeded policy to a seeded group directly.
    pub fn seed_attachment(&self, group: &str, arn: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.groups.entry(group.to_string()).or_default();
        record.attached_policies.insert(arn.to_string());
    }

    /// Make the next `count` calls of `operation` fail.
    pub fn inject_failures(&self, operation: &str, count: usize) {
        self.faults
            .lock()
            .unwrap()
            .insert(operation.to_string(), count);
    }

    /// Chronological log of every mutating or listing call.
    pub fn operations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn user_names(&self) -> Vec<String> {
        self.state.lock().unwrap().users.keys().cloned().collect()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.state.lock().unwrap().groups.keys().cloned().collect()
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.state.lock().unwrap().policies.values().cloned().collect()
    }

    pub fn attached_policies(&self, group: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(group)
            .map(|g| g.attached_policies.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, operation: &str, detail: &str) -> Result<(), IamError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{operation} {detail}").trim().to_string());

        let mut faults = self.faults.lock().unwrap();
        if let Some(remaining) = faults.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(IamError::Other(format!("injected failure in {operation}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IamOps for MemoryIam {
    async fn list_users(&self) -> Result<Vec<String>, IamError> {
        self.check("list_users", "")?;
        Ok(self.state.lock().unwrap().users.keys().cloned().collect())
    }

    async fn create_user(&self, name: &str) -> Result<(), IamError> {
        self.check("create_user", name)?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(name) {
            return Err(IamError::AlreadyExists(name.to_string()));
        }
        state.users.insert(name.to_string(), UserRecord::default());
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<(), IamError> {
        self.check("delete_user", name)?;
        let mut state = self.state.lock().unwrap();
        if !state.users.contains_key(name) {
            return Err(IamError::NotFound(name.to_string()));
        }
        let still_member = state.groups.values().any(|g| g.members.contains(name));
        if still_member {
            return Err(IamError::Other(format!(
                "delete conflict: user {name} still belongs to a group"
            )));
        }
        state.users.remove(name);
        Ok(())
    }

    async fn create_login_profile(
        &self,
        user: &str,
        _password: &str,
        _reset_required: bool,
    ) -> Result<(), IamError> {
        self.check("create_login_profile", user)?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .users
            .get_mut(user)
            .ok_or_else(|| IamError::NotFound(user.to_string()))?;
        if record.login_profile {
            return Err(IamError::AlreadyExists(user.to_string()));
        }
        record.login_profile = true;
        Ok(())
    }

    async fn delete_login_profile(&self, user: &str) -> Result<(), IamError> {
        self.check("delete_login_profile", user)?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .users
            .get_mut(user)
            .ok_or_else(|| IamError::NotFound(user.to_string()))?;
        if !record.login_profile {
            return Err(IamError::NotFound(format!("login profile for {user}")));
        }
        record.login_profile = false;
        Ok(())
    }

    async fn create_access_key(&self, user: &str) -> Result<AccessKey, IamError> {
        self.check("create_access_key", user)?;
        let mut state = self.state.lock().unwrap();
        state.serial += 1;
        let serial = state.serial;
        let record = state
            .users
            .get_mut(user)
            .ok_or_else(|| IamError::NotFound(user.to_string()))?;
        let key_id = format!("AKIAMEM{serial:08}");
        record.access_keys.push(key_id.clone());
        Ok(AccessKey {
            access_key_id: key_id,
            secret_access_key: format!("secret-{serial}"),
        })
    }

    async fn delete_access_keys(&self, user: &str) -> Result<(), IamError> {
        self.check("delete_access_keys", user)?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .users
            .get_mut(user)
            .ok_or_else(|| IamError::NotFound(user.to_string()))?;
        record.access_keys.clear();
        Ok(())
    }

    async fn list_groups_for_user(&self, user: &str) -> Result<Vec<String>, IamError> {
        self.check("list_groups_for_user", user)?;
        let state = self.state.lock().unwrap();
        if !state.users.contains_key(user) {
            return Err(IamError::NotFound(user.to_string()));
        }
        Ok(state
            .groups
            .iter()
            .filter(|(_, g)| g.members.contains(user))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn group_members(&self, group: &str) -> Result<Vec<String>, IamError> {
        self.check("group_members", group)?;
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(group)
            .map(|g| g.members.iter().cloned().collect())
            .ok_or_else(|| IamError::NotFound(group.to_string()))
    }

    async fn create_group(&self, name: &str) -> Result<(), IamError> {
        self.check("create_group", name)?;
        let mut state = self.state.lock().unwrap();
        if state.groups.contains_key(name) {
            return Err(IamError::AlreadyExists(name.to_string()));
        }
        state.groups.insert(name.to_string(), GroupRecord::default());
        Ok(())
    }

    async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), IamError> {
        self.check("add_user_to_group", &format!("{user} {group}"))?;
        let mut state = self.state.lock().unwrap();
        if !state.users.contains_key(user) {
            return Err(IamError::NotFound(user.to_string()));
        }
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IamError::NotFound(group.to_string()))?;
        record.members.insert(user.to_string());
        Ok(())
    }

    async fn remove_user_from_group(&self, user: &str, group: &str) -> Result<(), IamError> {
        self.check("remove_user_from_group", &format!("{user} {group}"))?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IamError::NotFound(group.to_string()))?;
        if !record.members.remove(user) {
            return Err(IamError::NotFound(format!("{user} in {group}")));
        }
        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<PolicyHandle>, IamError> {
        self.check("list_policies", "")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .policies
            .iter()
            .map(|(arn, name)| PolicyHandle {
                name: name.clone(),
                arn: arn.clone(),
            })
            .collect())
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<PolicyHandle, IamError> {
        self.check("create_policy", name)?;
        if serde_json::from_str::<serde_json::Value>(document).is_err() {
            return Err(IamError::InvalidPolicyDocument(name.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.policies.values().any(|n| n == name) {
            return Err(IamError::AlreadyExists(name.to_string()));
        }
        state.serial += 1;
        let arn = format!("arn:mem:policy/{name}/{}", state.serial);
        state.policies.insert(arn.clone(), name.to_string());
        Ok(PolicyHandle {
            name: name.to_string(),
            arn,
        })
    }

    async fn delete_policy(&self, arn: &str) -> Result<(), IamError> {
        self.check("delete_policy", arn)?;
        let mut state = self.state.lock().unwrap();
        if !state.policies.contains_key(arn) {
            return Err(IamError::NotFound(arn.to_string()));
        }
        let attached = state
            .groups
            .values()
            .any(|g| g.attached_policies.contains(arn));
        if attached {
            return Err(IamError::Other(format!(
                "delete conflict: policy {arn} still attached"
            )));
        }
        state.policies.remove(arn);
        Ok(())
    }

    async fn policy_attachments(&self, arn: &str) -> Result<Vec<String>, IamError> {
        self.check("policy_attachments", arn)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|(_, g)| g.attached_policies.contains(arn))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn detach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError> {
        self.check("detach_group_policy", &format!("{group} {arn}"))?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IamError::NotFound(group.to_string()))?;
        if !record.attached_policies.remove(arn) {
            return Err(IamError::NotFound(format!("{arn} on {group}")));
        }
        Ok(())
    }

    async fn attach_group_policy(&self, group: &str, arn: &str) -> Result<(), IamError> {
        self.check("attach_group_policy", &format!("{group} {arn}"))?;
        let mut state = self.state.lock().unwrap();
        if !state.policies.contains_key(arn) {
            return Err(IamError::NotFound(arn.to_string()));
        }
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IamError::NotFound(group.to_string()))?;
        record.attached_policies.insert(arn.to_string());
        Ok(())
    }
}
