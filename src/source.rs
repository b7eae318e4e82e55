//! Desired-state source.
//!
//! The declarative state lives in a Git repository: one directory per
//! account, each holding users.yml, groups.yml and policies.yml. A fetch
//! or parse failure skips that account only.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::{DesiredState, GroupSpec, PolicySpec};

#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Account names available in the state repository.
    async fn list_accounts(&self) -> anyhow::Result<Vec<String>>;
    /// The three desired-state documents for one account, assembled.
    async fn fetch(&self, account: &str) -> anyhow::Result<DesiredState>;
}

#[derive(Debug, Deserialize)]
struct UsersDoc {
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupsDoc {
    #[serde(default)]
    groups: Vec<GroupSpec>,
}

#[derive(Debug, Deserialize)]
struct PoliciesDoc {
    #[serde(default)]
    policies: Vec<PolicySpec>,
}

/// Assemble a [`DesiredState`] from the three raw YAML documents.
pub fn parse_documents(users: &str, groups: &str, policies: &str) -> anyhow::Result<DesiredState> {
    use anyhow::Context;

    let users: UsersDoc = serde_yaml::from_str(users).context("failed to parse users.yml")?;
    let groups: GroupsDoc = serde_yaml::from_str(groups).context("failed to parse groups.yml")?;
    let policies: PoliciesDoc =
        serde_yaml::from_str(policies).context("failed to parse policies.yml")?;

    Ok(DesiredState {
        users: users.users,
        groups: groups.groups,
        policies: policies.policies,
    })
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    git_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

/// Desired state fetched from a GitHub repository via the contents API.
pub struct GithubSource {
    http: reqwest::Client,
    /// "owner/name"
    repo: String,
    token: Option<String>,
}

impl GithubSource {
    pub fn new(repo: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let http = reqwest::Client::builder()
            .user_agent("iam-sync-agent")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http,
            repo: repo.into(),
            token,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        use anyhow::Context;

        debug!(url = %url, "downloading");
        let mut request = self.http.get(url).header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("GitHub returned {} for {url}", response.status());
        }
        response.json().await.context("failed to decode response")
    }

    async fn fetch_blob(&self, url: &str) -> anyhow::Result<String> {
        use anyhow::Context;

        let blob: BlobResponse = self.get_json(url).await?;
        if blob.encoding != "base64" {
            anyhow::bail!("unexpected blob encoding {}", blob.encoding);
        }
        // Blob payloads are line-wrapped base64.
        let packed: String = blob.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .context("failed to decode blob content")?;
        String::from_utf8(bytes).context("blob content is not UTF-8")
    }

    fn contents_url(&self, path: &str) -> String {
        format!("https://api.github.com/repos/{}/contents/{path}", self.repo)
    }
}

#[async_trait]
impl DesiredStateSource for GithubSource {
    async fn list_accounts(&self) -> anyhow::Result<Vec<String>> {
        let entries: Vec<ContentsEntry> = self.get_json(&self.contents_url("")).await?;
        let accounts: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.kind == "dir")
            .map(|entry| entry.name)
            .collect();
        info!(accounts = accounts.len(), repo = %self.repo, "listed accounts");
        Ok(accounts)
    }

    async fn fetch(&self, account: &str) -> anyhow::Result<DesiredState> {
        let entries: Vec<ContentsEntry> = self.get_json(&self.contents_url(account)).await?;

        let blob_url = |file: &str| -> anyhow::Result<String> {
            entries
                .iter()
                .find(|entry| entry.name == file)
                .and_then(|entry| entry.git_url.clone())
                .ok_or_else(|| anyhow::anyhow!("{file} missing for account {account}"))
        };

        let users = self.fetch_blob(&blob_url("users.yml")?).await?;
        let groups = self.fetch_blob(&blob_url("groups.yml")?).await?;
        let policies = self.fetch_blob(&blob_url("policies.yml")?).await?;

        parse_documents(&users, &groups, &policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documents() {
        let users = "users:\n  - alice\n  - bob_keys\n";
        let groups = "groups:\n  - name: devs\n    policy: devs-policy\n    users:\n      - alice\n";
        let policies = concat!(
            "policies:\n",
            "  - name: devs-policy\n",
            "    document:\n",
            "      Version: '2012-10-17'\n",
            "      Statement: []\n",
        );

        let state = parse_documents(users, groups, policies).unwrap();
        assert_eq!(state.users, vec!["alice".to_string(), "bob_keys".to_string()]);
        assert_eq!(state.groups.len(), 1);
        assert_eq!(state.groups[0].policy, "devs-policy");
        assert!(state.policies[0].document.as_ref().unwrap().is_object());
    }

    #[test]
    fn test_parse_documents_allow_empty_sections() {
        let state = parse_documents("users: []\n", "groups: []\n", "policies: []\n").unwrap();
        assert!(state.users.is_empty());
        assert!(state.groups.is_empty());
        assert!(state.policies.is_empty());
    }

    #[test]
    fn test_parse_documents_rejects_malformed_yaml() {
        assert!(parse_documents("users: [", "groups: []", "policies: []").is_err());
    }

    #[test]
    fn test_policy_without_document_survives_parse() {
        let state = parse_documents(
            "users: []",
            "groups: []",
            "policies:\n  - name: half-baked\n",
        )
        .unwrap();
        assert_eq!(state.policies[0].name, "half-baked");
        assert!(state.policies[0].document.is_none());
    }
}
