//! Durable-storage client: obfuscated file keys and dataset-repo uploads.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StorageAccountConfig;

const HUB_BASE: &str = "https://huggingface.co";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const REPO_NAME: &str = "weaboo-storage";

/// 32-hex obfuscated filename: the identity tuple under the shared salt.
/// Deterministic across processes, unguessable without the salt.
#[must_use]
pub fn file_key(
    salt: &str,
    mal_id: i32,
    episode: i32,
    provider: &str,
    resolution: Option<&str>,
) -> String {
    let raw = format!(
        "{salt}:{mal_id}:{episode}:{provider}:{}",
        resolution.unwrap_or("unknown")
    );
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Repo-internal path for one archived episode.
#[must_use]
pub fn storage_path(namespace: &str, mal_id: i32, episode: i32, file_key: &str) -> String {
    format!("{namespace}-{mal_id}/{mal_id}/ep{episode}/{file_key}.mp4")
}

/// Strip an account owner down to repo-id-safe characters.
#[must_use]
pub fn sanitize_owner(owner: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").ok())
        .as_ref()?;

    let cleaned = re
        .replace_all(&owner.trim().replace(' ', "-"), "")
        .trim_matches(['-', '.'])
        .to_string();

    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub repo_id: String,
    pub path: String,
    pub direct_url: String,
}

pub struct StorageClient {
    client: Client,
    accounts: Vec<StorageAccountConfig>,
}

impl StorageClient {
    #[must_use]
    pub fn new(accounts: Vec<StorageAccountConfig>) -> Self {
        Self {
            client: Client::builder()
                .timeout(UPLOAD_TIMEOUT)
                .build()
                .unwrap_or_default(),
            accounts,
        }
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn accounts(&self) -> &[StorageAccountConfig] {
        &self.accounts
    }

    /// One public dataset repo per storage account; all shows live inside.
    /// Public is fine: filenames are salted hashes.
    #[must_use]
    pub fn repo_id(account: &StorageAccountConfig) -> Option<String> {
        sanitize_owner(&account.owner).map(|owner| format!("{owner}/{REPO_NAME}"))
    }

    #[must_use]
    pub fn direct_url(repo_id: &str, path: &str) -> String {
        format!("{HUB_BASE}/datasets/{repo_id}/resolve/main/{path}")
    }

    pub async fn ensure_repo(&self, account: &StorageAccountConfig) -> Result<String> {
        let repo_id = Self::repo_id(account)
            .ok_or_else(|| anyhow::anyhow!("storage owner {:?} is invalid", account.owner))?;

        let response = self
            .client
            .post(format!("{HUB_BASE}/api/repos/create"))
            .bearer_auth(&account.token)
            .json(&serde_json::json!({
                "type": "dataset",
                "name": REPO_NAME,
                "private": false,
            }))
            .send()
            .await
            .context("repo create request failed")?;

        // 409 means the repo already exists, which is the steady state.
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            debug!(repo = %repo_id, "storage repo ready");
            return Ok(repo_id);
        }

        anyhow::bail!(
            "repo create for {repo_id} returned {}",
            response.status()
        )
    }

    /// Commit one file to the repo over the hub's NDJSON commit endpoint
    /// and return its direct download URL.
    pub async fn upload_file(
        &self,
        account: &StorageAccountConfig,
        repo_id: &str,
        local_path: &Path,
        repo_path: &str,
        summary: &str,
    ) -> Result<UploadedFile> {
        let bytes = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("reading {} for upload", local_path.display()))?;

        let header = serde_json::json!({
            "key": "header",
            "value": {"summary": summary},
        });
        let file = serde_json::json!({
            "key": "file",
            "value": {
                "path": repo_path,
                "encoding": "base64",
                "content": BASE64.encode(&bytes),
            },
        });
        let body = format!("{header}\n{file}");

        let response = self
            .client
            .post(format!("{HUB_BASE}/api/datasets/{repo_id}/commit/main"))
            .bearer_auth(&account.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("commit request failed")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "upload to {repo_id}/{repo_path} returned {}",
                response.status()
            );
        }

        info!(repo = %repo_id, path = %repo_path, "upload committed");
        Ok(UploadedFile {
            repo_id: repo_id.to_string(),
            path: repo_path.to_string(),
            direct_url: Self::direct_url(repo_id, repo_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_deterministic_and_shaped() {
        let a = file_key("salt", 55825, 1, "animasu", Some("720p"));
        let b = file_key("salt", 55825, 1, "animasu", Some("720p"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_file_key_varies_by_tuple_and_salt() {
        let base = file_key("salt", 55825, 1, "animasu", Some("720p"));
        assert_ne!(base, file_key("other", 55825, 1, "animasu", Some("720p")));
        assert_ne!(base, file_key("salt", 55825, 2, "animasu", Some("720p")));
        assert_ne!(base, file_key("salt", 55825, 1, "samehadaku", Some("720p")));
        assert_ne!(base, file_key("salt", 55825, 1, "animasu", None));
    }

    #[test]
    fn test_sanitize_owner() {
        assert_eq!(sanitize_owner(" My User ").as_deref(), Some("My-User"));
        assert_eq!(sanitize_owner("user.name_1").as_deref(), Some("user.name_1"));
        assert_eq!(sanitize_owner("--..--"), None);
        assert_eq!(sanitize_owner("a$b!c").as_deref(), Some("abc"));
    }

    #[test]
    fn test_storage_path_layout() {
        assert_eq!(
            storage_path("weaboo", 55825, 3, "abc123"),
            "weaboo-55825/55825/ep3/abc123.mp4"
        );
    }
}
