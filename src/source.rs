//! Repository file sources.
//!
//! The orchestrator only needs two things from wherever code lives: a file
//! listing and the raw bytes of one file. [`FileSource`] captures that, and
//! [`GitHubSource`] implements it over the GitHub contents API.
//!
//! # GitHub contents API
//!
//! - Listing: `GET {api_base}/repos/{owner}/{repo}/contents/{path}` returns
//!   `[{name, path, type, download_url}]`. Entries of type `dir` are listed
//!   recursively up to `[source].max_depth` levels.
//! - Content: `GET {download_url}` with
//!   `Accept: application/vnd.github.v3.raw`.
//!
//! The caller's `Authorization` header is forwarded verbatim; without one,
//! the token in the `[source].token_env` environment variable is sent as
//! `Bearer`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::models::{EntryKind, RepoEntry};

/// A place repository files can be listed and fetched from.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use repo_analyzer::models::RepoEntry;
/// use repo_analyzer::source::FileSource;
///
/// struct EmptyRepo;
///
/// #[async_trait]
/// impl FileSource for EmptyRepo {
///     async fn list_files(&self, _repository: &str) -> Result<Vec<RepoEntry>> {
///         Ok(vec![])
///     }
///
///     async fn fetch_content(&self, entry: &RepoEntry) -> Result<Vec<u8>> {
///         anyhow::bail!("{} has no content", entry.path)
///     }
/// }
/// ```
#[async_trait]
pub trait FileSource: Send + Sync {
    /// List every file in the repository. Directory entries may be returned
    /// but are ignored by the orchestrator.
    async fn list_files(&self, repository: &str) -> Result<Vec<RepoEntry>>;

    /// Fetch the raw content of one listed file.
    async fn fetch_content(&self, entry: &RepoEntry) -> Result<Vec<u8>>;
}

/// [`FileSource`] over the GitHub REST contents API.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
    authorization: Option<String>,
    max_depth: usize,
}

impl GitHubSource {
    /// Build a source for one request.
    ///
    /// `authorization` is the full header value (e.g. `"Bearer abc"`) as
    /// received from the caller. When `None`, the configured token
    /// environment variable is consulted.
    pub fn new(config: &SourceConfig, authorization: Option<String>) -> Result<Self> {
        let authorization = authorization.or_else(|| {
            std::env::var(&config.token_env)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(|t| format!("Bearer {}", t.trim()))
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(concat!("repo-analyzer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            authorization,
            max_depth: config.max_depth,
        })
    }

    fn get(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url).header("Accept", accept);
        match &self.authorization {
            Some(auth) => req.header("Authorization", auth),
            None => req,
        }
    }

    async fn list_dir(&self, repository: &str, path: &str) -> Result<Vec<RepoEntry>> {
        let url = format!("{}/repos/{}/contents/{}", self.api_base, repository, path);
        let response = self
            .get(&url, "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }

        let entries: Vec<RepoEntry> = response
            .json()
            .await
            .with_context(|| format!("Invalid contents listing for {}/{}", repository, path))?;
        Ok(entries)
    }
}

#[async_trait]
impl FileSource for GitHubSource {
    async fn list_files(&self, repository: &str) -> Result<Vec<RepoEntry>> {
        let repository = repository.trim_matches('/');
        if repository.split('/').count() != 2 {
            bail!("Repository must be given as owner/name, got '{}'", repository);
        }

        let mut files = Vec::new();
        // Depth-first, but directories are visited in listing order so the
        // result is stable between runs.
        let mut pending: Vec<(String, usize)> = vec![(String::new(), 0)];

        while let Some((path, depth)) = pending.pop() {
            let entries = self.list_dir(repository, &path).await?;
            let mut subdirs = Vec::new();
            for entry in entries {
                match entry.kind {
                    EntryKind::File => files.push(entry),
                    EntryKind::Dir if depth < self.max_depth => {
                        subdirs.push((entry.path.clone(), depth + 1))
                    }
                    _ => {}
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }

        tracing::debug!(repository, files = files.len(), "listed repository files");
        Ok(files)
    }

    async fn fetch_content(&self, entry: &RepoEntry) -> Result<Vec<u8>> {
        let url = entry
            .download_url
            .as_deref()
            .with_context(|| format!("{} has no download URL", entry.path))?;

        let response = self
            .get(url, "application/vnd.github.v3.raw")
            .send()
            .await
            .with_context(|| format!("Failed to download {}", entry.path))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Failed to download {}: HTTP {}", entry.path, status);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_authorization_wins_over_env() {
        let cfg = SourceConfig {
            token_env: "RANA_TEST_TOKEN_UNSET_VAR".into(),
            ..SourceConfig::default()
        };
        let src = GitHubSource::new(&cfg, Some("token abc".into())).unwrap();
        assert_eq!(src.authorization.as_deref(), Some("token abc"));

        let anon = GitHubSource::new(&cfg, None).unwrap();
        assert!(anon.authorization.is_none());
    }

    #[test]
    fn api_base_trailing_slash_trimmed() {
        let cfg = SourceConfig {
            api_base: "http://localhost:9999/".into(),
            ..SourceConfig::default()
        };
        let src = GitHubSource::new(&cfg, None).unwrap();
        assert_eq!(src.api_base, "http://localhost:9999");
    }

    #[tokio::test]
    async fn rejects_malformed_repository_names() {
        let src = GitHubSource::new(&SourceConfig::default(), None).unwrap();
        let err = src.list_files("just-a-name").await.unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }
}
