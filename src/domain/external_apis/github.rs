use crate::domain::models::visibility::Visibility;
use async_trait::async_trait;
use thiserror::Error;

/// One page of an organization's repository listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPage {
    pub names: Vec<String>,
    /// Page number to request next, `None` on the last page.
    pub next_page: Option<u32>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned unexpected status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid API URL `{0}`")]
    InvalidUrl(String),
}

/// Read access to the repositories of an organization on the hosting platform.
#[async_trait]
pub trait RepositorySource {
    /// Lists one page (1-based) of repository names.
    async fn list_repositories(
        &self,
        org: &str,
        visibility: Visibility,
        page: u32,
        per_page: u8,
    ) -> Result<RepoPage, SourceError>;

    /// Reports whether `path` exists on the default branch of `org/repo`.
    ///
    /// A missing file is `Ok(false)`; only failures to find out are errors.
    async fn probe_file(&self, org: &str, repo: &str, path: &str) -> Result<bool, SourceError>;
}
