use crate::domain::external_apis::github::{RepoPage, RepositorySource, SourceError};
use crate::domain::models::visibility::Visibility;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::header::{ETAG, HeaderMap, IF_NONE_MATCH, LINK};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;

const GITHUB_JSON: &str = "application/vnd.github.v3+json";

// Raw file contents have a stable ETag; the JSON representation embeds
// short-lived download tokens and changes on every request.
const GITHUB_RAW: &str = "application/vnd.github.v3.raw";

const USER_AGENT: &str = "repo-metadata-rust-app";

/// Upper bound on remembered responses per cache
const MAX_CACHED_RESPONSES: u64 = 10_000;

#[derive(Deserialize, Debug, Clone)]
struct GitHubRepositoryResponse {
    name: String,
}

#[derive(Debug, Clone)]
struct CachedPage {
    etag: String,
    page: RepoPage,
}

/// [`RepositorySource`] backed by the GitHub REST API.
///
/// Responses carrying an `ETag` are remembered per URL and revalidated with
/// `If-None-Match`, so unchanged pages and files cost a `304` instead of a full
/// payload (GitHub does not count those against the rate limit).
pub struct GitHubApiAdapter {
    client: Client,
    base_url: Url,
    github_token: String,
    pages: Cache<String, Arc<CachedPage>>,
    // URL -> ETag of a file known to exist
    probes: Cache<String, String>,
}

impl GitHubApiAdapter {
    pub fn new(base_url: &str, github_token: String) -> Result<Self, SourceError> {
        let base_url =
            Url::parse(base_url).map_err(|_| SourceError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            github_token,
            pages: Cache::builder().max_capacity(MAX_CACHED_RESPONSES).build(),
            probes: Cache::builder().max_capacity(MAX_CACHED_RESPONSES).build(),
        })
    }

    /// Joins percent-encoded `segments` onto the base URL.
    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: &Url, accept: &str) -> RequestBuilder {
        let request = self
            .client
            .get(url.clone())
            .header("Accept", accept)
            .header("User-Agent", USER_AGENT);
        if self.github_token.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.github_token))
        }
    }
}

#[async_trait]
impl RepositorySource for GitHubApiAdapter {
    #[tracing::instrument(name = "GitHubApiAdapter::list_repositories", skip(self))]
    async fn list_repositories(
        &self,
        org: &str,
        visibility: Visibility,
        page: u32,
        per_page: u8,
    ) -> Result<RepoPage, SourceError> {
        let mut url = self.endpoint(["orgs", org, "repos"])?;
        url.query_pairs_mut()
            .append_pair("type", visibility.as_str())
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());
        let key = url.to_string();

        let cached = self.pages.get(&key).await;
        let mut request = self.get(&url, GITHUB_JSON);
        if let Some(cached) = &cached {
            request = request.header(IF_NONE_MATCH, cached.etag.as_str());
        }

        let response = request.send().await.map_err(|source| SourceError::Transport {
            url: key.clone(),
            source,
        })?;

        match (response.status(), cached) {
            (StatusCode::NOT_MODIFIED, Some(cached)) => {
                tracing::debug!("Repository page {} not modified", page);
                // The body is unchanged but later pages may have appeared
                let next_page = if response.headers().contains_key(LINK) {
                    next_page_from_link(response.headers())
                } else {
                    cached.page.next_page
                };
                if next_page != cached.page.next_page {
                    let entry = Arc::new(CachedPage {
                        etag: cached.etag.clone(),
                        page: RepoPage {
                            names: cached.page.names.clone(),
                            next_page,
                        },
                    });
                    self.pages.insert(key, Arc::clone(&entry)).await;
                    return Ok(entry.page.clone());
                }
                return Ok(cached.page.clone());
            }
            (status, _) if status.is_success() => {}
            (status, _) => return Err(SourceError::Status { url: key, status }),
        }

        let next_page = next_page_from_link(response.headers());
        let etag = etag_of(response.headers());
        let repositories: Vec<GitHubRepositoryResponse> =
            response.json().await.map_err(|source| SourceError::Decode {
                url: key.clone(),
                source,
            })?;

        let page = RepoPage {
            names: repositories.into_iter().map(|repo| repo.name).collect(),
            next_page,
        };
        match etag {
            Some(etag) => {
                let entry = Arc::new(CachedPage {
                    etag,
                    page: page.clone(),
                });
                self.pages.insert(key, entry).await;
            }
            None => self.pages.invalidate(&key).await,
        }

        Ok(page)
    }

    #[tracing::instrument(name = "GitHubApiAdapter::probe_file", skip(self))]
    async fn probe_file(&self, org: &str, repo: &str, path: &str) -> Result<bool, SourceError> {
        let segments = ["repos", org, repo, "contents"]
            .into_iter()
            .chain(path.split('/').filter(|segment| !segment.is_empty()));
        let url = self.endpoint(segments)?;
        let key = url.to_string();

        let cached_etag = self.probes.get(&key).await;
        let mut request = self.get(&url, GITHUB_RAW);
        if let Some(etag) = &cached_etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }

        let response = request.send().await.map_err(|source| SourceError::Transport {
            url: key.clone(),
            source,
        })?;

        match response.status() {
            StatusCode::NOT_MODIFIED if cached_etag.is_some() => Ok(true),
            StatusCode::OK => {
                match etag_of(response.headers()) {
                    Some(etag) => self.probes.insert(key, etag).await,
                    None => self.probes.invalidate(&key).await,
                }
                Ok(true)
            }
            StatusCode::NOT_FOUND => {
                self.probes.invalidate(&key).await;
                Ok(false)
            }
            status => Err(SourceError::Status { url: key, status }),
        }
    }
}

fn etag_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

/// Extracts the `page` parameter of the `rel="next"` target of a `Link` header.
fn next_page_from_link(headers: &HeaderMap) -> Option<u32> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|param| param.trim() == r#"rel="next""#) {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let url = Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(name, _)| name == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}
