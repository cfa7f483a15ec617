use crate::domain::external_apis::github::{RepositorySource, SourceError};
use crate::domain::models::snapshot::RepoSnapshot;
use crate::domain::models::visibility::Visibility;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::MissedTickBehavior;

/// Interval between two polls when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// File whose presence marks a repository as built on Travis CI
pub const TRAVIS_CONFIG_PATH: &str = ".travis.yml";

/// Page size used when listing the organization's repositories
const REPOSITORIES_PER_PAGE: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadataServiceConfig {
    pub org: String,
    pub visibility: Visibility,
    /// Zero falls back to [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Duration,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to list repositories of {org}: {source}")]
    ListRepositories {
        org: String,
        #[source]
        source: SourceError,
    },

    #[error("failed to probe {path} in {repo}: {source}")]
    ProbeFile {
        repo: String,
        path: String,
        #[source]
        source: SourceError,
    },
}

/// Read side of the repository metadata, served from memory.
pub trait RepoMetadataQuery {
    /// Every repository of the organization as `org/repo`, sorted by name.
    fn all_repos(&self) -> Vec<String>;
    /// The subset of [`RepoMetadataQuery::all_repos`] carrying a Travis CI config.
    fn travis_repos(&self) -> Vec<String>;
}

/// Keeps an in-memory snapshot of an organization's repositories up to date by
/// polling a [`RepositorySource`] in the background.
pub struct RepoMetadataService<S: RepositorySource + Send + Sync + 'static> {
    source: Arc<S>,
    org: String,
    visibility: Visibility,
    poll_interval: Duration,
    cache: RwLock<Arc<RepoSnapshot>>,
}

impl<S: RepositorySource + Send + Sync + 'static> RepoMetadataService<S> {
    pub fn new(source: Arc<S>, config: RepoMetadataServiceConfig) -> Self {
        let poll_interval = if config.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            config.poll_interval
        };

        Self {
            source,
            org: config.org,
            visibility: config.visibility,
            poll_interval,
            cache: RwLock::new(Arc::new(RepoSnapshot::default())),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Spawns the polling task and returns the stream of failed polls.
    ///
    /// The first poll runs right away, the following ones once per interval. A
    /// failed poll keeps the previous snapshot and does not stop the loop, even
    /// when nobody drains the returned receiver.
    pub fn start_polling(self: &Arc<Self>) -> UnboundedReceiver<RefreshError> {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if let Err(e) = service.refresh().await {
                    tracing::warn!("Poll failed, keeping previous snapshot: {}", e);
                    if errors_tx.send(e).is_err() {
                        tracing::debug!("Poll error receiver dropped, error not forwarded");
                    }
                }
            }
        });

        errors_rx
    }

    /// Recomputes both repository lists and swaps them into the cache.
    ///
    /// Any failed page or probe aborts the refresh before the cache is touched.
    #[tracing::instrument(
        name = "RepoMetadataService::refresh",
        skip(self),
        fields(org = %self.org)
    )]
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let mut all_repos = self.list_all_repositories().await?;
        all_repos.sort_unstable();
        tracing::info!("Listed {} repositories", all_repos.len());

        let mut travis_repos = Vec::new();
        for repo in &all_repos {
            let has_config = self
                .source
                .probe_file(&self.org, repo, TRAVIS_CONFIG_PATH)
                .await
                .map_err(|source| RefreshError::ProbeFile {
                    repo: format!("{}/{}", self.org, repo),
                    path: TRAVIS_CONFIG_PATH.to_string(),
                    source,
                })?;
            if has_config {
                travis_repos.push(repo.clone());
            }
        }
        tracing::info!("Found {} repositories with Travis CI", travis_repos.len());

        self.store(RepoSnapshot::from_names(&self.org, &all_repos, &travis_repos));
        Ok(())
    }

    /// The latest snapshot; both lists always stem from the same poll.
    pub fn snapshot(&self) -> Arc<RepoSnapshot> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*cache)
    }

    fn store(&self, snapshot: RepoSnapshot) {
        let snapshot = Arc::new(snapshot);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = snapshot;
    }

    async fn list_all_repositories(&self) -> Result<Vec<String>, RefreshError> {
        let mut names = Vec::new();
        let mut page = 1;

        loop {
            tracing::debug!("Fetching repository page {}", page);
            let result = self
                .source
                .list_repositories(&self.org, self.visibility, page, REPOSITORIES_PER_PAGE)
                .await
                .map_err(|source| RefreshError::ListRepositories {
                    org: self.org.clone(),
                    source,
                })?;
            names.extend(result.names);

            match result.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(names)
    }
}

impl<S: RepositorySource + Send + Sync + 'static> RepoMetadataQuery for RepoMetadataService<S> {
    fn all_repos(&self) -> Vec<String> {
        self.snapshot().all_repos.clone()
    }

    fn travis_repos(&self) -> Vec<String> {
        self.snapshot().travis_repos.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::external_apis::github::RepoPage;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    /// In-memory organization serving fixed pages of repositories.
    #[derive(Default)]
    struct FakeSource {
        pages: Vec<Vec<String>>,
        travis: HashSet<String>,
        failing_page: Option<u32>,
        failing_probe: Option<String>,
        requested_pages: Mutex<Vec<(u32, u8, Visibility)>>,
        probes: AtomicUsize,
    }

    impl FakeSource {
        fn with_repos(repos: &[&str], travis: &[&str]) -> Self {
            Self {
                pages: vec![repos.iter().map(ToString::to_string).collect()],
                travis: travis.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn failure(url: &str) -> SourceError {
            SourceError::Status {
                url: url.to_string(),
                status: StatusCode::BAD_GATEWAY,
            }
        }
    }

    #[async_trait]
    impl RepositorySource for FakeSource {
        async fn list_repositories(
            &self,
            org: &str,
            visibility: Visibility,
            page: u32,
            per_page: u8,
        ) -> Result<RepoPage, SourceError> {
            self.requested_pages
                .lock()
                .unwrap()
                .push((page, per_page, visibility));
            if self.failing_page == Some(page) {
                return Err(Self::failure(&format!("/orgs/{org}/repos?page={page}")));
            }

            let index = page as usize - 1;
            let names = self.pages.get(index).cloned().unwrap_or_default();
            let next_page = (index + 1 < self.pages.len()).then_some(page + 1);
            Ok(RepoPage { names, next_page })
        }

        async fn probe_file(
            &self,
            org: &str,
            repo: &str,
            path: &str,
        ) -> Result<bool, SourceError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            assert_eq!(path, TRAVIS_CONFIG_PATH);
            if self.failing_probe.as_deref() == Some(repo) {
                return Err(Self::failure(&format!("/repos/{org}/{repo}/contents/{path}")));
            }
            Ok(self.travis.contains(repo))
        }
    }

    fn acme_config() -> RepoMetadataServiceConfig {
        RepoMetadataServiceConfig {
            org: "acme".to_string(),
            visibility: Visibility::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    fn service(source: FakeSource) -> Arc<RepoMetadataService<FakeSource>> {
        let config = acme_config();
        Arc::new(RepoMetadataService::new(Arc::new(source), config))
    }

    fn names(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
    }

    #[test]
    fn test_zero_poll_interval_uses_default() {
        let mut config = acme_config();
        config.poll_interval = Duration::ZERO;
        let service = RepoMetadataService::new(Arc::new(FakeSource::default()), config);
        assert_eq!(service.poll_interval(), DEFAULT_POLL_INTERVAL);

        let mut config = acme_config();
        config.poll_interval = Duration::from_secs(42);
        let service = RepoMetadataService::new(Arc::new(FakeSource::default()), config);
        assert_eq!(service.poll_interval(), Duration::from_secs(42));
    }

    #[test]
    fn test_empty_before_first_poll() {
        let service = service(FakeSource::with_repos(&["a"], &["a"]));
        assert!(service.all_repos().is_empty());
        assert!(service.travis_repos().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_sorts_prefixes_and_filters() {
        let service = service(FakeSource::with_repos(&["b", "a", "c"], &["b"]));

        service.refresh().await.unwrap();

        assert_eq!(service.all_repos(), vec!["acme/a", "acme/b", "acme/c"]);
        assert_eq!(service.travis_repos(), vec!["acme/b"]);
    }

    #[tokio::test]
    async fn test_refresh_sorts_bytewise() {
        let service = service(FakeSource::with_repos(&["beta", "Zeta", "alpha", "_x"], &[]));

        service.refresh().await.unwrap();

        assert_eq!(
            service.all_repos(),
            vec!["acme/Zeta", "acme/_x", "acme/alpha", "acme/beta"]
        );
    }

    #[tokio::test]
    async fn test_travis_repos_are_subset_of_all_repos() {
        let repos = names("repo", 40);
        let travis: Vec<&str> = repos.iter().step_by(3).map(String::as_str).collect();
        let all: Vec<&str> = repos.iter().rev().map(String::as_str).collect();
        let service = service(FakeSource::with_repos(&all, &travis));

        service.refresh().await.unwrap();

        let all_repos = service.all_repos();
        let travis_repos = service.travis_repos();
        assert_eq!(travis_repos.len(), 14);
        assert!(travis_repos.iter().all(|r| all_repos.contains(r)));
        assert!(all_repos.is_sorted());
        assert!(travis_repos.is_sorted());
        assert!(all_repos.iter().all(|r| r.starts_with("acme/")));
    }

    #[tokio::test]
    async fn test_pagination_collects_every_page() {
        let mut source = FakeSource::default();
        source.pages = vec![names("p1", 30), names("p2", 30), names("p3", 5)];
        let source = Arc::new(source);
        let service = RepoMetadataService::new(
            Arc::clone(&source),
            acme_config(),
        );

        let listed = service.list_all_repositories().await.unwrap();

        assert_eq!(listed.len(), 65);
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), 65);
        assert_eq!(listed[..30], names("p1", 30)[..]);
        assert_eq!(listed[64], "p3-004");

        let requested = source.requested_pages.lock().unwrap().clone();
        assert_eq!(
            requested,
            vec![
                (1, 30, Visibility::Private),
                (2, 30, Visibility::Private),
                (3, 30, Visibility::Private),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_page_aborts_refresh() {
        let mut source = FakeSource::default();
        source.pages = vec![names("p1", 30), names("p2", 3)];
        source.failing_page = Some(2);
        let service = service(source);

        let err = service.refresh().await.unwrap_err();

        assert!(matches!(err, RefreshError::ListRepositories { ref org, .. } if org == "acme"));
        assert!(service.all_repos().is_empty());
        assert_eq!(service.source.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_previous_snapshot() {
        let mut source = FakeSource::with_repos(&["b", "a", "c"], &["a", "b"]);
        source.failing_probe = Some("b".to_string());
        let service = service(source);
        let previous = RepoSnapshot {
            all_repos: vec!["acme/old".to_string()],
            travis_repos: vec!["acme/old".to_string()],
        };
        service.store(previous.clone());

        let err = service.refresh().await.unwrap_err();

        match err {
            RefreshError::ProbeFile { repo, path, .. } => {
                assert_eq!(repo, "acme/b");
                assert_eq!(path, ".travis.yml");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*service.snapshot(), previous);
        // "a" was probed, "c" never was
        assert_eq!(service.source.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot_entirely() {
        let service = service(FakeSource::with_repos(&["new"], &[]));
        service.store(RepoSnapshot {
            all_repos: vec!["acme/gone".to_string()],
            travis_repos: vec!["acme/gone".to_string()],
        });

        service.refresh().await.unwrap();

        assert_eq!(service.all_repos(), vec!["acme/new"]);
        assert!(service.travis_repos().is_empty());
    }

    #[tokio::test]
    async fn test_start_polling_refreshes_immediately() {
        let mut config = acme_config();
        config.poll_interval = Duration::from_secs(3600);
        let service = Arc::new(RepoMetadataService::new(
            Arc::new(FakeSource::with_repos(&["b", "a"], &["a"])),
            config,
        ));

        let _errors = service.start_polling();

        timeout(Duration::from_secs(5), async {
            while service.snapshot().all_repos.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first poll did not complete");
        assert_eq!(service.all_repos(), vec!["acme/a", "acme/b"]);
        assert_eq!(service.travis_repos(), vec!["acme/a"]);
    }

    #[tokio::test]
    async fn test_polling_runs_without_error_receiver() {
        let mut config = acme_config();
        config.poll_interval = Duration::from_millis(20);
        let service = Arc::new(RepoMetadataService::new(
            Arc::new(FakeSource::with_repos(&["b", "a"], &[])),
            config,
        ));

        drop(service.start_polling());

        timeout(Duration::from_secs(5), async {
            while service.snapshot().all_repos.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("poller stopped without a receiver");
        assert_eq!(service.all_repos(), vec!["acme/a", "acme/b"]);
    }

    #[tokio::test]
    async fn test_polling_continues_after_failures() {
        let mut source = FakeSource::with_repos(&["a"], &[]);
        source.failing_page = Some(1);
        let mut config = acme_config();
        config.poll_interval = Duration::from_millis(20);
        let service = Arc::new(RepoMetadataService::new(Arc::new(source), config));

        let mut errors = service.start_polling();

        for _ in 0..3 {
            let err = timeout(Duration::from_secs(5), errors.recv())
                .await
                .expect("no poll error reported")
                .expect("poller stopped");
            assert!(matches!(err, RefreshError::ListRepositories { .. }));
        }
        assert!(service.all_repos().is_empty());
    }

    fn generation(id: usize) -> RepoSnapshot {
        RepoSnapshot::from_names(
            "acme",
            &[format!("gen{id}-a"), format!("gen{id}-b")],
            &[format!("gen{id}-b")],
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_observe_mixed_snapshots() {
        const GENERATIONS: usize = 500;
        let service = service(FakeSource::default());

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    for _ in 0..2_000 {
                        let snapshot = service.snapshot();
                        if let Some(first) = snapshot.all_repos.first() {
                            let id: usize = first
                                .trim_start_matches("acme/gen")
                                .trim_end_matches("-a")
                                .parse()
                                .unwrap();
                            assert_eq!(*snapshot, generation(id));
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for id in 0..GENERATIONS {
            service.store(generation(id));
            tokio::task::yield_now().await;
        }

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(*service.snapshot(), generation(GENERATIONS - 1));
    }
}
