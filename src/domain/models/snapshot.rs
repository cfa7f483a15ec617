/// Both repository lists as computed by a single poll cycle.
///
/// Names are prefixed with the organization (`org/repo`) and sorted by the
/// unprefixed repository name. `travis_repos` only ever contains names that are
/// also in `all_repos`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub all_repos: Vec<String>,
    pub travis_repos: Vec<String>,
}

impl RepoSnapshot {
    /// Builds a snapshot from sorted, unprefixed names.
    pub fn from_names(org: &str, all_repos: &[String], travis_repos: &[String]) -> Self {
        Self {
            all_repos: prefix_org(org, all_repos),
            travis_repos: prefix_org(org, travis_repos),
        }
    }
}

fn prefix_org(org: &str, repos: &[String]) -> Vec<String> {
    repos.iter().map(|repo| format!("{org}/{repo}")).collect()
}
