use crate::application::services::repo_metadata::RepoMetadataServiceConfig;
use crate::domain::models::visibility::Visibility;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid listen address `{address}`: {source}")]
pub struct ListenAddrError {
    address: String,
    #[source]
    source: std::net::AddrParseError,
}

/// Serves the repositories of a GitHub organization, and those using Travis CI,
/// from a periodically refreshed in-memory cache.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// IP/Port to listen on (`:PORT` listens on all interfaces)
    #[arg(long = "addr", default_value = ":3000")]
    pub address: String,

    /// The GitHub token for authentication at the GitHub API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// The GitHub organization to fetch repositories from
    #[arg(long, env = "GITHUB_ORG")]
    pub github_org: String,

    /// Type of GitHub repos to list. Options: all, public, private, forks, sources, member
    #[arg(long, env = "GITHUB_REPO_TYPE", default_value_t = Visibility::Private)]
    pub github_repo_type: Visibility,

    /// Seconds between two polls of the GitHub API
    #[arg(long, env = "POLL_INTERVAL", value_name = "SECONDS", default_value_t = 300)]
    pub poll_interval: u64,

    /// Base URL of the GitHub REST API
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,
}

impl Config {
    pub fn listen_addr(&self) -> Result<SocketAddr, ListenAddrError> {
        let address = self.address.trim();
        let parsed = match address.strip_prefix(':') {
            Some(port) => port
                .parse::<u16>()
                .map(|port| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
                .or_else(|_| address.parse()),
            None => address.parse(),
        };
        parsed.map_err(|source| ListenAddrError {
            address: self.address.clone(),
            source,
        })
    }

    pub fn service_config(&self) -> RepoMetadataServiceConfig {
        RepoMetadataServiceConfig {
            org: self.github_org.clone(),
            visibility: self.github_repo_type,
            poll_interval: Duration::from_secs(self.poll_interval),
        }
    }
}
