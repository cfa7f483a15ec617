use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which repositories of an organization are listed (the `type` query parameter
/// of GitHub's `GET /orgs/{org}/repos`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    All,
    Public,
    #[default]
    Private,
    Forks,
    Sources,
    Member,
}

impl Visibility {
    pub const VARIANTS: [Visibility; 6] = [
        Visibility::All,
        Visibility::Public,
        Visibility::Private,
        Visibility::Forks,
        Visibility::Sources,
        Visibility::Member,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::All => "all",
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Forks => "forks",
            Visibility::Sources => "sources",
            Visibility::Member => "member",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown repository type `{0}`, expected one of: all, public, private, forks, sources, member")]
pub struct VisibilityParseError(pub String);

impl FromStr for Visibility {
    type Err = VisibilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::VARIANTS
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| VisibilityParseError(s.to_string()))
    }
}
