//! Provider clients: GitHub and GitLab backends sharing a common LRU
//! caching core.

pub mod core;
pub mod filter;
pub mod github;
pub mod gitlab;
pub mod http;

pub use core::{OwnerInfo, ProviderCache, RepositoryInfo};
pub use filter::FilterRules;
pub use github::GitHubBackend;
pub use gitlab::GitLabBackend;

use std::time::Duration;

use crate::error::{Error, Result};

pub fn build(provider_name: &str, token: Option<String>) -> Result<ProviderCache> {
    build_with_filter(provider_name, token, FilterRules::empty())
}

pub fn build_with_filter(provider_name: &str, token: Option<String>, filter: FilterRules) -> Result<ProviderCache> {
    let backend: Box<dyn core::Backend> = match provider_name {
        "github" => Box::new(GitHubBackend::new(token)),
        "gitlab" => Box::new(GitLabBackend::new(token)),
        other => return Err(Error::NotFound(format!("unknown provider {other}"))),
    };
    Ok(ProviderCache::new(backend, false, Duration::from_secs(300), filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_known_providers() {
        assert!(build("github", None).is_ok());
        assert!(build("gitlab", None).is_ok());
    }

    #[test]
    fn unknown_provider_is_not_found() {
        assert!(build("bitbucket", None).is_err());
    }
}
