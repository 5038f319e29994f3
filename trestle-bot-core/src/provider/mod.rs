//! Git hosting providers and their detection from CI environments.

pub mod github;
pub mod gitlab;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::contract::GitProvider;
use crate::error::GitProviderError;

pub use github::GitHub;
pub use gitlab::GitLab;

pub const GITHUB_SERVER_URL: &str = "https://github.com";
pub const GITLAB_SERVER_URL: &str = "https://gitlab.com";

pub(crate) const USER_AGENT: &str = concat!("trestle-bot/", env!("CARGO_PKG_VERSION"));
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    GitHub,
    GitLab,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::GitHub => "github",
            ProviderType::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = GitProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(ProviderType::GitHub),
            "gitlab" => Ok(ProviderType::GitLab),
            other => Err(GitProviderError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Builds the provider for `provider_type`.
///
/// GitHub only accepts its public server; GitLab falls back to gitlab.com
/// when no server URL is given.
pub fn provider_factory(
    access_token: &str,
    provider_type: ProviderType,
    server_url: Option<&str>,
) -> Result<Box<dyn GitProvider>, GitProviderError> {
    let server_url = server_url.filter(|u| !u.is_empty());
    match provider_type {
        ProviderType::GitHub => {
            debug!("Creating GitHub provider");
            if server_url.is_some_and(|u| u != GITHUB_SERVER_URL) {
                return Err(GitProviderError::CustomGitHubServer);
            }
            Ok(Box::new(GitHub::new(access_token)?))
        }
        ProviderType::GitLab => {
            debug!("Creating GitLab provider");
            let server_url = server_url.unwrap_or(GITLAB_SERVER_URL);
            Ok(Box::new(GitLab::new(access_token, server_url)?))
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false)
}

pub fn is_github_actions() -> bool {
    env_flag("GITHUB_ACTIONS")
}

pub fn is_gitlab_ci() -> bool {
    env_flag("GITLAB_CI")
}

/// `<CI_SERVER_PROTOCOL>://<CI_SERVER_HOST>` inside GitLab CI.
pub fn gitlab_root_url() -> Result<String, GitProviderError> {
    let protocol = std::env::var("CI_SERVER_PROTOCOL").unwrap_or_default();
    let host = std::env::var("CI_SERVER_HOST").unwrap_or_default();
    if protocol.is_empty() || host.is_empty() {
        return Err(GitProviderError::MissingCiServer);
    }
    Ok(format!("{protocol}://{host}"))
}

/// Provider type and server URL implied by the CI environment, if any.
pub fn load_provider_from_environment(
) -> Result<Option<(ProviderType, String)>, GitProviderError> {
    if is_github_actions() {
        debug!("Detected GitHub Actions environment");
        return Ok(Some((ProviderType::GitHub, GITHUB_SERVER_URL.to_string())));
    }
    if is_gitlab_ci() {
        debug!("Detected GitLab CI environment");
        return Ok(Some((ProviderType::GitLab, gitlab_root_url()?)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CI_VARS: [&str; 4] = [
        "GITHUB_ACTIONS",
        "GITLAB_CI",
        "CI_SERVER_PROTOCOL",
        "CI_SERVER_HOST",
    ];

    fn clear_ci_env() {
        for var in CI_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_provider_type() {
        assert_eq!("github".parse::<ProviderType>().unwrap(), ProviderType::GitHub);
        assert_eq!("gitlab".parse::<ProviderType>().unwrap(), ProviderType::GitLab);
        assert_eq!(
            "bitbucket".parse::<ProviderType>().unwrap_err().to_string(),
            "Unsupported git provider type bitbucket, expected github or gitlab"
        );
    }

    #[test]
    fn github_rejects_custom_server() {
        let err = provider_factory("token", ProviderType::GitHub, Some("https://ghe.example.com"))
            .err()
            .unwrap();
        assert!(matches!(err, GitProviderError::CustomGitHubServer));
        assert!(provider_factory("token", ProviderType::GitHub, Some(GITHUB_SERVER_URL)).is_ok());
    }

    #[test]
    fn gitlab_defaults_to_gitlab_com() {
        let provider = provider_factory("token", ProviderType::GitLab, None).unwrap();
        assert_eq!(
            provider
                .parse_repository("https://gitlab.com/owner/repo.git")
                .unwrap(),
            ("owner".to_string(), "repo".to_string())
        );
    }

    #[test]
    #[serial]
    fn detects_github_actions() {
        clear_ci_env();
        std::env::set_var("GITHUB_ACTIONS", "true");
        let detected = load_provider_from_environment().unwrap();
        clear_ci_env();
        assert_eq!(
            detected,
            Some((ProviderType::GitHub, GITHUB_SERVER_URL.to_string()))
        );
    }

    #[test]
    #[serial]
    fn detects_gitlab_ci_server() {
        clear_ci_env();
        std::env::set_var("GITLAB_CI", "1");
        let missing = load_provider_from_environment();
        std::env::set_var("CI_SERVER_PROTOCOL", "https");
        std::env::set_var("CI_SERVER_HOST", "gitlab.example.com");
        let detected = load_provider_from_environment().unwrap();
        clear_ci_env();

        assert!(matches!(missing, Err(GitProviderError::MissingCiServer)));
        assert_eq!(
            detected,
            Some((ProviderType::GitLab, "https://gitlab.example.com".to_string()))
        );
    }

    #[test]
    #[serial]
    fn no_ci_environment_detects_nothing() {
        clear_ci_env();
        assert_eq!(load_provider_from_environment().unwrap(), None);
    }
}
