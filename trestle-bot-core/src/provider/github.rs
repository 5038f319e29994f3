use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT as USER_AGENT_HEADER};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use super::{GITHUB_SERVER_URL, REQUEST_TIMEOUT, USER_AGENT};
use crate::contract::GitProvider;
use crate::error::GitProviderError;

const GITHUB_API_URL: &str = "https://api.github.com";
const REPO_PATTERN: &str = r"^(?:https?://)?github\.com/([^/]+)/([^/.]+)";

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
}

/// Pull requests through the GitHub REST API.
pub struct GitHub {
    client: Client,
    token: String,
    pattern: Regex,
}

impl GitHub {
    pub fn new(access_token: &str) -> Result<Self, GitProviderError> {
        let pattern = Regex::new(REPO_PATTERN).map_err(|e| GitProviderError::InvalidServerUrl {
            url: GITHUB_SERVER_URL.to_string(),
            details: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| GitProviderError::Http {
                url: GITHUB_API_URL.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            token: access_token.trim().to_string(),
            pattern,
        })
    }
}

impl GitProvider for GitHub {
    fn parse_repository(&self, repo_url: &str) -> Result<(String, String), GitProviderError> {
        let captures = self
            .pattern
            .captures(repo_url)
            .ok_or_else(|| GitProviderError::InvalidGitHubUrl(repo_url.to_string()))?;
        Ok((captures[1].to_string(), captures[2].to_string()))
    }

    fn create_pull_request(
        &self,
        ns: &str,
        repo_name: &str,
        head_branch: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<u64, GitProviderError> {
        let url = format!("{GITHUB_API_URL}/repos/{ns}/{repo_name}/pulls");
        debug!(url = %url, head = head_branch, base = base_branch, "Creating GitHub pull request");
        let http_error = |source| GitProviderError::Http {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT_HEADER, USER_AGENT)
            .json(&json!({
                "title": title,
                "body": body,
                "head": head_branch,
                "base": base_branch,
            }))
            .send()
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            error!(status = %status, url = %url, "GitHub API returned error");
            return Err(GitProviderError::Api {
                url: url.clone(),
                status: status.as_u16(),
                body,
            });
        }
        let pull_request: PullRequest = response.json().map_err(http_error)?;
        Ok(pull_request.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_github_urls() {
        let github = GitHub::new("fake").unwrap();
        for url in [
            "https://github.com/owner/repo",
            "https://github.com/owner/repo.git",
            "github.com/owner/repo.git",
        ] {
            assert_eq!(
                github.parse_repository(url).unwrap(),
                ("owner".to_string(), "repo".to_string()),
                "url: {url}"
            );
        }
    }

    #[test]
    fn rejects_other_hosts() {
        let github = GitHub::new("fake").unwrap();
        let err = github
            .parse_repository("https://notgithub.com/owner/repo.git")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "https://notgithub.com/owner/repo.git is an invalid GitHub repo URL"
        );
    }
}
