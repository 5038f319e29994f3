use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::filter::ModelFilter;

pub const TRESTLEBOT_CONFIG_DIR: &str = ".trestlebot";
pub const CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_MARKDOWN_DIR: &str = "markdown";
pub const DEFAULT_SSP_INDEX_FILE: &str = "ssp-index.json";

/// Workspace settings kept in `.trestlebot/config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrestleBotConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssp_index_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamsConfig>,
}

/// One upstream repository, `url` in `<repo_url>@<ref>` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    pub url: String,
    #[serde(default = "include_everything")]
    pub include_models: Vec<String>,
    #[serde(default)]
    pub exclude_models: Vec<String>,
    #[serde(default)]
    pub skip_validation: bool,
}

fn include_everything() -> Vec<String> {
    vec!["*".to_string()]
}

impl UpstreamsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_models: include_everything(),
            exclude_models: Vec::new(),
            skip_validation: false,
        }
    }

    pub fn filter(&self) -> ModelFilter {
        ModelFilter::new(&self.exclude_models, &self.include_models)
    }
}

impl TrestleBotConfig {
    /// `<repo>/.trestlebot/config.yml`
    pub fn path_in(repo: &Path) -> PathBuf {
        repo.join(TRESTLEBOT_CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn markdown_dir(&self) -> &str {
        self.markdown_dir.as_deref().unwrap_or(DEFAULT_MARKDOWN_DIR)
    }

    pub fn ssp_index_file(&self) -> &str {
        self.ssp_index_file.as_deref().unwrap_or(DEFAULT_SSP_INDEX_FILE)
    }

    /// Adds `upstream`, replacing an entry with the same URL. Returns false
    /// when an identical entry is already present.
    pub fn add_upstream(&mut self, upstream: UpstreamsConfig) -> bool {
        match self.upstreams.iter_mut().find(|u| u.url == upstream.url) {
            Some(existing) if *existing == upstream => false,
            Some(existing) => {
                *existing = upstream;
                true
            }
            None => {
                self.upstreams.push(upstream);
                true
            }
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            markdown_dir = self.markdown_dir(),
            upstreams_count = self.upstreams.len(),
            "Loaded TrestleBotConfig"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_defaults_include_everything() {
        let config: TrestleBotConfig = serde_yaml::from_str(
            "markdown_dir: md\nupstreams:\n  - url: https://github.com/org/repo@main\n",
        )
        .unwrap();
        assert_eq!(config.markdown_dir(), "md");
        assert_eq!(config.ssp_index_file(), DEFAULT_SSP_INDEX_FILE);
        assert_eq!(config.upstreams, vec![UpstreamsConfig::new("https://github.com/org/repo@main")]);
        assert!(!config.upstreams[0].filter().is_skipped("any-model"));
    }

    #[test]
    fn adding_the_same_upstream_twice_is_a_no_op() {
        let mut config = TrestleBotConfig::default();
        assert!(config.add_upstream(UpstreamsConfig::new("https://x/repo@v1")));
        assert!(!config.add_upstream(UpstreamsConfig::new("https://x/repo@v1")));

        let mut strict = UpstreamsConfig::new("https://x/repo@v1");
        strict.exclude_models = vec!["draft-*".into()];
        assert!(config.add_upstream(strict));
        assert_eq!(config.upstreams.len(), 1);
        assert!(config.upstreams[0].filter().is_skipped("draft-1"));
    }
}
