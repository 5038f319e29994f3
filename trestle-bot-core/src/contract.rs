//! # contract: collaborator interfaces for the bot pipeline
//!
//! The pipeline talks to three things it does not own: the `trestle`
//! authoring tool, Git hosting APIs, and the tasks themselves. Each is a
//! trait here so production code and tests can plug in real clients or
//! `mockall` mocks.
//!
//! ## Mocking & Testing
//! - Traits are annotated with `automock`; the mocks are exported under the
//!   `test-export-mocks` feature so integration tests in other crates can use them.
//!
//! ## Plain data
//! - [`BotResults`] is the one value every bot run produces.

use mockall::automock;
use std::path::Path;

use crate::error::{GitProviderError, TaskError};

/// Exit code returned by a task that completed.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Boxed error returned by the trestle collaborator.
pub type TrestleError = Box<dyn std::error::Error + Send + Sync>;

/// Runs commands of the `trestle` compliance authoring tool.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Trestle: Send + Sync {
    /// Run `trestle <args>` with `root` as the trestle workspace root.
    fn run(&self, root: &Path, args: &[String]) -> Result<(), TrestleError>;
}

/// Opens pull/merge requests on a Git hosting service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait GitProvider: Send + Sync {
    /// Split a remote URL into `(owner or namespace, repository name)`.
    fn parse_repository(&self, repo_url: &str) -> Result<(String, String), GitProviderError>;

    /// Open a pull request from `head_branch` into `base_branch`, returning its number.
    fn create_pull_request(
        &self,
        ns: &str,
        repo_name: &str,
        head_branch: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<u64, GitProviderError>;
}

/// One stage of the bot pipeline, bound to a working directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Task {
    /// Short name used in logs.
    fn name(&self) -> String;

    /// Run the stage. Returns [`SUCCESS_EXIT_CODE`] or the first failure.
    fn execute(&self) -> Result<i32, TaskError>;
}

/// Outcome of one bot run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BotResults {
    /// Paths changed by the run, relative to the repository root.
    pub changes: Vec<String>,
    /// Hash of the created commit, empty if nothing was committed.
    pub commit_sha: String,
    /// Number of the opened pull request, 0 if none.
    pub pr_number: u64,
}
