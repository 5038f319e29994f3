//! The bot runner: run the pipeline, then stage, commit, push and open a PR.
//!
//! A run walks `pre-tasks -> staging -> commit -> push -> pull request` and
//! stops early when there is nothing to commit, when `check_only` finds a
//! diff, or after the local commit in dry-run mode. A commit that was created
//! stays in the local repository even when the push fails.

use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::contract::{BotResults, GitProvider, Task};
use crate::error::RepoError;
use crate::git::{GitRepo, Identity, ALL_FILES_PATTERN};

/// Per-run switches and commit metadata.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub patterns: Vec<String>,
    pub commit_message: String,
    pub pull_request_title: String,
    pub check_only: bool,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            patterns: vec![ALL_FILES_PATTERN.to_string()],
            commit_message: "Sync automatic updates".to_string(),
            pull_request_title: "Automatic updates from bot".to_string(),
            check_only: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrestleBot {
    working_dir: PathBuf,
    branch: String,
    committer: Identity,
    author: Option<Identity>,
    target_branch: Option<String>,
}

impl TrestleBot {
    pub fn new(working_dir: impl Into<PathBuf>, branch: impl Into<String>, committer: Identity) -> Self {
        Self {
            working_dir: working_dir.into(),
            branch: branch.into(),
            committer,
            author: None,
            target_branch: None,
        }
    }

    /// Commits are authored by the committer unless both parts are given.
    pub fn with_author(mut self, name: Option<String>, email: Option<String>) -> Self {
        self.author = match (name, email) {
            (Some(name), Some(email)) => Some(Identity::new(name, email)),
            (None, None) => None,
            _ => {
                warn!("Author name and email must both be set, using the committer as author");
                None
            }
        };
        self
    }

    /// Branch that pull requests are opened against.
    pub fn with_target_branch(mut self, target_branch: Option<String>) -> Self {
        self.target_branch = target_branch.filter(|b| !b.is_empty());
        self
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn run(
        &self,
        tasks: &[Box<dyn Task>],
        provider: Option<&dyn GitProvider>,
        options: &RunOptions,
    ) -> Result<BotResults, RepoError> {
        let repo = GitRepo::open(&self.working_dir)?;
        repo.checkout_branch(&self.branch)?;

        run_tasks(tasks)?;

        if !repo.is_dirty()? {
            info!("Nothing to commit");
            return Ok(BotResults::default());
        }
        if options.check_only {
            return Err(RepoError::CheckOnly(self.branch.clone()));
        }

        repo.stage_patterns(&options.patterns)?;
        let changes = repo.staged_changes()?;
        if changes.is_empty() {
            info!("Nothing to commit");
            return Ok(BotResults::default());
        }
        for path in &changes {
            debug!(path = %path, "Staged change");
        }

        let author = self.author.as_ref().unwrap_or(&self.committer);
        let commit_sha = repo.commit(&options.commit_message, &self.committer, author)?;

        if options.dry_run {
            info!(commit = %commit_sha, "Dry run mode is enabled. Do not push to remote.");
            return Ok(BotResults {
                changes,
                commit_sha,
                pr_number: 0,
            });
        }

        let (remote, remote_url) = repo.default_remote()?;
        if let Err(e) = repo.push(&remote, &self.branch) {
            error!(error = %e, commit = %commit_sha, "Push failed, commit kept locally");
            return Err(e);
        }

        let pr_number = match (provider, self.target_branch.as_deref()) {
            (Some(provider), Some(target)) => {
                self.open_pull_request(provider, &remote_url, target, &options.pull_request_title)?
            }
            _ => 0,
        };

        Ok(BotResults {
            changes,
            commit_sha,
            pr_number,
        })
    }

    fn open_pull_request(
        &self,
        provider: &dyn GitProvider,
        remote_url: &str,
        target: &str,
        title: &str,
    ) -> Result<u64, RepoError> {
        let pull_request_error = |source| RepoError::PullRequest {
            target: target.to_string(),
            source,
        };
        let (ns, repo_name) = provider
            .parse_repository(remote_url)
            .map_err(pull_request_error)?;
        debug!(ns = %ns, repo = %repo_name, "Parsed remote repository");
        let number = provider
            .create_pull_request(&ns, &repo_name, &self.branch, target, title, "")
            .map_err(pull_request_error)?;
        info!(pr_number = number, head = %self.branch, base = %target, "Opened pull request");
        Ok(number)
    }
}

/// Runs `tasks` in order, stopping at the first failure.
fn run_tasks(tasks: &[Box<dyn Task>]) -> Result<(), RepoError> {
    for task in tasks {
        let name = task.name();
        info!(task = %name, "Running task");
        match task.execute() {
            Ok(code) => debug!(task = %name, code, "Task finished"),
            Err(e) => {
                error!(task = %name, error = %e, "Task failed");
                return Err(RepoError::PreTask(e));
            }
        }
    }
    Ok(())
}
