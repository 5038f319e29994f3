//! Local repository work through git2, network work through the git CLI.
//!
//! Clone, checkout of an arbitrary ref and push shell out to `git` so that
//! credential helpers and CI-provided auth keep working.

use git2::{BranchType, DiffOptions, IndexAddOption, Repository, Signature, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{git_error, RepoError};

/// Pattern meaning "every change in the repository".
pub const ALL_FILES_PATTERN: &str = ".";

/// A name and email pair used to sign commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn signature(&self) -> Result<Signature<'static>, RepoError> {
        Signature::now(&self.name, &self.email).map_err(git_error("create_signature"))
    }
}

pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        let repo = Repository::open(path).map_err(git_error("open_repository"))?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());
        Ok(Self { repo, workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        head.shorthand().map(str::to_string)
    }

    /// Checks out `branch`, creating it from HEAD when it does not exist locally.
    pub fn checkout_branch(&self, branch: &str) -> Result<(), RepoError> {
        let ref_name = format!("refs/heads/{branch}");
        let head_commit = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(git_error("peel_to_commit"))?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(git_error("get_head")(e)),
        };

        let Some(head_commit) = head_commit else {
            debug!(branch, "Repository has no commits, pointing HEAD at branch");
            return self
                .repo
                .set_head(&ref_name)
                .map_err(git_error("set_head"));
        };

        match self.repo.find_branch(branch, BranchType::Local) {
            Ok(_) => debug!(branch, "Local branch found"),
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                self.repo
                    .branch(branch, &head_commit, false)
                    .map_err(git_error("create_branch"))?;
                debug!(branch, "Local branch created");
            }
            Err(e) => return Err(git_error("find_branch")(e)),
        }

        let target = self
            .repo
            .revparse_single(&ref_name)
            .map_err(git_error("resolve_branch"))?;
        self.repo
            .checkout_tree(&target, None)
            .map_err(git_error("checkout_tree"))?;
        self.repo
            .set_head(&ref_name)
            .map_err(git_error("set_head"))?;
        info!(branch, "Checked out branch");
        Ok(())
    }

    /// True when the working tree has modified, deleted or untracked files.
    pub fn is_dirty(&self) -> Result<bool, RepoError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(git_error("get_status"))?;
        Ok(statuses
            .iter()
            .any(|s| s.status() != git2::Status::CURRENT))
    }

    /// Stages additions, modifications and deletions matching `patterns`.
    pub fn stage_patterns(&self, patterns: &[String]) -> Result<(), RepoError> {
        let specs: Vec<&str> = if patterns.iter().any(|p| p == ALL_FILES_PATTERN) {
            info!("Staging all repository changes");
            vec!["*"]
        } else {
            patterns.iter().map(String::as_str).collect()
        };
        for spec in &specs {
            info!(pattern = %spec, "Adding files for pattern");
        }

        let mut index = self.repo.index().map_err(git_error("get_index"))?;
        index
            .add_all(specs.iter().copied(), IndexAddOption::DEFAULT, None)
            .map_err(git_error("add_all"))?;
        index
            .update_all(specs.iter().copied(), None)
            .map_err(git_error("update_all"))?;
        index.write().map_err(git_error("write_index"))
    }

    /// Paths whose staged content differs from HEAD.
    pub fn staged_changes(&self) -> Result<Vec<String>, RepoError> {
        let head_tree = match self.repo.head() {
            Ok(head) => Some(head.peel_to_tree().map_err(git_error("peel_to_tree"))?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(git_error("get_head")(e)),
        };
        let index = self.repo.index().map_err(git_error("get_index"))?;
        let mut opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), Some(&mut opts))
            .map_err(git_error("diff_tree_to_index"))?;

        let mut changes: Vec<String> = diff
            .deltas()
            .filter_map(|d| {
                d.new_file()
                    .path()
                    .or_else(|| d.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect();
        changes.sort();
        changes.dedup();
        Ok(changes)
    }

    /// Commits the index on top of HEAD and returns the new commit hash.
    pub fn commit(
        &self,
        message: &str,
        committer: &Identity,
        author: &Identity,
    ) -> Result<String, RepoError> {
        let mut index = self.repo.index().map_err(git_error("get_index"))?;
        let tree_id = index.write_tree().map_err(git_error("write_tree"))?;
        let tree = self.repo.find_tree(tree_id).map_err(git_error("find_tree"))?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(git_error("peel_to_commit"))?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let commit_id = self
            .repo
            .commit(
                Some("HEAD"),
                &author.signature()?,
                &committer.signature()?,
                message,
                &tree,
                &parents,
            )
            .map_err(git_error("create_commit"))?;
        info!(commit = %commit_id, message, "Created commit");
        Ok(commit_id.to_string())
    }

    /// `origin` when configured, otherwise the first remote.
    pub fn default_remote(&self) -> Result<(String, String), RepoError> {
        let names = self.repo.remotes().map_err(git_error("list_remotes"))?;
        let name = names
            .iter()
            .flatten()
            .find(|n| *n == "origin")
            .or_else(|| names.iter().flatten().next())
            .map(str::to_string)
            .ok_or_else(|| RepoError::NoRemote(self.workdir.clone()))?;
        let remote = self.repo.find_remote(&name).map_err(git_error("find_remote"))?;
        let url = remote.url().unwrap_or_default().to_string();
        Ok((name, url))
    }

    /// Pushes HEAD to `branch` on `remote`.
    pub fn push(&self, remote: &str, branch: &str) -> Result<(), RepoError> {
        let refspec = format!("HEAD:{branch}");
        run_git(Some(&self.workdir), "push", &["push", remote, &refspec]).map_err(|e| {
            RepoError::Push {
                branch: branch.to_string(),
                details: e.to_string(),
            }
        })?;
        info!(branch, remote, "Changes pushed successfully");
        Ok(())
    }
}

/// Full clone of `url` into `dest`.
pub fn clone_repository(url: &str, dest: &Path) -> Result<(), RepoError> {
    let dest = dest.to_string_lossy();
    run_git(None, "clone", &["clone", "--quiet", url, &dest])
}

/// Detached checkout of a branch, tag or commit in an existing clone.
pub fn checkout_ref(repo_dir: &Path, reference: &str) -> Result<(), RepoError> {
    run_git(
        Some(repo_dir),
        "checkout",
        &["checkout", "--quiet", reference],
    )
}

fn run_git(dir: Option<&Path>, operation: &str, args: &[&str]) -> Result<(), RepoError> {
    let mut command = Command::new("git");
    if let Some(dir) = dir {
        command.arg("-C").arg(dir);
    }
    debug!(?args, "Running git");
    let output = command.args(args).output().map_err(|source| RepoError::Spawn {
        operation: operation.to_string(),
        source,
    })?;
    if output.status.success() {
        return Ok(());
    }
    Err(RepoError::GitCommand {
        operation: operation.to_string(),
        details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn repo_with_commit() -> (TempDir, GitRepo) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        let git = GitRepo::open(dir.path()).unwrap();
        (dir, git)
    }

    #[test]
    fn clean_repository_is_not_dirty() {
        let (_dir, git) = repo_with_commit();
        assert!(!git.is_dirty().unwrap());
    }

    #[test]
    fn stages_only_matching_patterns() {
        let (dir, git) = repo_with_commit();
        fs::create_dir(dir.path().join("markdown")).unwrap();
        fs::write(dir.path().join("markdown/a.md"), "a\n").unwrap();
        fs::write(dir.path().join("other.txt"), "b\n").unwrap();
        assert!(git.is_dirty().unwrap());

        git.stage_patterns(&["markdown".to_string()]).unwrap();
        assert_eq!(git.staged_changes().unwrap(), vec!["markdown/a.md"]);
    }

    #[test]
    fn stage_all_includes_deletions() {
        let (dir, git) = repo_with_commit();
        fs::remove_file(dir.path().join("README.md")).unwrap();
        fs::write(dir.path().join("new.txt"), "new\n").unwrap();

        git.stage_patterns(&[ALL_FILES_PATTERN.to_string()]).unwrap();
        assert_eq!(git.staged_changes().unwrap(), vec!["README.md", "new.txt"]);
    }

    #[test]
    fn commit_uses_separate_author_and_committer() {
        let (dir, git) = repo_with_commit();
        fs::write(dir.path().join("new.txt"), "new\n").unwrap();
        git.stage_patterns(&[ALL_FILES_PATTERN.to_string()]).unwrap();

        let sha = git
            .commit(
                "chore: update",
                &Identity::new("bot", "bot@example.com"),
                &Identity::new("author", "author@example.com"),
            )
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let commit = repo.find_commit(git2::Oid::from_str(&sha).unwrap()).unwrap();
        assert_eq!(commit.author().name(), Some("author"));
        assert_eq!(commit.committer().name(), Some("bot"));
        assert!(git.staged_changes().unwrap().is_empty());
    }

    #[test]
    fn checkout_creates_missing_branch() {
        let (_dir, git) = repo_with_commit();
        git.checkout_branch("feature").unwrap();
        assert_eq!(git.current_branch().as_deref(), Some("feature"));
    }

    #[test]
    fn missing_remote_is_reported() {
        let (_dir, git) = repo_with_commit();
        assert!(matches!(git.default_remote(), Err(RepoError::NoRemote(_))));
    }
}
