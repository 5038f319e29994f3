//! Copies OSCAL models from upstream git repositories into the workspace.
//!
//! Sources are `<repo_url>@<ref>`. Models overwrite any local model of the
//! same name; nothing is merged and nothing is deleted. Imports between the
//! synced models are not followed.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::contract::{Task, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::filter::ModelFilter;
use crate::git;
use crate::model::{self, ModelKind};
use crate::tasks::{file_name, iterate_models};

pub struct SyncUpstreamsTask {
    working_dir: PathBuf,
    sources: Vec<String>,
    filter: ModelFilter,
    validate: bool,
}

impl SyncUpstreamsTask {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        sources: Vec<String>,
        filter: Option<ModelFilter>,
        validate: bool,
    ) -> Result<Self, TaskError> {
        let working_dir = working_dir.into();
        if !model::is_valid_project_root(&working_dir) {
            return Err(TaskError::InvalidWorkspace(working_dir));
        }
        Ok(Self {
            working_dir,
            sources,
            filter: filter.unwrap_or_else(ModelFilter::include_all),
            validate,
        })
    }

    fn fetch_source(&self, source: &str) -> Result<(), TaskError> {
        let (repo_url, reference) = split_source(source)?;
        info!(source, "Syncing content");

        // Removed on drop, on every exit path.
        let clone_dir = TempDir::new_in(&self.working_dir)
            .map_err(|e| TaskError::io(&self.working_dir, e))?;
        let upstream_root = clone_dir.path();

        let fetch_error = |e: crate::error::RepoError| TaskError::Fetch {
            source_str: source.to_string(),
            details: e.to_string(),
        };
        git::clone_repository(repo_url, upstream_root).map_err(fetch_error)?;
        git::checkout_ref(upstream_root, reference).map_err(fetch_error)?;

        for kind in ModelKind::ALL {
            self.copy_models(source, upstream_root, kind)?;
        }
        info!(source, "Successfully copied");
        Ok(())
    }

    fn copy_models(&self, source: &str, upstream_root: &Path, kind: ModelKind) -> Result<(), TaskError> {
        let search_path = upstream_root.join(kind.dir());
        if !search_path.exists() {
            return Ok(());
        }
        debug!(path = %search_path.display(), "Copying models");

        for model_dir in iterate_models(&search_path, &self.filter)? {
            if !model_dir.is_dir() {
                continue;
            }
            let name = file_name(&model_dir);
            let document = model::load_model(kind, &model_dir).map_err(|e| TaskError::Sync {
                source_str: source.to_string(),
                details: e.to_string(),
            })?;

            if self.validate {
                debug!(model = %name, "Validating model");
                model::validate_model(kind, &document).map_err(|e| TaskError::InvalidModel {
                    model: name.clone(),
                    dir: search_path.clone(),
                    details: e.to_string(),
                })?;
            }

            let destination = kind.model_path(&self.working_dir, &name);
            model::write_model(&destination, &document).map_err(|e| TaskError::Sync {
                source_str: source.to_string(),
                details: e.to_string(),
            })?;
            info!(kind = kind.alias(), model = %name, "Synced model");
        }
        Ok(())
    }
}

/// Splits `<repo_url>@<ref>`. Exactly one `@` is accepted, so SSH URLs of
/// the form `git@host:path` cannot be used as sources.
pub fn split_source(source: &str) -> Result<(&str, &str), TaskError> {
    if source.matches('@').count() != 1 {
        return Err(TaskError::InvalidSource {
            source_str: source.to_string(),
        });
    }
    source
        .split_once('@')
        .ok_or_else(|| TaskError::InvalidSource {
            source_str: source.to_string(),
        })
}

impl Task for SyncUpstreamsTask {
    fn name(&self) -> String {
        "sync-upstreams".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        for source in &self.sources {
            split_source(source)?;
        }
        info!(
            sources = self.sources.len(),
            working_dir = %self.working_dir.display(),
            "Syncing upstream sources"
        );
        for source in &self.sources {
            self.fetch_source(source)?;
        }
        Ok(SUCCESS_EXIT_CODE)
    }
}
