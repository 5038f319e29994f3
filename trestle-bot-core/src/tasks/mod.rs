//! Pipeline stages run by the bot before it commits.
//!
//! Each stage implements [`crate::contract::Task`]. The caller decides the
//! order; autosync runs assemble before regenerate.

pub mod assemble;
pub mod cac;
pub mod regenerate;
pub mod rule_transform;
pub mod sync_upstreams;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TaskError;
use crate::filter::ModelFilter;

pub use assemble::AssembleTask;
pub use regenerate::RegenerateTask;
pub use rule_transform::RuleTransformTask;
pub use sync_upstreams::SyncUpstreamsTask;

/// Immediate children of `dir` that survive `filter`, sorted by name.
///
/// Hidden entries are dropped unless they are directories.
pub fn iterate_models(dir: &Path, filter: &ModelFilter) -> Result<Vec<PathBuf>, TaskError> {
    let entries = fs::read_dir(dir).map_err(|e| TaskError::io(dir, e))?;
    let mut models = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TaskError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if filter.is_skipped(&name) {
            continue;
        }
        if name.starts_with('.') && !path.is_dir() {
            continue;
        }
        models.push(path);
    }
    models.sort();
    Ok(models)
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn iterates_filtered_sorted_children() {
        let dir = tempdir().unwrap();
        for name in ["b_model", "a_model", "skipped_model"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join(".keep"), "").unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        fs::create_dir(dir.path().join(".hidden_dir")).unwrap();

        let filter = ModelFilter::new(&["skipped_*"], &["*"]);
        let names: Vec<String> = iterate_models(dir.path(), &filter)
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec![".hidden_dir", "a_model", "b_model"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let err = iterate_models(&dir.path().join("absent"), &ModelFilter::include_all());
        assert!(matches!(err, Err(TaskError::Io { .. })));
    }
}
