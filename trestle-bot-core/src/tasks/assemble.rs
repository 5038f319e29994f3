use std::path::{Path, PathBuf};
use tracing::info;

use crate::authored::AuthoredObject;
use crate::contract::{Task, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::filter::ModelFilter;
use crate::tasks::{file_name, iterate_models};

/// Assembles every markdown model under `markdown_dir` into JSON.
pub struct AssembleTask {
    authored_object: AuthoredObject,
    markdown_dir: String,
    version: String,
    filter: ModelFilter,
}

impl AssembleTask {
    pub fn new(
        authored_object: AuthoredObject,
        markdown_dir: impl Into<String>,
        version: impl Into<String>,
        filter: Option<ModelFilter>,
    ) -> Self {
        Self {
            authored_object,
            markdown_dir: markdown_dir.into(),
            version: version.into(),
            filter: filter.unwrap_or_else(ModelFilter::include_all),
        }
    }

    fn working_dir(&self) -> &Path {
        self.authored_object.trestle_root()
    }
}

impl Task for AssembleTask {
    fn name(&self) -> String {
        "assemble".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let search_path = self.working_dir().join(&self.markdown_dir);
        if !search_path.exists() {
            return Err(TaskError::MissingMarkdownDir(search_path));
        }

        for model in iterate_models(&search_path, &self.filter)? {
            let model_path: PathBuf = Path::new(&self.markdown_dir).join(file_name(&model));
            info!(model = %model_path.display(), "Assembling model");
            self.authored_object
                .assemble(&model_path.to_string_lossy(), &self.version)
                .map_err(|source| TaskError::Assemble {
                    model: model_path.clone(),
                    source,
                })?;
        }
        Ok(SUCCESS_EXIT_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authored::AuthoredKind;
    use crate::contract::MockTrestle;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn missing_markdown_dir_fails() {
        let ws = tempdir().unwrap();
        fs::create_dir(ws.path().join(".trestle")).unwrap();
        let object =
            AuthoredObject::new(ws.path(), AuthoredKind::Catalog, Arc::new(MockTrestle::new()))
                .unwrap();
        let task = AssembleTask::new(object, "markdown/catalogs", "", None);
        let err = task.execute().unwrap_err();
        assert!(err.to_string().starts_with("Markdown directory"));
        assert!(err.to_string().ends_with("does not exist"));
    }

    #[test]
    fn stops_at_first_failing_model() {
        let ws = tempdir().unwrap();
        fs::create_dir(ws.path().join(".trestle")).unwrap();
        for name in ["cat_a", "cat_b", "cat_c"] {
            fs::create_dir_all(ws.path().join("markdown/catalogs").join(name)).unwrap();
        }
        let mut trestle = MockTrestle::new();
        let mut seq = mockall::Sequence::new();
        trestle
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        trestle
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err("boom".into()));

        let object =
            AuthoredObject::new(ws.path(), AuthoredKind::Catalog, Arc::new(trestle)).unwrap();
        let task = AssembleTask::new(object, "markdown/catalogs", "", None);
        let err = task.execute().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Assemble task failed for model markdown/catalogs/cat_b: Trestle assemble failed for cat_b: boom"
        );
    }
}
