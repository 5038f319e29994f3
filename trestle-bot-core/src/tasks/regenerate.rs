use std::path::Path;
use tracing::info;

use crate::authored::AuthoredObject;
use crate::contract::{Task, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::filter::ModelFilter;
use crate::tasks::{file_name, iterate_models};

/// Regenerates markdown under `markdown_dir` from every JSON model of the
/// authored object's kind.
pub struct RegenerateTask {
    authored_object: AuthoredObject,
    markdown_dir: String,
    filter: ModelFilter,
}

impl RegenerateTask {
    pub fn new(
        authored_object: AuthoredObject,
        markdown_dir: impl Into<String>,
        filter: Option<ModelFilter>,
    ) -> Self {
        Self {
            authored_object,
            markdown_dir: markdown_dir.into(),
            filter: filter.unwrap_or_else(ModelFilter::include_all),
        }
    }
}

impl Task for RegenerateTask {
    fn name(&self) -> String {
        "regenerate".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let model_dir = self.authored_object.kind().model_kind().dir();
        let search_path = self.authored_object.trestle_root().join(model_dir);
        if !search_path.exists() {
            info!(path = %search_path.display(), "No models to regenerate");
            return Ok(SUCCESS_EXIT_CODE);
        }

        for model in iterate_models(&search_path, &self.filter)? {
            info!(model = %model.display(), "Regenerating model");
            let model_path = Path::new(model_dir).join(file_name(&model));
            self.authored_object
                .regenerate(&model_path.to_string_lossy(), &self.markdown_dir)
                .map_err(|source| TaskError::Regenerate {
                    model: model.clone(),
                    source,
                })?;
        }
        Ok(SUCCESS_EXIT_CODE)
    }
}
