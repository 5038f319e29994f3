//! Rules view -> component definition JSON.
//!
//! Layout: `<rules_view_dir>/<compdef>/<component>/<rule>.yaml`. Each
//! component definition becomes one CSV that `trestle task csv-to-oscal-cd`
//! turns into `component-definitions/<compdef>/component-definition.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::contract::{Task, Trestle, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::filter::ModelFilter;
use crate::model::ModelKind;
use crate::rules::csv::CsvBuilder;
use crate::rules::validation::{parameter_validation, ValidationHandler};
use crate::rules::yaml::ToRulesYamlTransformer;
use crate::rules::ToRulesTransformer;
use crate::tasks::{file_name, iterate_models};

const CSV_TO_OSCAL_CD_SECTION: &str = "task.csv-to-oscal-cd";

pub struct RuleTransformTask {
    working_dir: PathBuf,
    rules_view_dir: String,
    filter: ModelFilter,
    trestle: Arc<dyn Trestle>,
}

impl RuleTransformTask {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        rules_view_dir: impl Into<String>,
        filter: Option<ModelFilter>,
        trestle: Arc<dyn Trestle>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            rules_view_dir: rules_view_dir.into(),
            filter: filter.unwrap_or_else(ModelFilter::include_all),
            trestle,
        }
    }

    fn transform_compdef(&self, compdef_dir: &Path) -> Result<(), TaskError> {
        let compdef = file_name(compdef_dir);
        let transformer =
            ToRulesYamlTransformer::with_validation(ValidationHandler::new(parameter_validation));
        let mut builder = CsvBuilder::new();

        for component in iterate_models(compdef_dir, &self.filter)? {
            if !component.is_dir() {
                continue;
            }
            for rule_file in iterate_models(&component, &self.filter)? {
                if !rule_file.is_file() {
                    continue;
                }
                debug!(rule = %rule_file.display(), "Transforming rule");
                let text =
                    fs::read_to_string(&rule_file).map_err(|e| TaskError::io(&rule_file, e))?;
                transformer
                    .transform(text.as_str())
                    .and_then(|rule| builder.add_row(&rule))
                    .map_err(|source| TaskError::Rule {
                        file: file_name(&rule_file),
                        source,
                    })?;
            }
        }

        if builder.row_count() == 0 {
            return Err(TaskError::NoRules(compdef));
        }

        write_compdef_from_csv(self.trestle.as_ref(), &self.working_dir, &compdef, &builder)?;
        info!(compdef = %compdef, rules = builder.row_count(), "Transformed rules");
        Ok(())
    }
}

/// Writes `builder` to a CSV in `working_dir` and runs trestle's CSV to
/// component definition task on it. Temp files are removed on return.
pub(crate) fn write_compdef_from_csv(
    trestle: &dyn Trestle,
    working_dir: &Path,
    compdef: &str,
    builder: &CsvBuilder,
) -> Result<(), TaskError> {
    let transform_error = |details: String| TaskError::Transform {
        compdef: compdef.to_string(),
        details,
    };
    let csv_file = tempfile::Builder::new()
        .prefix("rules")
        .suffix(".csv")
        .tempfile_in(working_dir)
        .map_err(|e| TaskError::io(working_dir, e))?;
    builder
        .write_to_file(csv_file.path())
        .map_err(|e| transform_error(e.to_string()))?;

    let config_file = tempfile::Builder::new()
        .prefix("csv-to-oscal-cd")
        .suffix(".config")
        .tempfile_in(working_dir)
        .map_err(|e| TaskError::io(working_dir, e))?;
    fs::write(config_file.path(), csv_to_oscal_cd_config(compdef, csv_file.path()))
        .map_err(|e| TaskError::io(config_file.path(), e))?;

    let args = vec![
        "task".to_string(),
        "csv-to-oscal-cd".to_string(),
        "-c".to_string(),
        config_file.path().display().to_string(),
    ];
    trestle
        .run(working_dir, &args)
        .map_err(|e| transform_error(e.to_string()))
}

fn csv_to_oscal_cd_config(compdef: &str, csv_path: &Path) -> String {
    format!(
        "[{CSV_TO_OSCAL_CD_SECTION}]\n\
         title = Component definition for {compdef}\n\
         version = 1.0\n\
         csv-file = {}\n\
         output-dir = {}/{compdef}\n\
         output-overwrite = true\n",
        csv_path.display(),
        ModelKind::ComponentDefinition.dir(),
    )
}

impl Task for RuleTransformTask {
    fn name(&self) -> String {
        "rule-transform".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let search_path = self.working_dir.join(&self.rules_view_dir);
        for compdef_dir in iterate_models(&search_path, &self.filter)? {
            if compdef_dir.is_dir() {
                self.transform_compdef(&compdef_dir)?;
            }
        }
        Ok(SUCCESS_EXIT_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockTrestle;
    use crate::rules::csv::{read_rows, RULE_ID};
    use tempfile::{tempdir, TempDir};

    const RULE: &str = r#"
x-trestle-rule-info:
  name: example_rule_1
  description: Example rule
  parameter:
    name: prm_1
    description: Parameter one
    alternative-values:
      default: "5%"
      "5pc": "5%"
      "10pc": "10%"
    default-value: "5%"
  profile:
    description: Simple profile
    href: profiles/simplified_nist_profile/profile.json
    include-controls:
      - id: ac-1
x-trestle-component-info:
  name: Component 1
  type: service
  description: Component 1 description
"#;

    fn workspace() -> TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(".trestle")).unwrap();
        dir
    }

    #[test]
    fn writes_one_csv_per_component_definition() {
        let ws = workspace();
        let component = ws.path().join("rules/test_comp/test_component");
        fs::create_dir_all(&component).unwrap();
        fs::write(component.join("test_rule.yaml"), RULE).unwrap();

        let mut trestle = MockTrestle::new();
        trestle
            .expect_run()
            .withf(|_, args| {
                let config = fs::read_to_string(&args[3]).unwrap();
                let csv_line = config
                    .lines()
                    .find_map(|l| l.strip_prefix("csv-file = "))
                    .unwrap()
                    .to_string();
                let rows = read_rows(Path::new(&csv_line)).unwrap();
                args[..3] == ["task", "csv-to-oscal-cd", "-c"]
                    && config.contains("output-dir = component-definitions/test_comp")
                    && rows.len() == 1
                    && rows[0][RULE_ID] == "example_rule_1"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let task = RuleTransformTask::new(ws.path(), "rules", None, Arc::new(trestle));
        assert_eq!(task.execute().unwrap(), SUCCESS_EXIT_CODE);
    }

    #[test]
    fn empty_component_definition_is_an_error() {
        let ws = workspace();
        fs::create_dir_all(ws.path().join("rules/empty_comp/component")).unwrap();
        let mut trestle = MockTrestle::new();
        trestle.expect_run().never();

        let task = RuleTransformTask::new(ws.path(), "rules", None, Arc::new(trestle));
        let err = task.execute().unwrap_err();
        assert_eq!(err.to_string(), "No rules found for component definition empty_comp");
    }

    #[test]
    fn one_bad_rule_fails_the_batch() {
        let ws = workspace();
        let component = ws.path().join("rules/test_comp/test_component");
        fs::create_dir_all(&component).unwrap();
        fs::write(component.join("a_rule.yaml"), RULE).unwrap();
        fs::write(component.join("b_rule.yaml"), "x-trestle-component-info: {}\n").unwrap();
        let mut trestle = MockTrestle::new();
        trestle.expect_run().never();

        let task = RuleTransformTask::new(ws.path(), "rules", None, Arc::new(trestle));
        let err = task.execute().unwrap_err();
        assert_eq!(
            err.to_string(),
            "b_rule.yaml: Missing key in YAML file: 'x-trestle-rule-info'"
        );
    }

    #[test]
    fn skipped_rule_files_are_not_read() {
        let ws = workspace();
        let component = ws.path().join("rules/cd/comp");
        fs::create_dir_all(&component).unwrap();
        fs::write(component.join("draft_rule.yaml"), "x-trestle-component-info: {}\n").unwrap();
        let mut trestle = MockTrestle::new();
        trestle.expect_run().never();

        let filter = ModelFilter::new(&["draft_*"], &["*"]);
        let task = RuleTransformTask::new(ws.path(), "rules", Some(filter), Arc::new(trestle));
        let err = task.execute().unwrap_err();
        assert_eq!(err.to_string(), "No rules found for component definition cd");
    }

    #[test]
    fn skipped_component_definitions_are_not_transformed() {
        let ws = workspace();
        fs::create_dir_all(ws.path().join("rules/skipped_comp/component")).unwrap();
        let mut trestle = MockTrestle::new();
        trestle.expect_run().never();

        let filter = ModelFilter::new(&["skipped_comp"], &["*"]);
        let task = RuleTransformTask::new(ws.path(), "rules", Some(filter), Arc::new(trestle));
        assert_eq!(task.execute().unwrap(), SUCCESS_EXIT_CODE);
    }
}
