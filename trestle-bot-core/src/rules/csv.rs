//! Flat CSV rows in the column layout trestle's `csv-to-oscal-cd` task reads.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use super::{
    default_rule, format_field_errors, Check, ComponentInfo, Control, FromRulesTransformer,
    Parameter, Profile, ToRulesTransformer, TrestleRule,
};
use crate::error::RulesTransformerError;

pub const RULE_ID: &str = "$$Rule_Id";
pub const RULE_DESCRIPTION: &str = "$$Rule_Description";
pub const COMPONENT_TITLE: &str = "$$Component_Title";
pub const COMPONENT_TYPE: &str = "$$Component_Type";
pub const COMPONENT_DESCRIPTION: &str = "$$Component_Description";
pub const PROFILE_SOURCE: &str = "$$Profile_Source";
pub const PROFILE_DESCRIPTION: &str = "$$Profile_Description";
pub const CONTROL_ID_LIST: &str = "$$Control_Id_List";
pub const NAMESPACE: &str = "$$Namespace";
pub const PARAMETER_ID: &str = "$Parameter_Id";
pub const PARAMETER_DESCRIPTION: &str = "$Parameter_Description";
pub const PARAMETER_VALUE_ALTERNATIVES: &str = "$Parameter_Value_Alternatives";
pub const PARAMETER_VALUE_DEFAULT: &str = "$Parameter_Value_Default";
pub const CHECK_ID: &str = "$Check_Id";
pub const CHECK_DESCRIPTION: &str = "$Check_Description";

pub const TRESTLE_GENERIC_NS: &str =
    "https://oscal-compass.github.io/compliance-trestle/schemas/oscal";

pub const REQUIRED_COLUMNS: [&str; 9] = [
    RULE_ID,
    RULE_DESCRIPTION,
    COMPONENT_TITLE,
    COMPONENT_TYPE,
    COMPONENT_DESCRIPTION,
    PROFILE_SOURCE,
    PROFILE_DESCRIPTION,
    CONTROL_ID_LIST,
    NAMESPACE,
];

pub const OPTIONAL_COLUMNS: [&str; 6] = [
    PARAMETER_ID,
    PARAMETER_DESCRIPTION,
    PARAMETER_VALUE_ALTERNATIVES,
    PARAMETER_VALUE_DEFAULT,
    CHECK_ID,
    CHECK_DESCRIPTION,
];

pub type CsvRow = BTreeMap<String, String>;

/// Reads a rule from one CSV row.
#[derive(Default)]
pub struct ToRulesCsvTransformer;

impl ToRulesCsvTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl ToRulesTransformer for ToRulesCsvTransformer {
    type Input = CsvRow;

    fn transform(&self, row: &CsvRow) -> Result<TrestleRule, RulesTransformerError> {
        for column in REQUIRED_COLUMNS {
            if !row.contains_key(column) {
                return Err(RulesTransformerError::RowMissingKey(column.to_string()));
            }
        }
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        super::require_rule_name(&get(RULE_ID), RULE_ID)?;

        let include_controls = get(CONTROL_ID_LIST)
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|id| !id.is_empty())
            .map(|id| Control { id: id.to_string() })
            .collect();

        let parameter = match row.get(PARAMETER_ID).filter(|id| !id.is_empty()) {
            Some(id) => {
                let raw = row
                    .get(PARAMETER_VALUE_ALTERNATIVES)
                    .filter(|v| !v.is_empty())
                    .map(String::as_str)
                    .unwrap_or("{}");
                let alternatives: BTreeMap<String, String> = serde_json::from_str(raw)?;
                let parameter = Parameter::new(
                    id.clone(),
                    get(PARAMETER_DESCRIPTION),
                    alternatives,
                    get(PARAMETER_VALUE_DEFAULT),
                )
                .map_err(|e| RulesTransformerError::Validation(format_field_errors(&[e])))?;
                Some(parameter)
            }
            None => None,
        };

        let check = row
            .get(CHECK_ID)
            .filter(|id| !id.is_empty())
            .map(|id| Check {
                name: id.clone(),
                description: get(CHECK_DESCRIPTION),
            });

        Ok(TrestleRule {
            name: get(RULE_ID),
            description: get(RULE_DESCRIPTION),
            component: ComponentInfo {
                name: get(COMPONENT_TITLE),
                kind: get(COMPONENT_TYPE),
                description: get(COMPONENT_DESCRIPTION),
            },
            parameter,
            profile: Profile {
                description: get(PROFILE_DESCRIPTION),
                href: get(PROFILE_SOURCE),
                include_controls,
            },
            check,
        })
    }
}

/// Writes a rule as one CSV row.
#[derive(Default)]
pub struct FromRulesCsvTransformer;

impl FromRulesCsvTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl FromRulesTransformer for FromRulesCsvTransformer {
    type Output = CsvRow;

    fn transform(&self, rule: &TrestleRule) -> Result<CsvRow, RulesTransformerError> {
        let mut row = CsvRow::new();
        row.insert(RULE_ID.into(), rule.name.clone());
        row.insert(RULE_DESCRIPTION.into(), rule.description.clone());
        row.insert(NAMESPACE.into(), TRESTLE_GENERIC_NS.into());
        row.insert(PROFILE_DESCRIPTION.into(), rule.profile.description.clone());
        row.insert(PROFILE_SOURCE.into(), rule.profile.href.clone());
        row.insert(CONTROL_ID_LIST.into(), rule.control_ids().join(", "));
        row.insert(COMPONENT_TITLE.into(), rule.component.name.clone());
        row.insert(
            COMPONENT_DESCRIPTION.into(),
            rule.component.description.clone(),
        );
        row.insert(COMPONENT_TYPE.into(), rule.component.kind.clone());

        if let Some(parameter) = &rule.parameter {
            row.insert(PARAMETER_ID.into(), parameter.name.clone());
            row.insert(PARAMETER_DESCRIPTION.into(), parameter.description.clone());
            row.insert(
                PARAMETER_VALUE_ALTERNATIVES.into(),
                serde_json::to_string(&parameter.alternative_values)?,
            );
            row.insert(
                PARAMETER_VALUE_DEFAULT.into(),
                parameter.default_value.clone(),
            );
        }
        if let Some(check) = &rule.check {
            row.insert(CHECK_ID.into(), check.name.clone());
            row.insert(CHECK_DESCRIPTION.into(), check.description.clone());
        }
        Ok(row)
    }
}

/// Accumulates rule rows for one component definition and writes them out.
pub struct CsvBuilder {
    transformer: FromRulesCsvTransformer,
    rows: Vec<CsvRow>,
    fieldnames: Vec<&'static str>,
}

impl Default for CsvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvBuilder {
    pub fn new() -> Self {
        let mut fieldnames: Vec<&'static str> = REQUIRED_COLUMNS.to_vec();
        fieldnames.extend(OPTIONAL_COLUMNS);
        Self {
            transformer: FromRulesCsvTransformer::new(),
            rows: Vec::new(),
            fieldnames,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn add_row(&mut self, rule: &TrestleRule) -> Result<(), RulesTransformerError> {
        let row = self.transformer.transform(rule)?;
        self.validate_row(&row)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn validate_row(&self, row: &CsvRow) -> Result<(), RulesTransformerError> {
        for key in REQUIRED_COLUMNS {
            if !row.contains_key(key) {
                return Err(RulesTransformerError::RowMissingKey(key.to_string()));
            }
        }
        for key in row.keys() {
            if !self.fieldnames.contains(&key.as_str()) {
                return Err(RulesTransformerError::RowExtraKey(key.clone()));
            }
        }
        Ok(())
    }

    /// Writes the header, a description row and then every accumulated row.
    ///
    /// trestle skips the row after the header, so it carries the template rule.
    pub fn write_to_file(&self, path: &Path) -> Result<(), RulesTransformerError> {
        debug!(path = %path.display(), rows = self.rows.len(), "Writing rules CSV");
        let file = File::create(path).map_err(|source| RulesTransformerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = ::csv::Writer::from_writer(file);
        writer.write_record(&self.fieldnames)?;

        let example = self.transformer.transform(&default_rule())?;
        for row in std::iter::once(&example).chain(self.rows.iter()) {
            let record: Vec<&str> = self
                .fieldnames
                .iter()
                .map(|f| row.get(*f).map(String::as_str).unwrap_or(""))
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|source| RulesTransformerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Reads the rule rows of a file written by [`CsvBuilder`], skipping the
/// description row. Empty cells are dropped from each row.
pub fn read_rows(path: &Path) -> Result<Vec<CsvRow>, RulesTransformerError> {
    let mut reader = ::csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records().skip(1) {
        let record = record?;
        let row: CsvRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_rule() -> TrestleRule {
        let mut alternatives = BTreeMap::new();
        alternatives.insert("5m".to_string(), "5".to_string());
        alternatives.insert("10m".to_string(), "10".to_string());
        TrestleRule {
            name: "example_rule_1".into(),
            description: "example rule 1".into(),
            component: ComponentInfo {
                name: "Component 1".into(),
                kind: "service".into(),
                description: "Component 1 description".into(),
            },
            parameter: Some(Parameter::new("prm_1", "prm 1", alternatives, "5").unwrap()),
            profile: Profile {
                description: "Simple NIST Profile".into(),
                href: "profiles/simplified_nist_profile/profile.json".into(),
                include_controls: vec![Control { id: "ac-1".into() }, Control { id: "ac-2".into() }],
            },
            check: Some(Check {
                name: "check_1".into(),
                description: "check 1".into(),
            }),
        }
    }

    #[test]
    fn blank_rule_id_is_rejected() {
        let mut row = FromRulesCsvTransformer::new().transform(&sample_rule()).unwrap();
        row.insert(RULE_ID.to_string(), " ".to_string());
        let err = ToRulesCsvTransformer::new().transform(&row).unwrap_err();
        assert!(err.to_string().contains("rule name must not be empty"), "{err}");
    }

    #[test]
    fn row_uses_trestle_columns() {
        let row = FromRulesCsvTransformer::new().transform(&sample_rule()).unwrap();
        assert_eq!(row[RULE_ID], "example_rule_1");
        assert_eq!(row[CONTROL_ID_LIST], "ac-1, ac-2");
        assert_eq!(row[NAMESPACE], TRESTLE_GENERIC_NS);
        assert_eq!(row[PARAMETER_VALUE_DEFAULT], "5");
        assert_eq!(row[CHECK_ID], "check_1");
    }

    #[test]
    fn round_trip_preserves_rule() {
        let rule = sample_rule();
        let row = FromRulesCsvTransformer::new().transform(&rule).unwrap();
        let again = ToRulesCsvTransformer::new().transform(&row).unwrap();
        assert_eq!(rule, again);
    }

    #[test]
    fn rejects_row_missing_required_column() {
        let mut row = FromRulesCsvTransformer::new().transform(&sample_rule()).unwrap();
        row.remove(COMPONENT_TYPE);
        let err = ToRulesCsvTransformer::new().transform(&row).unwrap_err();
        assert_eq!(err.to_string(), "Row missing key: $$Component_Type");
    }

    #[test]
    fn builder_rejects_unknown_column() {
        let builder = CsvBuilder::new();
        let mut row = FromRulesCsvTransformer::new().transform(&sample_rule()).unwrap();
        row.insert("$$Unknown".into(), "x".into());
        let err = builder.validate_row(&row).unwrap_err();
        assert_eq!(err.to_string(), "Row has extra key: $$Unknown");
    }

    #[test]
    fn builder_writes_description_row_then_rules() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        let mut builder = CsvBuilder::new();
        builder.add_row(&sample_rule()).unwrap();
        assert_eq!(builder.row_count(), 1);
        builder.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("$$Rule_Id,"));
        assert!(lines[1].starts_with("example rule,"));

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        let rule = ToRulesCsvTransformer::new().transform(&rows[0]).unwrap();
        assert_eq!(rule, sample_rule());
    }
}
