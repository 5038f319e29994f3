use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::validation::{scalar_string, ValidationHandler, ValidationOutcome};
use super::{
    format_field_errors, Check, ComponentInfo, Control, FieldError, FromRulesTransformer,
    Parameter, Profile, ToRulesTransformer, TrestleRule, COMPONENT_INFO_TAG, RULE_INFO_TAG,
};
use crate::error::RulesTransformerError;

/// Reads a rule from the text of one rule file.
#[derive(Default)]
pub struct ToRulesYamlTransformer {
    validation: Option<ValidationHandler>,
}

impl ToRulesYamlTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `handler` over the raw document before it is parsed.
    pub fn with_validation(handler: ValidationHandler) -> Self {
        Self {
            validation: Some(handler),
        }
    }
}

impl ToRulesTransformer for ToRulesYamlTransformer {
    type Input = str;

    fn transform(&self, blob: &str) -> Result<TrestleRule, RulesTransformerError> {
        let data: Value = serde_yaml::from_str(blob)?;

        if let Some(handler) = &self.validation {
            let mut outcome = ValidationOutcome::default();
            handler.handle(&data, &mut outcome);
            if !outcome.valid {
                let errors: Vec<FieldError> = outcome
                    .errors
                    .iter()
                    .map(|e| FieldError {
                        location: e.field_name.clone(),
                        kind: "validation".to_string(),
                        message: e.error_message.clone(),
                    })
                    .collect();
                return Err(RulesTransformerError::Validation(format_field_errors(
                    &errors,
                )));
            }
        }

        let rule_info = required_key(&data, RULE_INFO_TAG)?;
        let profile_data = required_key(rule_info, "profile")?;
        let component_data = required_key(&data, COMPONENT_INFO_TAG)?;

        let mut errors = Vec::new();
        let profile = read_profile(profile_data, &mut errors);
        let component = read_component(component_data, &mut errors);
        let parameter = rule_info
            .get("parameter")
            .and_then(|p| read_parameter(p, &mut errors));
        let check = rule_info
            .get("check")
            .and_then(|c| read_check(c, &mut errors));

        if !errors.is_empty() {
            return Err(RulesTransformerError::Validation(format_field_errors(
                &errors,
            )));
        }

        let name = required_string(rule_info, "name")?;
        super::require_rule_name(&name, "name")?;
        let description = required_string(rule_info, "description")?;

        match (profile, component) {
            (Some(profile), Some(component)) => Ok(TrestleRule {
                name,
                description,
                component,
                parameter,
                profile,
                check,
            }),
            _ => Err(RulesTransformerError::Validation(
                "rule is missing profile or component data".to_string(),
            )),
        }
    }
}

fn required_key<'a>(data: &'a Value, key: &str) -> Result<&'a Value, RulesTransformerError> {
    data.get(key)
        .ok_or_else(|| RulesTransformerError::MissingKey(key.to_string()))
}

fn required_string(data: &Value, key: &str) -> Result<String, RulesTransformerError> {
    let value = required_key(data, key)?;
    scalar_string(value).ok_or_else(|| {
        RulesTransformerError::Validation(format_field_errors(&[FieldError::type_error(
            key, "str",
        )]))
    })
}

fn field(block: &Value, prefix: &str, key: &str, errors: &mut Vec<FieldError>) -> Option<String> {
    let location = super::join_location(prefix, key);
    match block.get(key) {
        None | Some(Value::Null) => {
            errors.push(FieldError::missing(location));
            None
        }
        Some(v) => match scalar_string(v) {
            Some(s) => Some(s),
            None => {
                errors.push(FieldError::type_error(location, "str"));
                None
            }
        },
    }
}

fn read_profile(block: &Value, errors: &mut Vec<FieldError>) -> Option<Profile> {
    let description = field(block, "profile", "description", errors);
    let href = field(block, "profile", "href", errors);
    let controls = match block.get("include-controls") {
        None | Some(Value::Null) => {
            errors.push(FieldError::missing("profile.include-controls"));
            None
        }
        Some(Value::Sequence(items)) => {
            let mut controls = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let prefix = format!("profile.include-controls[{i}]");
                if let Some(id) = field(item, &prefix, "id", errors) {
                    controls.push(Control { id });
                }
            }
            Some(controls)
        }
        Some(_) => {
            errors.push(FieldError::type_error("profile.include-controls", "list"));
            None
        }
    };
    Some(Profile {
        description: description?,
        href: href?,
        include_controls: controls?,
    })
}

fn read_component(block: &Value, errors: &mut Vec<FieldError>) -> Option<ComponentInfo> {
    let name = field(block, "component", "name", errors);
    let kind = field(block, "component", "type", errors);
    let description = field(block, "component", "description", errors);
    Some(ComponentInfo {
        name: name?,
        kind: kind?,
        description: description?,
    })
}

fn read_parameter(block: &Value, errors: &mut Vec<FieldError>) -> Option<Parameter> {
    let name = field(block, "parameter", "name", errors);
    let description = field(block, "parameter", "description", errors);
    let alternatives = match block.get("alternative-values") {
        None | Some(Value::Null) => {
            errors.push(FieldError::missing("parameter.alternative-values"));
            None
        }
        Some(Value::Mapping(m)) => {
            let mut values = BTreeMap::new();
            for (k, v) in m {
                match (scalar_string(k), scalar_string(v)) {
                    (Some(k), Some(v)) => {
                        values.insert(k, v);
                    }
                    (Some(k), None) => errors.push(FieldError::type_error(
                        format!("parameter.alternative-values.{k}"),
                        "str",
                    )),
                    _ => errors.push(FieldError::type_error(
                        "parameter.alternative-values",
                        "dict",
                    )),
                }
            }
            Some(values)
        }
        Some(_) => {
            errors.push(FieldError::type_error("parameter.alternative-values", "dict"));
            None
        }
    };
    let default_value = field(block, "parameter", "default-value", errors);

    let (name, description, alternatives, default_value) =
        (name?, description?, alternatives?, default_value?);
    match Parameter::new(name, description, alternatives, default_value) {
        Ok(p) => Some(p),
        Err(e) => {
            errors.push(e.prefixed("parameter"));
            None
        }
    }
}

fn read_check(block: &Value, errors: &mut Vec<FieldError>) -> Option<Check> {
    let name = field(block, "check", "name", errors);
    let description = field(block, "check", "description", errors);
    Some(Check {
        name: name?,
        description: description?,
    })
}

#[derive(Serialize)]
struct RuleInfoDoc<'a> {
    name: &'a str,
    description: &'a str,
    profile: &'a Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<&'a Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<&'a Check>,
}

#[derive(Serialize)]
struct RuleDoc<'a> {
    #[serde(rename = "x-trestle-rule-info")]
    rule_info: RuleInfoDoc<'a>,
    #[serde(rename = "x-trestle-component-info")]
    component_info: &'a ComponentInfo,
}

/// Writes a rule as the text of one rule file.
#[derive(Default)]
pub struct FromRulesYamlTransformer;

impl FromRulesYamlTransformer {
    pub fn new() -> Self {
        Self
    }

    pub fn write_to_file(
        &self,
        rule: &TrestleRule,
        path: &Path,
    ) -> Result<(), RulesTransformerError> {
        let text = FromRulesTransformer::transform(self, rule)?;
        fs::write(path, text).map_err(|source| RulesTransformerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl FromRulesTransformer for FromRulesYamlTransformer {
    type Output = String;

    fn transform(&self, rule: &TrestleRule) -> Result<String, RulesTransformerError> {
        let doc = RuleDoc {
            rule_info: RuleInfoDoc {
                name: &rule.name,
                description: &rule.description,
                profile: &rule.profile,
                parameter: rule.parameter.as_ref(),
                check: rule.check.as_ref(),
            },
            component_info: &rule.component,
        };
        Ok(serde_yaml::to_string(&doc)?)
    }
}
