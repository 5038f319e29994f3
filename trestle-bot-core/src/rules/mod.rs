//! Rule records and the transformers that move them between serialized forms.
//!
//! A [`TrestleRule`] is read from one YAML rule file or one CSV row and
//! written back to either. Readers implement [`ToRulesTransformer`], writers
//! implement [`FromRulesTransformer`].

pub mod csv;
pub mod validation;
pub mod yaml;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RulesTransformerError;

pub const RULE_INFO_TAG: &str = "x-trestle-rule-info";
pub const COMPONENT_INFO_TAG: &str = "x-trestle-component-info";

/// Key under `alternative-values` that mirrors the parameter default.
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// A catalog control id or statement id a rule implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub description: String,
    pub href: String,
    #[serde(rename = "include-controls")]
    pub include_controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "alternative-values")]
    pub alternative_values: BTreeMap<String, String>,
    #[serde(rename = "default-value")]
    pub default_value: String,
}

impl Parameter {
    /// Builds a parameter, enforcing that the default is one of the
    /// alternatives and is recorded under the `default` key.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        mut alternative_values: BTreeMap<String, String>,
        default_value: impl Into<String>,
    ) -> Result<Self, FieldError> {
        let default_value = default_value.into();
        if alternative_values.is_empty() {
            return Err(FieldError::value(
                "default-value",
                "Alternative values must be provided",
            ));
        }
        if !alternative_values.values().any(|v| *v == default_value) {
            return Err(FieldError::value(
                "default-value",
                format!(
                    "Default value {} must be in the alternative values {:?}",
                    default_value,
                    alternative_values.values().collect::<Vec<_>>()
                ),
            ));
        }
        match alternative_values.get(DEFAULT_KEY) {
            None => {
                alternative_values.insert(DEFAULT_KEY.to_string(), default_value.clone());
            }
            Some(existing) if existing.is_empty() => {
                alternative_values.insert(DEFAULT_KEY.to_string(), default_value.clone());
            }
            Some(existing) if *existing != default_value => {
                return Err(FieldError::value(
                    "default-value",
                    format!(
                        "Default value {} must be in the alternative values {:?} under the key {}",
                        default_value, alternative_values, DEFAULT_KEY
                    ),
                ));
            }
            Some(_) => {}
        }
        Ok(Self {
            name: name.into(),
            description: description.into(),
            alternative_values,
            default_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub description: String,
}

/// Canonical in-memory rule. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrestleRule {
    pub name: String,
    pub description: String,
    pub component: ComponentInfo,
    pub parameter: Option<Parameter>,
    pub profile: Profile,
    pub check: Option<Check>,
}

impl TrestleRule {
    /// Ids of the controls this rule implements, in declaration order.
    pub fn control_ids(&self) -> Vec<&str> {
        self.profile
            .include_controls
            .iter()
            .map(|c| c.id.as_str())
            .collect()
    }
}

/// Template rule used for the description row of generated CSV files.
pub fn default_rule() -> TrestleRule {
    TrestleRule {
        name: "example rule".to_string(),
        description: "example description".to_string(),
        component: ComponentInfo {
            name: "example component".to_string(),
            kind: "service".to_string(),
            description: "example description".to_string(),
        },
        parameter: None,
        profile: Profile {
            description: "example profile".to_string(),
            href: "example href".to_string(),
            include_controls: vec![Control {
                id: "example".to_string(),
            }],
        },
        check: None,
    }
}

/// Reads a rule from one serialized blob.
pub trait ToRulesTransformer {
    type Input: ?Sized;

    fn transform(&self, input: &Self::Input) -> Result<TrestleRule, RulesTransformerError>;
}

/// Writes a rule to one serialized blob.
pub trait FromRulesTransformer {
    type Output;

    fn transform(&self, rule: &TrestleRule) -> Result<Self::Output, RulesTransformerError>;
}

/// One field-level problem found while reading a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub location: String,
    pub kind: String,
    pub message: String,
}

impl FieldError {
    pub fn missing(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            kind: "value_error.missing".to_string(),
            message: "field required".to_string(),
        }
    }

    pub fn type_error(location: impl Into<String>, expected: &str) -> Self {
        Self {
            location: location.into(),
            kind: format!("type_error.{expected}"),
            message: format!("{expected} type expected"),
        }
    }

    pub fn value(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            kind: "value_error".to_string(),
            message: message.into(),
        }
    }

    fn prefixed(mut self, prefix: &str) -> Self {
        self.location = join_location(prefix, &self.location);
        self
    }
}

pub(crate) fn join_location(prefix: &str, location: &str) -> String {
    if prefix.is_empty() {
        location.to_string()
    } else if location.starts_with('[') {
        format!("{prefix}{location}")
    } else {
        format!("{prefix}.{location}")
    }
}

/// Renders collected field errors as one message, one line per error.
pub fn format_field_errors(errors: &[FieldError]) -> String {
    let lines: Vec<String> = errors
        .iter()
        .map(|e| {
            format!(
                "Location: {}, Type: {}, Message: {}",
                e.location, e.kind, e.message
            )
        })
        .collect();
    format!("{} error(s) found:\n{}", errors.len(), lines.join("\n"))
}

/// A rule must carry a non-blank name; `location` names where it was read.
pub(crate) fn require_rule_name(name: &str, location: &str) -> Result<(), RulesTransformerError> {
    if name.trim().is_empty() {
        return Err(RulesTransformerError::Validation(format_field_errors(&[
            FieldError::value(location, "rule name must not be empty"),
        ])));
    }
    Ok(())
}
