//! Chained checks run over raw rule data before it is parsed.

use serde_yaml::Value;
use tracing::debug;

use super::{DEFAULT_KEY, RULE_INFO_TAG};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleValidationError {
    pub field_name: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub errors: Vec<RuleValidationError>,
    pub valid: bool,
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self {
            errors: Vec::new(),
            valid: true,
        }
    }
}

impl ValidationOutcome {
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors.push(RuleValidationError {
            field_name: field.to_string(),
            error_message: message.to_string(),
        });
        self.valid = false;
    }
}

pub type ValidateFn = fn(&Value, &mut ValidationOutcome);

/// A validation step that hands the same data on to the next step.
pub struct ValidationHandler {
    validate: ValidateFn,
    next: Option<Box<ValidationHandler>>,
}

impl ValidationHandler {
    pub fn new(validate: ValidateFn) -> Self {
        Self {
            validate,
            next: None,
        }
    }

    pub fn then(mut self, next: ValidationHandler) -> Self {
        match self.next.take() {
            Some(existing) => self.next = Some(Box::new(existing.then(next))),
            None => self.next = Some(Box::new(next)),
        }
        self
    }

    pub fn handle(&self, data: &Value, outcome: &mut ValidationOutcome) {
        (self.validate)(data, outcome);
        if let Some(next) = &self.next {
            next.handle(data, outcome);
        }
    }
}

/// Checks the parameter block of a rule file for a consistent default.
pub fn parameter_validation(data: &Value, outcome: &mut ValidationOutcome) {
    let parameter = match data.get(RULE_INFO_TAG).and_then(|r| r.get("parameter")) {
        Some(p) if !is_empty(p) => p,
        _ => {
            debug!("No parameter data found");
            return;
        }
    };

    let default_value = parameter
        .get("default-value")
        .and_then(scalar_string)
        .unwrap_or_default();
    let alternatives = parameter.get("alternative-values");

    if default_value.is_empty() {
        outcome.add_error("parameter", "Default value is required");
    }
    if alternatives.map_or(true, is_empty) {
        outcome.add_error("parameter", "Alternative values are required");
    }

    let listed = alternatives
        .and_then(Value::as_mapping)
        .map(|m| {
            m.values()
                .filter_map(scalar_string)
                .any(|v| v == default_value)
        })
        .unwrap_or(false);
    let under_default_key = alternatives
        .and_then(|a| a.get(DEFAULT_KEY))
        .and_then(scalar_string);
    let consistent = match under_default_key {
        Some(v) => listed && v == default_value,
        None => listed,
    };
    if !consistent {
        outcome.add_error(
            "parameter",
            "Default value must be one of the alternative values.",
        );
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_for(yaml: &str) -> ValidationOutcome {
        let data: Value = serde_yaml::from_str(yaml).unwrap();
        let mut outcome = ValidationOutcome::default();
        ValidationHandler::new(parameter_validation).handle(&data, &mut outcome);
        outcome
    }

    #[test]
    fn inconsistent_default_reports_exactly_one_error() {
        let outcome = outcome_for(
            r#"
x-trestle-rule-info:
  name: example_rule_1
  parameter:
    name: prm_1
    description: prm_1 description
    alternative-values:
      default: "5"
      5m: "5"
      10m: "10"
    default-value: "10"
"#,
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(
            outcome.errors[0].error_message,
            "Default value must be one of the alternative values."
        );
        assert_eq!(outcome.errors[0].field_name, "parameter");
    }

    #[test]
    fn default_outside_alternatives_reports_one_error() {
        let outcome = outcome_for(
            r#"
x-trestle-rule-info:
  parameter:
    alternative-values:
      5m: "5"
    default-value: "7"
"#,
        );
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn numeric_default_matches_numeric_alternatives() {
        let outcome = outcome_for(
            r#"
x-trestle-rule-info:
  parameter:
    alternative-values:
      default: 5
      5m: 5
      10m: 10
    default-value: 5
"#,
        );
        assert!(outcome.valid, "{:?}", outcome.errors);
    }

    #[test]
    fn consistent_parameter_is_valid() {
        let outcome = outcome_for(
            r#"
x-trestle-rule-info:
  parameter:
    alternative-values:
      default: "5"
      5m: "5"
    default-value: "5"
"#,
        );
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn missing_parameter_is_skipped() {
        let outcome = outcome_for("x-trestle-rule-info:\n  name: r\n");
        assert!(outcome.valid);
    }

    #[test]
    fn chained_handlers_all_run() {
        fn always_fails(_: &Value, outcome: &mut ValidationOutcome) {
            outcome.add_error("name", "always");
        }
        let data: Value = serde_yaml::from_str("x-trestle-rule-info: {}").unwrap();
        let mut outcome = ValidationOutcome::default();
        ValidationHandler::new(always_fails)
            .then(ValidationHandler::new(always_fails))
            .then(ValidationHandler::new(parameter_validation))
            .handle(&data, &mut outcome);
        assert_eq!(outcome.errors.len(), 2);
    }
}
