//! CaC product profile -> component definition.
//!
//! The rules selected by `products/<product>/profiles/<profile>.profile`
//! become rows of a rule CSV, which trestle converts into the component
//! definition `component-definitions/<product>`. Variable selections
//! (`var=value`) are not carried over.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{to_oscal_control_id, CacPolicy};
use crate::contract::{Task, Trestle, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::model::{ModelKind, TRESTLE_HREF_HEADING};
use crate::rules::csv::CsvBuilder;
use crate::rules::{Check, ComponentInfo, Control, Profile, TrestleRule};
use crate::tasks::rule_transform::write_compdef_from_csv;

const RULE_FILE: &str = "rule.yml";
const MAX_EXTENDS_DEPTH: usize = 8;

#[derive(Debug, Default, Deserialize)]
struct ProductYaml {
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CacProfile {
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    selections: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CacRule {
    #[serde(default)]
    title: Option<String>,
}

/// What a profile's selections resolve to.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selections {
    pub rules: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub policies: BTreeSet<String>,
}

pub struct SyncCacContentTask {
    working_dir: PathBuf,
    cac_content_root: PathBuf,
    product: String,
    cac_profile: String,
    oscal_profile: String,
    component_definition_type: String,
    trestle: Arc<dyn Trestle>,
}

impl SyncCacContentTask {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        cac_content_root: impl Into<PathBuf>,
        product: impl Into<String>,
        cac_profile: impl Into<String>,
        oscal_profile: impl Into<String>,
        component_definition_type: impl Into<String>,
        trestle: Arc<dyn Trestle>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            cac_content_root: cac_content_root.into(),
            product: product.into(),
            cac_profile: cac_profile.into(),
            oscal_profile: oscal_profile.into(),
            component_definition_type: component_definition_type.into(),
            trestle,
        }
    }

    fn product_dir(&self) -> PathBuf {
        self.cac_content_root.join("products").join(&self.product)
    }

    fn component_title(&self) -> Result<String, TaskError> {
        let path = self.product_dir().join("product.yml");
        let product: ProductYaml = read_yaml(&path)?;
        Ok(product
            .full_name
            .or(product.product)
            .unwrap_or_else(|| self.product.clone()))
    }

    /// Resolves `profile` and everything it extends.
    pub fn resolve_selections(&self, profile: &str) -> Result<Selections, TaskError> {
        let mut selections = Selections::default();
        self.collect_selections(profile, 0, &mut selections)?;
        Ok(selections)
    }

    fn collect_selections(
        &self,
        profile: &str,
        depth: usize,
        out: &mut Selections,
    ) -> Result<(), TaskError> {
        if depth > MAX_EXTENDS_DEPTH {
            return Err(TaskError::Other(format!(
                "Profile {profile} extends too many profiles"
            )));
        }
        let path = self
            .product_dir()
            .join("profiles")
            .join(format!("{profile}.profile"));
        let data: CacProfile = read_yaml(&path)?;
        if let Some(parent) = &data.extends {
            self.collect_selections(parent, depth + 1, out)?;
        }

        for selection in &data.selections {
            if let Some(rule) = selection.strip_prefix('!') {
                out.rules.retain(|r| r != rule);
            } else if let Some((name, value)) = selection.split_once('=') {
                out.variables.insert(name.to_string(), value.to_string());
            } else if let Some((policy_id, rest)) = selection.split_once(':') {
                out.policies.insert(policy_id.to_string());
                for rule in self.policy_rules(policy_id, rest)? {
                    push_unique(&mut out.rules, rule);
                }
            } else {
                push_unique(&mut out.rules, selection.clone());
            }
        }
        Ok(())
    }

    /// Rules of a `policy:control[:level]` selection; `all` selects every control.
    fn policy_rules(&self, policy_id: &str, selector: &str) -> Result<Vec<String>, TaskError> {
        let policy = CacPolicy::load(&self.cac_content_root, policy_id)?;
        let (control, level) = match selector.split_once(':') {
            Some((control, level)) => (control, Some(level)),
            None => (selector, None),
        };
        let candidates = match level {
            Some(level) => policy.controls_of_level(level),
            None => policy.flattened(),
        };
        Ok(candidates
            .into_iter()
            .filter(|c| control == "all" || c.id == control)
            .flat_map(|c| c.rules)
            .collect())
    }

    fn rule_files(&self) -> BTreeMap<String, PathBuf> {
        WalkDir::new(&self.cac_content_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == RULE_FILE)
            .filter_map(|e| {
                let id = e.path().parent()?.file_name()?.to_string_lossy().into_owned();
                Some((id, e.path().to_path_buf()))
            })
            .collect()
    }

    /// OSCAL control ids per rule, from the policies the profile selects from.
    fn rule_controls(
        &self,
        policies: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<String>>, TaskError> {
        let mut by_rule: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for policy_id in policies {
            let policy = CacPolicy::load(&self.cac_content_root, policy_id)?;
            for control in policy.flattened() {
                let id = to_oscal_control_id(&control.id);
                for rule in &control.rules {
                    let ids = by_rule.entry(rule.clone()).or_default();
                    if !ids.contains(&id) {
                        ids.push(id.clone());
                    }
                }
            }
        }
        Ok(by_rule)
    }
}

impl Task for SyncCacContentTask {
    fn name(&self) -> String {
        "sync-cac-content".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let selections = self.resolve_selections(&self.cac_profile)?;
        if !selections.variables.is_empty() {
            debug!(
                variables = selections.variables.len(),
                "Skipping variable selections"
            );
        }
        let rule_files = self.rule_files();
        let controls = self.rule_controls(&selections.policies)?;
        let component = ComponentInfo {
            name: self.component_title()?,
            kind: self.component_definition_type.clone(),
            description: self.product.clone(),
        };
        let profile_href = format!(
            "{TRESTLE_HREF_HEADING}{}/{}/{}.json",
            ModelKind::Profile.dir(),
            self.oscal_profile,
            ModelKind::Profile.alias()
        );

        let mut builder = CsvBuilder::new();
        for rule_id in &selections.rules {
            let Some(path) = rule_files.get(rule_id) else {
                warn!(rule = %rule_id, "Selected rule not found in content, skipping");
                continue;
            };
            let data: CacRule = read_yaml(path)?;
            let title = data.title.unwrap_or_else(|| rule_id.clone());
            let rule = TrestleRule {
                name: rule_id.clone(),
                description: title.clone(),
                component: component.clone(),
                parameter: None,
                profile: Profile {
                    description: self.oscal_profile.clone(),
                    href: profile_href.clone(),
                    include_controls: controls
                        .get(rule_id)
                        .into_iter()
                        .flatten()
                        .map(|id| Control { id: id.clone() })
                        .collect(),
                },
                check: Some(Check {
                    name: rule_id.clone(),
                    description: title,
                }),
            };
            builder.add_row(&rule).map_err(|source| TaskError::Rule {
                file: path.display().to_string(),
                source,
            })?;
        }

        if builder.row_count() == 0 {
            return Err(TaskError::NoRules(self.product.clone()));
        }
        write_compdef_from_csv(self.trestle.as_ref(), &self.working_dir, &self.product, &builder)?;
        info!(
            product = %self.product,
            profile = %self.cac_profile,
            rules = builder.row_count(),
            "Synced CaC content to component definition"
        );
        Ok(SUCCESS_EXIT_CODE)
    }
}

fn push_unique(rules: &mut Vec<String>, rule: String) {
    if !rules.contains(&rule) {
        rules.push(rule);
    }
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TaskError> {
    let text = fs::read_to_string(path).map_err(|e| TaskError::io(path, e))?;
    serde_yaml::from_str(&text)
        .map_err(|e| TaskError::Other(format!("Failed to parse {}: {e}", path.display())))
}
