use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

use super::{oscal_control_id, oscal_id_parts, CacControl, CacPolicy};
use crate::contract::{Task, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::model::{self, ModelKind};

const CONTROL_CLASS: &str = "CAC_IMPORT";

/// Creates or updates an OSCAL catalog from a CaC controls file.
pub struct SyncCacCatalogTask {
    working_dir: PathBuf,
    cac_content_root: PathBuf,
    policy_id: String,
    oscal_catalog: String,
}

impl SyncCacCatalogTask {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        cac_content_root: impl Into<PathBuf>,
        policy_id: impl Into<String>,
        oscal_catalog: impl Into<String>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            cac_content_root: cac_content_root.into(),
            policy_id: policy_id.into(),
            oscal_catalog: oscal_catalog.into(),
        }
    }
}

impl Task for SyncCacCatalogTask {
    fn name(&self) -> String {
        "sync-cac-catalog".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let policy = CacPolicy::load(&self.cac_content_root, &self.policy_id)?;
        let path = ModelKind::Catalog.model_path(&self.working_dir, &self.oscal_catalog);

        let (mut catalog, existed) = if path.exists() {
            info!(policy = %self.policy_id, "The catalog exists");
            let dir = path.parent().map(PathBuf::from).unwrap_or_default();
            let catalog = model::load_model(ModelKind::Catalog, &dir)
                .map_err(|e| TaskError::Other(e.to_string()))?;
            (catalog, true)
        } else {
            info!(policy = %self.policy_id, "Creating catalog");
            let title = format!("Catalog for {}", self.policy_id);
            (model::new_model(ModelKind::Catalog, &title), false)
        };
        let before = catalog.clone();

        let body = catalog
            .get_mut(ModelKind::Catalog.alias())
            .filter(|b| b.is_object())
            .ok_or_else(|| malformed("catalog"))?;
        sync_catalog(body, &policy)?;

        if existed && before == catalog {
            debug!(catalog = %self.oscal_catalog, "Catalog unchanged");
            return Ok(SUCCESS_EXIT_CODE);
        }
        model::update_last_modified(ModelKind::Catalog, &mut catalog);
        model::write_model(&path, &catalog).map_err(|e| TaskError::Other(e.to_string()))?;
        info!(catalog = %self.oscal_catalog, "CaC catalog sync complete");
        Ok(SUCCESS_EXIT_CODE)
    }
}

/// Merges every control of `policy` into the catalog body.
fn sync_catalog(catalog: &mut Value, policy: &CacPolicy) -> Result<(), TaskError> {
    let controls = policy.flattened();
    for cac_control in &controls {
        let (group_id, control_path) = oscal_id_parts(&cac_control.id);

        let groups = children(catalog, "groups").ok_or_else(|| malformed("catalog"))?;
        let group_index = match groups
            .iter()
            .position(|g| g.get("id").and_then(Value::as_str) == Some(group_id.as_str()))
        {
            Some(i) => i,
            None => {
                groups.push(json!({"id": group_id, "title": group_id.to_uppercase()}));
                groups.len() - 1
            }
        };
        let mut parent = &mut groups[group_index];
        let mut parent_title = parent.get("title").and_then(Value::as_str).map(str::to_string);

        if control_path.len() > 1 {
            for depth in 1..control_path.len() {
                let parent_id = oscal_control_id(&group_id, &control_path[..depth]);
                let controls = children(parent, "controls").ok_or_else(|| malformed("control"))?;
                let index = controls
                    .iter()
                    .position(|c| c.get("id").and_then(Value::as_str) == Some(parent_id.as_str()))
                    .ok_or_else(|| {
                        TaskError::Other(
                            "Nested control path before parent control definition".to_string(),
                        )
                    })?;
                parent = &mut controls[index];
                parent_title = parent.get("title").and_then(Value::as_str).map(str::to_string);
            }
        }

        let new_control =
            control_to_oscal(cac_control, &group_id, &control_path, parent_title.as_deref())?;
        let siblings = children(parent, "controls").ok_or_else(|| malformed("group"))?;
        match siblings
            .iter_mut()
            .find(|c| c.get("id") == new_control.get("id"))
        {
            Some(existing) => merge_control(existing, &new_control),
            None => siblings.push(new_control),
        }
    }
    debug!(controls = controls.len(), "Synced CaC controls");
    Ok(())
}

/// Mutable child array `key` of `node`, created when absent. `None` when
/// `node` is not an object.
fn children<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Vec<Value>> {
    let slot = node
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| json!([]));
    if !slot.is_array() {
        *slot = json!([]);
    }
    slot.as_array_mut()
}

fn malformed(what: &str) -> TaskError {
    TaskError::Other(format!("Malformed catalog: {what} is not an object"))
}

fn control_to_oscal(
    cac_control: &CacControl,
    group_id: &str,
    path: &[String],
    parent_title: Option<&str>,
) -> Result<Value, TaskError> {
    let id = oscal_control_id(group_id, path);
    let sort_id = if path.is_empty() {
        group_id.to_string()
    } else {
        let padded: Vec<String> = path.iter().map(|p| format!("{p:0>2}")).collect();
        format!("{group_id}-{}", padded.join("."))
    };
    let title = oscal_control_title(&cac_control.id, cac_control.title.as_deref(), parent_title);

    let mut params = Vec::new();
    let mut parts = Vec::new();
    if let Some(description) = cac_control.description.as_deref().filter(|d| !d.is_empty()) {
        let assignment = regex(r"\[Assignment: (.*?)\]")?;
        let mut statement = description.lines().next().unwrap_or_default().to_string();
        for (n, caps) in assignment.captures_iter(description).enumerate() {
            let param_id = format!("{id}_prm_{}", n + 1);
            params.push(json!({"id": param_id, "label": &caps[1]}));
            statement = statement.replace(&caps[0], &format!("{{{{ insert: param, {param_id} }}}}"));
        }
        parts.push(json!({"id": format!("{id}_smt"), "name": "statement", "prose": statement}));

        let guidance = regex(r"(?m)^(?:Supplemental )?Guidance: (.*)$")?;
        if let Some(caps) = guidance.captures(description) {
            parts.push(json!({"id": format!("{id}_gdn"), "name": "guidance", "prose": &caps[1]}));
        }
    }

    let mut control = json!({
        "id": id,
        "class": CONTROL_CLASS,
        "title": title,
        "props": [
            {"name": "label", "value": id},
            {"name": "sort-id", "value": sort_id},
        ],
    });
    if let Some(fields) = control.as_object_mut() {
        if !params.is_empty() {
            fields.insert("params".into(), Value::Array(params));
        }
        if !parts.is_empty() {
            fields.insert("parts".into(), Value::Array(parts));
        }
    }
    Ok(control)
}

/// Adds params, props, links and parts of `new` that `existing` lacks.
fn merge_control(existing: &mut Value, new: &Value) {
    for (key, identity) in [("params", "id"), ("props", "name"), ("links", "href"), ("parts", "id")] {
        let Some(additions) = new.get(key).and_then(Value::as_array) else {
            continue;
        };
        let Some(current) = children(existing, key) else {
            return;
        };
        for item in additions {
            let known = current
                .iter()
                .any(|c| c.get(identity).is_some() && c.get(identity) == item.get(identity));
            if !known {
                current.push(item.clone());
            }
        }
    }
}

/// Control title without the id prefix or the parent's group name, title cased.
pub fn oscal_control_title(cac_id: &str, cac_title: Option<&str>, parent_title: Option<&str>) -> String {
    let Some(cac_title) = cac_title.filter(|t| !t.is_empty()) else {
        return cac_id.to_string();
    };
    let mut title = strip_leading_non_word(cac_title.strip_prefix(cac_id).unwrap_or(cac_title)).to_string();
    if let Some(parent_title) = parent_title {
        let (group, section) = title.split_once('|').unwrap_or((title.as_str(), ""));
        if parent_title.to_lowercase().contains(&group.trim().to_lowercase()) {
            title = section.trim().to_string();
        }
    }
    title_case(strip_leading_non_word(&title))
}

fn strip_leading_non_word(s: &str) -> &str {
    s.trim_start_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn regex(pattern: &str) -> Result<Regex, TaskError> {
    Regex::new(pattern).map_err(|e| TaskError::Other(format!("Invalid pattern {pattern}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CONTROLS: &str = r#"
id: abcd
title: ABCD benchmark
levels:
  - id: low
controls:
  - id: AC-1
    title: "AC-1 - ACCESS CONTROL | POLICY AND PROCEDURES"
    description: |-
      Develop a policy for [Assignment: organization-defined personnel].
      Guidance: Review the policy yearly.
    levels: [low]
    rules: [rule_a]
  - id: AC-1(1)
    title: "AC-1(1) - ACCESS CONTROL | AUTOMATED REVIEW"
"#;

    #[test]
    fn titles_drop_id_and_group() {
        assert_eq!(
            oscal_control_title("AC-1", Some("AC-1 - ACCESS CONTROL | POLICY"), Some("Access Control")),
            "Policy"
        );
        assert_eq!(oscal_control_title("AC-1", None, None), "AC-1");
        assert_eq!(oscal_control_title("1.1", Some("1.1 ensure the 2nd thing"), None), "Ensure The 2Nd Thing");
    }

    #[test]
    fn builds_groups_nested_controls_and_parts() {
        let cac = tempdir().unwrap();
        fs::create_dir(cac.path().join("controls")).unwrap();
        fs::write(cac.path().join("controls/abcd.yml"), CONTROLS).unwrap();
        let ws = tempdir().unwrap();

        let task = SyncCacCatalogTask::new(ws.path(), cac.path(), "abcd", "abcd-cat");
        assert_eq!(task.execute().unwrap(), SUCCESS_EXIT_CODE);

        let catalog =
            model::load_model(ModelKind::Catalog, &ws.path().join("catalogs/abcd-cat")).unwrap();
        model::validate_model(ModelKind::Catalog, &catalog).unwrap();
        let control = &catalog["catalog"]["groups"][0]["controls"][0];
        assert_eq!(catalog["catalog"]["groups"][0]["id"], "ac");
        assert_eq!(control["id"], "ac-1");
        assert_eq!(control["props"][1]["value"], "ac-01");
        assert_eq!(control["params"][0]["id"], "ac-1_prm_1");
        assert_eq!(
            control["parts"][0]["prose"],
            "Develop a policy for {{ insert: param, ac-1_prm_1 }}."
        );
        assert_eq!(control["parts"][1]["prose"], "Review the policy yearly.");
        assert_eq!(control["controls"][0]["id"], "ac-1.1");
    }

    #[test]
    fn rerun_does_not_duplicate() {
        let cac = tempdir().unwrap();
        fs::create_dir(cac.path().join("controls")).unwrap();
        fs::write(cac.path().join("controls/abcd.yml"), CONTROLS).unwrap();
        let ws = tempdir().unwrap();
        let task = SyncCacCatalogTask::new(ws.path(), cac.path(), "abcd", "abcd-cat");
        task.execute().unwrap();
        let path = ws.path().join("catalogs/abcd-cat/catalog.json");
        let first = fs::read_to_string(&path).unwrap();
        task.execute().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn existing_catalog_without_body_is_rejected() {
        let cac = tempdir().unwrap();
        fs::create_dir(cac.path().join("controls")).unwrap();
        fs::write(cac.path().join("controls/abcd.yml"), CONTROLS).unwrap();
        let ws = tempdir().unwrap();
        let dir = ws.path().join("catalogs/abcd-cat");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("catalog.json"), r#"{"catalog": ["not", "an", "object"]}"#).unwrap();

        let err = SyncCacCatalogTask::new(ws.path(), cac.path(), "abcd", "abcd-cat")
            .execute()
            .unwrap_err();
        assert_eq!(err.to_string(), "Malformed catalog: catalog is not an object");
    }

    #[test]
    fn nested_control_needs_parent() {
        let cac = tempdir().unwrap();
        fs::create_dir(cac.path().join("controls")).unwrap();
        fs::write(
            cac.path().join("controls/abcd.yml"),
            "id: abcd\ncontrols:\n  - id: AC-2(1)\n",
        )
        .unwrap();
        let ws = tempdir().unwrap();
        let err = SyncCacCatalogTask::new(ws.path(), cac.path(), "abcd", "c")
            .execute()
            .unwrap_err();
        assert_eq!(err.to_string(), "Nested control path before parent control definition");
    }
}
