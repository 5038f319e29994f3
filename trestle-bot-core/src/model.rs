//! OSCAL model kinds and the on-disk layout of a trestle workspace.
//!
//! Models are handled as `serde_json::Value`; only the structure this crate
//! relies on (root key, uuid, metadata) is checked.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const TRESTLE_CONFIG_DIR: &str = ".trestle";
pub const TRESTLE_HREF_HEADING: &str = "trestle://";
pub const OSCAL_VERSION: &str = "1.1.2";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("No {kind} model found in {dir}")]
    NotFound { kind: &'static str, dir: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Every top-level model directory trestle knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Catalog,
    Profile,
    ComponentDefinition,
    SystemSecurityPlan,
    AssessmentPlan,
    AssessmentResults,
    PlanOfActionAndMilestones,
}

impl ModelKind {
    pub const ALL: [ModelKind; 7] = [
        ModelKind::Catalog,
        ModelKind::Profile,
        ModelKind::ComponentDefinition,
        ModelKind::SystemSecurityPlan,
        ModelKind::AssessmentPlan,
        ModelKind::AssessmentResults,
        ModelKind::PlanOfActionAndMilestones,
    ];

    /// Directory under the workspace root holding models of this kind.
    pub fn dir(self) -> &'static str {
        match self {
            ModelKind::Catalog => "catalogs",
            ModelKind::Profile => "profiles",
            ModelKind::ComponentDefinition => "component-definitions",
            ModelKind::SystemSecurityPlan => "system-security-plans",
            ModelKind::AssessmentPlan => "assessment-plans",
            ModelKind::AssessmentResults => "assessment-results",
            ModelKind::PlanOfActionAndMilestones => "plan-of-action-and-milestones",
        }
    }

    /// File stem of the model document and its JSON root key.
    pub fn alias(self) -> &'static str {
        match self {
            ModelKind::Catalog => "catalog",
            ModelKind::Profile => "profile",
            ModelKind::ComponentDefinition => "component-definition",
            ModelKind::SystemSecurityPlan => "system-security-plan",
            ModelKind::AssessmentPlan => "assessment-plan",
            ModelKind::AssessmentResults => "assessment-results",
            ModelKind::PlanOfActionAndMilestones => "plan-of-action-and-milestones",
        }
    }

    /// Path of the JSON document for model `name` under `root`.
    pub fn model_path(self, root: &Path, name: &str) -> PathBuf {
        root.join(self.dir())
            .join(name)
            .join(format!("{}.json", self.alias()))
    }
}

pub fn is_valid_project_root(path: &Path) -> bool {
    path.join(TRESTLE_CONFIG_DIR).is_dir()
}

/// Loads the model document in `model_dir`, accepting JSON or YAML.
pub fn load_model(kind: ModelKind, model_dir: &Path) -> Result<Value, ModelError> {
    for ext in ["json", "yaml", "yml"] {
        let path = model_dir.join(format!("{}.{ext}", kind.alias()));
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "Loading model");
        let text = fs::read_to_string(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        return if ext == "json" {
            serde_json::from_str(&text).map_err(|source| ModelError::Json { path, source })
        } else {
            serde_yaml::from_str(&text).map_err(|source| ModelError::Yaml { path, source })
        };
    }
    Err(ModelError::NotFound {
        kind: kind.alias(),
        dir: model_dir.to_path_buf(),
    })
}

/// Checks the parts of the model structure this crate depends on.
pub fn validate_model(kind: ModelKind, model: &Value) -> Result<(), ModelError> {
    let body = model
        .get(kind.alias())
        .and_then(Value::as_object)
        .ok_or_else(|| ModelError::Invalid(format!("missing root object '{}'", kind.alias())))?;

    let id = body
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Invalid("missing uuid".to_string()))?;
    uuid::Uuid::parse_str(id).map_err(|e| ModelError::Invalid(format!("invalid uuid {id}: {e}")))?;

    let metadata = body
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| ModelError::Invalid("missing metadata".to_string()))?;
    for field in ["title", "last-modified", "version", "oscal-version"] {
        if !metadata.get(field).is_some_and(Value::is_string) {
            return Err(ModelError::Invalid(format!("metadata.{field} is required")));
        }
    }
    if let Some(modified) = metadata.get("last-modified").and_then(Value::as_str) {
        chrono::DateTime::parse_from_rfc3339(modified).map_err(|e| {
            ModelError::Invalid(format!("metadata.last-modified {modified} is not a timestamp: {e}"))
        })?;
    }
    Ok(())
}

/// Writes `model` as pretty JSON, replacing whatever was there.
pub fn write_model(path: &Path, model: &Value) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ModelError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = serde_json::to_string_pretty(model).map_err(|source| ModelError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text + "\n").map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Minimal valid model of `kind` with a fresh uuid and the given title.
pub fn new_model(kind: ModelKind, title: &str) -> Value {
    let mut body = Map::new();
    body.insert("uuid".into(), json!(uuid::Uuid::new_v4().to_string()));
    body.insert(
        "metadata".into(),
        json!({
            "title": title,
            "last-modified": timestamp(),
            "version": "1.0",
            "oscal-version": OSCAL_VERSION,
        }),
    );
    let mut root = Map::new();
    root.insert(kind.alias().into(), Value::Object(body));
    Value::Object(root)
}

pub fn update_last_modified(kind: ModelKind, model: &mut Value) {
    if let Some(metadata) = model
        .get_mut(kind.alias())
        .and_then(|b| b.get_mut("metadata"))
        .and_then(Value::as_object_mut)
    {
        metadata.insert("last-modified".into(), json!(timestamp()));
    }
}

/// Resolves a `trestle://` href, or a workspace relative path, under `root`.
pub fn resolve_href(root: &Path, href: &str) -> PathBuf {
    root.join(href.strip_prefix(TRESTLE_HREF_HEADING).unwrap_or(href))
}

/// Collects every control id in a catalog, nested controls included.
pub fn catalog_control_ids(catalog: &Value) -> Vec<String> {
    fn walk(node: &Value, out: &mut Vec<String>) {
        for key in ["groups", "controls"] {
            if let Some(children) = node.get(key).and_then(Value::as_array) {
                for child in children {
                    if key == "controls" {
                        if let Some(id) = child.get("id").and_then(Value::as_str) {
                            out.push(id.to_string());
                        }
                    }
                    walk(child, out);
                }
            }
        }
    }
    let mut ids = Vec::new();
    if let Some(body) = catalog.get(ModelKind::Catalog.alias()) {
        walk(body, &mut ids);
    }
    ids
}

/// Control ids selected by profile `name`, following its imports.
pub fn resolve_profile_controls(root: &Path, name: &str) -> Result<Vec<String>, ModelError> {
    let path = ModelKind::Profile.model_path(root, name);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let profile = load_model(ModelKind::Profile, &dir)?;
    resolve_imports(root, &profile, 0)
}

fn resolve_imports(root: &Path, profile: &Value, depth: usize) -> Result<Vec<String>, ModelError> {
    if depth > 8 {
        return Err(ModelError::Invalid("profile import chain is too deep".into()));
    }
    let imports = profile
        .get(ModelKind::Profile.alias())
        .and_then(|p| p.get("imports"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut ids = Vec::new();
    for import in imports {
        let href = import.get("href").and_then(Value::as_str).unwrap_or_default();
        let selected: Vec<String> = import
            .get("include-controls")
            .and_then(Value::as_array)
            .map(|selections| {
                selections
                    .iter()
                    .filter_map(|s| s.get("with-ids").and_then(Value::as_array))
                    .flatten()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !selected.is_empty() {
            ids.extend(selected);
            continue;
        }

        let path = resolve_href(root, href);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem == ModelKind::Profile.alias() {
            let nested = load_model(ModelKind::Profile, &dir)?;
            ids.extend(resolve_imports(root, &nested, depth + 1)?);
        } else {
            let catalog = load_model(ModelKind::Catalog, &dir)?;
            ids.extend(catalog_control_ids(&catalog));
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_catalog() -> Value {
        let mut catalog = new_model(ModelKind::Catalog, "Example");
        catalog["catalog"]["groups"] = json!([
            {"id": "ac", "title": "Access Control", "controls": [
                {"id": "ac-1", "title": "Policy", "controls": [{"id": "ac-1.1", "title": "Enh"}]},
                {"id": "ac-2", "title": "Accounts"}
            ]}
        ]);
        catalog
    }

    #[test]
    fn new_model_is_valid() {
        for kind in ModelKind::ALL {
            let model = new_model(kind, "title");
            validate_model(kind, &model).unwrap();
        }
    }

    #[test]
    fn validate_rejects_missing_uuid() {
        let mut model = new_model(ModelKind::Profile, "p");
        model["profile"].as_object_mut().unwrap().remove("uuid");
        let err = validate_model(ModelKind::Profile, &model).unwrap_err();
        assert_eq!(err.to_string(), "missing uuid");
    }

    #[test]
    fn validate_rejects_wrong_root() {
        let model = new_model(ModelKind::Catalog, "c");
        assert!(validate_model(ModelKind::Profile, &model).is_err());
    }

    #[test]
    fn loads_yaml_models() {
        let dir = tempdir().unwrap();
        let model = new_model(ModelKind::Catalog, "from yaml");
        fs::write(
            dir.path().join("catalog.yaml"),
            serde_yaml::to_string(&model).unwrap(),
        )
        .unwrap();
        let loaded = load_model(ModelKind::Catalog, dir.path()).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn collects_nested_control_ids() {
        let ids = catalog_control_ids(&sample_catalog());
        assert_eq!(ids, vec!["ac-1", "ac-1.1", "ac-2"]);
    }

    #[test]
    fn resolves_profile_controls_through_imports() {
        let root = tempdir().unwrap();
        write_model(
            &ModelKind::Catalog.model_path(root.path(), "cat"),
            &sample_catalog(),
        )
        .unwrap();

        let mut all = new_model(ModelKind::Profile, "all");
        all["profile"]["imports"] = json!([
            {"href": "trestle://catalogs/cat/catalog.json", "include-all": {}}
        ]);
        write_model(&ModelKind::Profile.model_path(root.path(), "all"), &all).unwrap();

        let mut some = new_model(ModelKind::Profile, "some");
        some["profile"]["imports"] = json!([
            {"href": "trestle://profiles/all/profile.json",
             "include-controls": [{"with-ids": ["ac-2"]}]}
        ]);
        write_model(&ModelKind::Profile.model_path(root.path(), "some"), &some).unwrap();

        assert_eq!(
            resolve_profile_controls(root.path(), "all").unwrap(),
            vec!["ac-1", "ac-1.1", "ac-2"]
        );
        assert_eq!(
            resolve_profile_controls(root.path(), "some").unwrap(),
            vec!["ac-2"]
        );
    }
}
