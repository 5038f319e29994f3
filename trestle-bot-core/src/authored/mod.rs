//! Authored OSCAL objects: the markdown <-> JSON round trip per model kind.
//!
//! [`AuthoredKind`] is closed; every operation matches on it exhaustively and
//! turns the request into one `trestle author` command.

pub mod ssp;

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::contract::Trestle;
use crate::error::AuthoredObjectError;
use crate::model::{self, ModelKind, TRESTLE_HREF_HEADING};
pub use ssp::{SspIndex, SspIndexEntry};

/// User-facing name of an authorable model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthoredType {
    Catalog,
    Profile,
    Compdef,
    Ssp,
}

impl AuthoredType {
    pub fn model_kind(self) -> ModelKind {
        match self {
            AuthoredType::Catalog => ModelKind::Catalog,
            AuthoredType::Profile => ModelKind::Profile,
            AuthoredType::Compdef => ModelKind::ComponentDefinition,
            AuthoredType::Ssp => ModelKind::SystemSecurityPlan,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthoredType::Catalog => "catalog",
            AuthoredType::Profile => "profile",
            AuthoredType::Compdef => "compdef",
            AuthoredType::Ssp => "ssp",
        }
    }
}

impl fmt::Display for AuthoredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthoredType {
    type Err = AuthoredObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "catalog" => Ok(AuthoredType::Catalog),
            "profile" => Ok(AuthoredType::Profile),
            "compdef" => Ok(AuthoredType::Compdef),
            "ssp" => Ok(AuthoredType::Ssp),
            other => Err(AuthoredObjectError::Other(format!(
                "Invalid authored type {other}"
            ))),
        }
    }
}

/// One variant per authorable model kind. SSPs carry the index they are built from.
#[derive(Debug, Clone)]
pub enum AuthoredKind {
    Catalog,
    Profile,
    ComponentDefinition,
    Ssp(SspIndex),
}

impl AuthoredKind {
    pub fn model_kind(&self) -> ModelKind {
        match self {
            AuthoredKind::Catalog => ModelKind::Catalog,
            AuthoredKind::Profile => ModelKind::Profile,
            AuthoredKind::ComponentDefinition => ModelKind::ComponentDefinition,
            AuthoredKind::Ssp(_) => ModelKind::SystemSecurityPlan,
        }
    }
}

/// An authorable model kind bound to a trestle workspace.
#[derive(Clone)]
pub struct AuthoredObject {
    trestle_root: PathBuf,
    kind: AuthoredKind,
    trestle: Arc<dyn Trestle>,
}

impl fmt::Debug for AuthoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthoredObject")
            .field("trestle_root", &self.trestle_root)
            .field("kind", &self.kind)
            .finish()
    }
}

impl AuthoredObject {
    pub fn new(
        trestle_root: impl Into<PathBuf>,
        kind: AuthoredKind,
        trestle: Arc<dyn Trestle>,
    ) -> Result<Self, AuthoredObjectError> {
        let trestle_root = trestle_root.into();
        if !trestle_root.exists() {
            return Err(AuthoredObjectError::MissingRoot(trestle_root));
        }
        if !model::is_valid_project_root(&trestle_root) {
            return Err(AuthoredObjectError::InvalidRoot(trestle_root));
        }
        Ok(Self {
            trestle_root,
            kind,
            trestle,
        })
    }

    /// Builds the object for `authored_type`; SSPs load the index at `ssp_index_path`.
    pub fn for_type(
        trestle_root: impl Into<PathBuf>,
        authored_type: AuthoredType,
        ssp_index_path: Option<&Path>,
        trestle: Arc<dyn Trestle>,
    ) -> Result<Self, AuthoredObjectError> {
        let kind = match authored_type {
            AuthoredType::Catalog => AuthoredKind::Catalog,
            AuthoredType::Profile => AuthoredKind::Profile,
            AuthoredType::Compdef => AuthoredKind::ComponentDefinition,
            AuthoredType::Ssp => {
                let path = ssp_index_path.ok_or_else(|| {
                    AuthoredObjectError::Other("An SSP index path is required for SSPs".into())
                })?;
                AuthoredKind::Ssp(SspIndex::load(path)?)
            }
        };
        Self::new(trestle_root, kind, trestle)
    }

    pub fn trestle_root(&self) -> &Path {
        &self.trestle_root
    }

    pub fn kind(&self) -> &AuthoredKind {
        &self.kind
    }

    /// Markdown at `markdown_path` into the JSON model of the same name.
    pub fn assemble(&self, markdown_path: &str, version: &str) -> Result<(), AuthoredObjectError> {
        let name = basename(markdown_path);
        let mut args = match &self.kind {
            AuthoredKind::Catalog => author_args("catalog-assemble", markdown_path, &name),
            AuthoredKind::Profile => {
                let mut args = author_args("profile-assemble", markdown_path, &name);
                args.push("--set-parameters".into());
                args
            }
            AuthoredKind::ComponentDefinition => {
                author_args("component-assemble", markdown_path, &name)
            }
            AuthoredKind::Ssp(index) => {
                let comps = index
                    .comps_by_ssp(&name)
                    .ok_or_else(|| AuthoredObjectError::MissingIndexEntry(name.clone()))?;
                let mut args = author_args("ssp-assemble", markdown_path, &name);
                args.extend(["--compdefs".to_string(), comps.join(",")]);
                args
            }
        };
        if !version.is_empty() {
            args.extend(["--version".to_string(), version.to_string()]);
        }
        self.run("assemble", &name, &args)
    }

    /// JSON model at `model_path` out to markdown under `markdown_path`.
    pub fn regenerate(
        &self,
        model_path: &str,
        markdown_path: &str,
    ) -> Result<(), AuthoredObjectError> {
        let name = basename(model_path);
        let output = Path::new(markdown_path).join(&name).display().to_string();
        let args: Vec<String> = match &self.kind {
            AuthoredKind::Catalog => generate_args("catalog-generate", &name, &output),
            AuthoredKind::Profile => generate_args("profile-generate", &name, &output),
            AuthoredKind::ComponentDefinition => {
                generate_args("component-generate", &name, &output)
            }
            AuthoredKind::Ssp(index) => {
                let entry = index
                    .get(&name)
                    .ok_or_else(|| AuthoredObjectError::MissingIndexEntry(name.clone()))?;
                ssp_generate_args(entry, &output)
            }
        };
        self.run("generate", &name, &args)
    }

    /// Records a new SSP in the index and generates its markdown.
    pub fn create_new_ssp(
        &mut self,
        ssp_name: &str,
        profile_name: &str,
        compdefs: Vec<String>,
        markdown_path: &str,
        leveraged_ssp: Option<String>,
    ) -> Result<(), AuthoredObjectError> {
        let index = match &mut self.kind {
            AuthoredKind::Ssp(index) => index,
            _ => {
                return Err(AuthoredObjectError::Other(
                    "SSP creation requires an SSP authored object".into(),
                ))
            }
        };
        index.add_new_ssp(ssp_name, profile_name, compdefs, leveraged_ssp);
        index.write_out()?;
        info!(ssp = ssp_name, profile = profile_name, "Added SSP to index");

        let output = Path::new(markdown_path).join(ssp_name).display().to_string();
        let args = match index.get(ssp_name) {
            Some(entry) => ssp_generate_args(entry, &output),
            None => return Err(AuthoredObjectError::MissingIndexEntry(ssp_name.into())),
        };
        self.run("generate", ssp_name, &args)
    }

    fn run(&self, action: &str, model: &str, args: &[String]) -> Result<(), AuthoredObjectError> {
        debug!(action, model, "Running trestle author command");
        self.trestle
            .run(&self.trestle_root, args)
            .map_err(|e| AuthoredObjectError::Trestle {
                action: action.to_string(),
                model: model.to_string(),
                details: e.to_string(),
            })
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn author_args(command: &str, markdown_path: &str, name: &str) -> Vec<String> {
    vec![
        "author".into(),
        command.into(),
        "--markdown".into(),
        markdown_path.into(),
        "--output".into(),
        name.into(),
    ]
}

fn generate_args(command: &str, name: &str, output: &str) -> Vec<String> {
    vec![
        "author".into(),
        command.into(),
        "--name".into(),
        name.into(),
        "--output".into(),
        output.into(),
    ]
}

fn ssp_generate_args(entry: &SspIndexEntry, output: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "author".into(),
        "ssp-generate".into(),
        "--profile".into(),
        entry.profile.clone(),
        "--compdefs".into(),
        entry.component_definitions.join(","),
        "--output".into(),
        output.into(),
    ];
    if let Some(leveraged) = &entry.leveraged_ssp {
        args.extend(["--leveraged-ssp".to_string(), leveraged.clone()]);
    }
    args
}

/// Creates or updates profile `profile_name` importing `import_path`.
///
/// Returns whether the profile file was written.
pub fn create_or_update_profile(
    trestle_root: &Path,
    import_path: &str,
    profile_name: &str,
    with_ids: &[String],
) -> Result<bool, AuthoredObjectError> {
    let path = ModelKind::Profile.model_path(trestle_root, profile_name);
    let href = format!("{TRESTLE_HREF_HEADING}{import_path}");

    let new_import = profile_import(&href, with_ids);
    let mut profile = if path.exists() {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        model::load_model(ModelKind::Profile, &dir).map_err(to_authored)?
    } else {
        let mut profile = model::new_model(ModelKind::Profile, profile_name);
        let body = model_body(&mut profile, ModelKind::Profile, profile_name)?;
        body.insert("imports".into(), json!([]));
        body.insert("merge".into(), json!({"combine": {"method": "merge"}, "as-is": true}));
        profile
    };
    let existing = profile.clone();

    let body = model_body(&mut profile, ModelKind::Profile, profile_name)?;
    body.get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| AuthoredObjectError::Other(format!("Profile {profile_name} has no metadata")))?
        .insert("title".into(), json!(profile_name));
    let imports = body
        .get_mut("imports")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| AuthoredObjectError::Other(format!("Profile {profile_name} has no imports")))?;
    match imports
        .iter_mut()
        .find(|i| i.get("href").and_then(Value::as_str) == Some(href.as_str()))
    {
        Some(import) => *import = new_import,
        None => imports.push(new_import),
    }

    if path.exists() && existing == profile {
        debug!(profile = profile_name, "Profile unchanged");
        return Ok(false);
    }
    model::update_last_modified(ModelKind::Profile, &mut profile);
    model::write_model(&path, &profile).map_err(to_authored)?;
    info!(profile = profile_name, path = %path.display(), "Wrote profile");
    Ok(true)
}

fn profile_import(href: &str, with_ids: &[String]) -> Value {
    if with_ids.is_empty() {
        json!({"href": href, "include-all": {}})
    } else {
        let sorted: BTreeSet<&String> = with_ids.iter().collect();
        json!({"href": href, "include-controls": [{"with-ids": sorted}]})
    }
}

/// Writes a new component definition with one component implementing every
/// control selected by `profile_name`.
pub fn create_new_compdef(
    trestle_root: &Path,
    profile_name: &str,
    compdef_name: &str,
    component_title: &str,
    component_description: &str,
    component_type: &str,
) -> Result<PathBuf, AuthoredObjectError> {
    let controls = model::resolve_profile_controls(trestle_root, profile_name).map_err(to_authored)?;
    let source = format!(
        "{TRESTLE_HREF_HEADING}{}/{profile_name}/{}.json",
        ModelKind::Profile.dir(),
        ModelKind::Profile.alias()
    );
    let requirements: Vec<Value> = controls
        .iter()
        .map(|id| {
            json!({
                "uuid": uuid::Uuid::new_v4().to_string(),
                "control-id": id,
                "description": "",
            })
        })
        .collect();

    let mut compdef = model::new_model(ModelKind::ComponentDefinition, compdef_name);
    model_body(&mut compdef, ModelKind::ComponentDefinition, compdef_name)?.insert(
        "components".into(),
        json!([{
            "uuid": uuid::Uuid::new_v4().to_string(),
            "type": component_type,
            "title": component_title,
            "description": component_description,
            "control-implementations": [{
                "uuid": uuid::Uuid::new_v4().to_string(),
                "source": source,
                "description": format!("Controls implemented by {component_title}"),
                "implemented-requirements": requirements,
            }],
        }]),
    );

    let path = ModelKind::ComponentDefinition.model_path(trestle_root, compdef_name);
    if let Some(dir) = path.parent().filter(|d| d.exists()) {
        fs::remove_dir_all(dir).map_err(|source| AuthoredObjectError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    model::write_model(&path, &compdef).map_err(to_authored)?;
    info!(compdef = compdef_name, controls = controls.len(), "Created component definition");
    Ok(path)
}

/// The object under the model's root key.
fn model_body<'a>(
    document: &'a mut Value,
    kind: ModelKind,
    name: &str,
) -> Result<&'a mut Map<String, Value>, AuthoredObjectError> {
    document
        .get_mut(kind.alias())
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            AuthoredObjectError::Other(format!("{} {name} has no {} object", kind.alias(), kind.alias()))
        })
}

fn to_authored(e: model::ModelError) -> AuthoredObjectError {
    AuthoredObjectError::Other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockTrestle;
    use tempfile::{tempdir, TempDir};

    fn workspace() -> TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(".trestle")).unwrap();
        dir
    }

    fn expecting(expected: Vec<&'static str>) -> Arc<dyn Trestle> {
        let mut trestle = MockTrestle::new();
        trestle
            .expect_run()
            .withf(move |_, args| args.iter().map(String::as_str).eq(expected.iter().copied()))
            .times(1)
            .returning(|_, _| Ok(()));
        Arc::new(trestle)
    }

    #[test]
    fn rejects_non_trestle_root() {
        let dir = tempdir().unwrap();
        let err = AuthoredObject::new(dir.path(), AuthoredKind::Catalog, Arc::new(MockTrestle::new()))
            .unwrap_err();
        assert!(matches!(err, AuthoredObjectError::InvalidRoot(_)));
    }

    #[test]
    fn profile_assemble_sets_parameters_and_version() {
        let ws = workspace();
        let trestle = expecting(vec![
            "author",
            "profile-assemble",
            "--markdown",
            "md/profiles/p1",
            "--output",
            "p1",
            "--set-parameters",
            "--version",
            "1.2",
        ]);
        let object = AuthoredObject::new(ws.path(), AuthoredKind::Profile, trestle).unwrap();
        object.assemble("md/profiles/p1", "1.2").unwrap();
    }

    #[test]
    fn compdef_regenerate_writes_under_markdown_dir() {
        let ws = workspace();
        let trestle = expecting(vec![
            "author",
            "component-generate",
            "--name",
            "cd1",
            "--output",
            "md/component-definitions/cd1",
        ]);
        let object =
            AuthoredObject::new(ws.path(), AuthoredKind::ComponentDefinition, trestle).unwrap();
        object
            .regenerate("component-definitions/cd1", "md/component-definitions")
            .unwrap();
    }

    #[test]
    fn ssp_without_index_entry_fails() {
        let ws = workspace();
        let index = SspIndex::load(ws.path().join("ssp-index.json")).unwrap();
        let mut trestle = MockTrestle::new();
        trestle.expect_run().never();
        let object =
            AuthoredObject::new(ws.path(), AuthoredKind::Ssp(index), Arc::new(trestle)).unwrap();
        let err = object.assemble("md/ssps/unknown", "").unwrap_err();
        assert_eq!(err.to_string(), "SSP unknown does not exists in the index");
    }

    #[test]
    fn create_new_ssp_records_index_and_generates() {
        let ws = workspace();
        let index_path = ws.path().join("ssp-index.json");
        let index = SspIndex::load(&index_path).unwrap();
        let trestle = expecting(vec![
            "author",
            "ssp-generate",
            "--profile",
            "prof",
            "--compdefs",
            "a,b",
            "--output",
            "md/ssps/new_ssp",
        ]);
        let mut object = AuthoredObject::new(ws.path(), AuthoredKind::Ssp(index), trestle).unwrap();
        object
            .create_new_ssp("new_ssp", "prof", vec!["a".into(), "b".into()], "md/ssps", None)
            .unwrap();
        let reloaded = SspIndex::load(&index_path).unwrap();
        assert_eq!(reloaded.profile_by_ssp("new_ssp"), Some("prof"));
    }

    #[test]
    fn trestle_failure_names_the_model() {
        let ws = workspace();
        let mut trestle = MockTrestle::new();
        trestle
            .expect_run()
            .returning(|_, _| Err("bad markdown".into()));
        let object =
            AuthoredObject::new(ws.path(), AuthoredKind::Catalog, Arc::new(trestle)).unwrap();
        let err = object.assemble("md/catalogs/cat1", "").unwrap_err();
        assert_eq!(err.to_string(), "Trestle assemble failed for cat1: bad markdown");
    }

    #[test]
    fn profile_create_then_update_is_idempotent() {
        let ws = workspace();
        let ids = vec!["ac-2".to_string(), "ac-1".to_string()];
        assert!(create_or_update_profile(ws.path(), "catalogs/c/catalog.json", "p", &ids).unwrap());
        assert!(!create_or_update_profile(ws.path(), "catalogs/c/catalog.json", "p", &ids).unwrap());

        let dir = ws.path().join("profiles/p");
        let profile = model::load_model(ModelKind::Profile, &dir).unwrap();
        assert_eq!(
            profile["profile"]["imports"][0]["include-controls"][0]["with-ids"],
            json!(["ac-1", "ac-2"])
        );
        model::validate_model(ModelKind::Profile, &profile).unwrap();
    }

    #[test]
    fn malformed_profile_is_an_error() {
        let ws = workspace();
        let dir = ws.path().join("profiles/p");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("profile.json"), r#"{"profile": "oops"}"#).unwrap();

        let err = create_or_update_profile(ws.path(), "catalogs/c/catalog.json", "p", &[]).unwrap_err();
        assert_eq!(err.to_string(), "profile p has no profile object");
        assert_eq!(fs::read_to_string(dir.join("profile.json")).unwrap(), r#"{"profile": "oops"}"#);
    }

    #[test]
    fn new_compdef_implements_profile_controls() {
        let ws = workspace();
        let mut catalog = model::new_model(ModelKind::Catalog, "c");
        catalog["catalog"]["controls"] = json!([{"id": "ac-1"}, {"id": "ac-2"}]);
        model::write_model(&ModelKind::Catalog.model_path(ws.path(), "c"), &catalog).unwrap();
        create_or_update_profile(ws.path(), "catalogs/c/catalog.json", "p", &[]).unwrap();

        let path = create_new_compdef(ws.path(), "p", "cd", "Comp", "A component", "service")
            .unwrap();
        let compdef: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        let component = &compdef["component-definition"]["components"][0];
        assert_eq!(component["title"], "Comp");
        let reqs = component["control-implementations"][0]["implemented-requirements"]
            .as_array()
            .unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1]["control-id"], "ac-2");
    }
}
