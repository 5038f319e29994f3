//! The SSP index: which profile and component definitions each SSP is built from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::AuthoredObjectError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SspIndexEntry {
    pub profile: String,
    pub component_definitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leveraged_ssp: Option<String>,
}

/// JSON file mapping SSP names to their inputs.
#[derive(Debug, Clone)]
pub struct SspIndex {
    path: PathBuf,
    entries: BTreeMap<String, SspIndexEntry>,
}

impl SspIndex {
    /// Reads the index at `path`, creating an empty `{}` file if none exists.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AuthoredObjectError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| AuthoredObjectError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, "{}\n").map_err(|source| AuthoredObjectError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "Created empty SSP index");
        }

        let text = fs::read_to_string(&path).map_err(|source| AuthoredObjectError::Io {
            path: path.clone(),
            source,
        })?;
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|source| AuthoredObjectError::Json {
                path: path.clone(),
                source,
            })?;

        let mut entries = BTreeMap::new();
        for (name, value) in raw {
            let entry: SspIndexEntry = serde_json::from_value(value)
                .map_err(|_| AuthoredObjectError::IncompleteIndexEntry(name.clone()))?;
            entries.insert(name, entry);
        }
        debug!(path = %path.display(), entries = entries.len(), "Loaded SSP index");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, ssp_name: &str) -> Option<&SspIndexEntry> {
        self.entries.get(ssp_name)
    }

    pub fn comps_by_ssp(&self, ssp_name: &str) -> Option<&[String]> {
        self.get(ssp_name)
            .map(|e| e.component_definitions.as_slice())
    }

    pub fn profile_by_ssp(&self, ssp_name: &str) -> Option<&str> {
        self.get(ssp_name).map(|e| e.profile.as_str())
    }

    pub fn leveraged_ssp_by_ssp(&self, ssp_name: &str) -> Option<&str> {
        self.get(ssp_name).and_then(|e| e.leveraged_ssp.as_deref())
    }

    pub fn add_new_ssp(
        &mut self,
        ssp_name: &str,
        profile: &str,
        component_definitions: Vec<String>,
        leveraged_ssp: Option<String>,
    ) {
        self.entries.insert(
            ssp_name.to_string(),
            SspIndexEntry {
                profile: profile.to_string(),
                component_definitions,
                leveraged_ssp,
            },
        );
    }

    pub fn write_out(&self) -> Result<(), AuthoredObjectError> {
        let text = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            AuthoredObjectError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, text + "\n").map_err(|source| AuthoredObjectError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
