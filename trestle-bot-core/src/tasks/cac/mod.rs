//! Tasks that turn ComplianceAsCode content into OSCAL models.
//!
//! Controls files live at `<cac_root>/controls/<policy_id>.yml`; products at
//! `<cac_root>/products/<product>/`. Only the fields used here are read.

pub mod catalog;
pub mod content;
pub mod profile;

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::TaskError;

pub use catalog::SyncCacCatalogTask;
pub use content::SyncCacContentTask;
pub use profile::SyncCacContentProfileTask;

#[derive(Debug, Clone, Deserialize)]
pub struct CacLevel {
    pub id: String,
    #[serde(default)]
    pub inherits_from: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacControl {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub controls: Vec<CacControl>,
}

/// One controls file.
#[derive(Debug, Clone, Deserialize)]
pub struct CacPolicy {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub levels: Vec<CacLevel>,
    #[serde(default)]
    pub controls: Vec<CacControl>,
}

impl CacPolicy {
    pub fn load(cac_root: &Path, policy_id: &str) -> Result<Self, TaskError> {
        let path = controls_file(cac_root, policy_id)?;
        let text = fs::read_to_string(&path).map_err(|e| TaskError::io(&path, e))?;
        let policy: CacPolicy = serde_yaml::from_str(&text).map_err(|e| {
            TaskError::Other(format!("Failed to load CaC policy {}: {e}", path.display()))
        })?;
        debug!(policy = %policy.id, controls = policy.controls.len(), "Loaded CaC policy");
        Ok(policy)
    }

    /// Every control, parents before their children. Children without
    /// levels take their parent's.
    pub fn flattened(&self) -> Vec<CacControl> {
        fn walk(controls: &[CacControl], inherited: &[String], out: &mut Vec<CacControl>) {
            for control in controls {
                let mut flat = control.clone();
                if flat.levels.is_empty() {
                    flat.levels = inherited.to_vec();
                }
                let children = std::mem::take(&mut flat.controls);
                let levels = flat.levels.clone();
                out.push(flat);
                walk(&children, &levels, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.controls, &[], &mut out);
        out
    }

    /// `level` plus every level it inherits from, transitively.
    pub fn level_closure(&self, level: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![level.to_string()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.levels.iter().find(|l| l.id == current) {
                pending.extend(def.inherits_from.iter().cloned());
            }
        }
        seen
    }

    /// Controls eligible for `level`. A control without levels belongs to
    /// the policy's first level.
    pub fn controls_of_level(&self, level: &str) -> Vec<CacControl> {
        let closure = self.level_closure(level);
        let default_level = self.levels.first().map(|l| l.id.clone());
        self.flattened()
            .into_iter()
            .filter(|c| {
                if c.levels.is_empty() {
                    default_level.as_ref().is_some_and(|d| closure.contains(d))
                } else {
                    c.levels.iter().any(|l| closure.contains(l))
                }
            })
            .collect()
    }
}

fn controls_file(cac_root: &Path, policy_id: &str) -> Result<PathBuf, TaskError> {
    let dir = cac_root.join("controls");
    for ext in ["yml", "yaml"] {
        let path = dir.join(format!("{policy_id}.{ext}"));
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(TaskError::Other(format!(
        "No controls file for policy {policy_id} in {}",
        dir.display()
    )))
}

/// Splits a CaC control id into its OSCAL group id and nested path.
///
/// `AC-2(1)` becomes `("ac", ["2", "1"])`.
pub fn oscal_id_parts(cac_control_id: &str) -> (String, Vec<String>) {
    let mut words = cac_control_id
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase);
    let group = words.next().unwrap_or_default();
    (group, words.collect())
}

/// OSCAL control id for a group id and nested path.
pub fn oscal_control_id(group_id: &str, path: &[String]) -> String {
    if path.is_empty() {
        group_id.to_string()
    } else {
        format!("{group_id}-{}", path.join("."))
    }
}

/// OSCAL control id for a CaC control id.
pub fn to_oscal_control_id(cac_control_id: &str) -> String {
    let (group, path) = oscal_id_parts(cac_control_id);
    oscal_control_id(&group, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CacPolicy {
        serde_yaml::from_str(
            r#"
id: abcd
levels:
  - id: low
  - id: medium
    inherits_from: [low]
  - id: high
    inherits_from: [medium]
controls:
  - id: AC-1
    levels: [low]
    controls:
      - id: AC-1(1)
  - id: AC-2
    levels: [high]
  - id: AC-3
"#,
        )
        .unwrap()
    }

    #[test]
    fn converts_cac_ids() {
        assert_eq!(to_oscal_control_id("AC-2(1)"), "ac-2.1");
        assert_eq!(to_oscal_control_id("SRG-OS-000001"), "srg-os.000001");
        assert_eq!(to_oscal_control_id("intro"), "intro");
    }

    #[test]
    fn levels_are_inherited() {
        let policy = policy();
        let ids = |level: &str| -> Vec<String> {
            policy
                .controls_of_level(level)
                .into_iter()
                .map(|c| c.id)
                .collect()
        };
        assert_eq!(ids("low"), vec!["AC-1", "AC-1(1)", "AC-3"]);
        assert_eq!(ids("high"), vec!["AC-1", "AC-1(1)", "AC-2", "AC-3"]);
    }
}
