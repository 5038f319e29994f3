use std::path::PathBuf;
use tracing::{info, warn};

use super::{to_oscal_control_id, CacPolicy};
use crate::authored::create_or_update_profile;
use crate::contract::{Task, SUCCESS_EXIT_CODE};
use crate::error::TaskError;
use crate::model::ModelKind;

/// Writes one OSCAL profile per CaC level, named `<policy_id>-<level>`.
///
/// Each profile selects the controls of its level and of every level it
/// inherits from, out of the catalog `oscal_catalog`.
pub struct SyncCacContentProfileTask {
    working_dir: PathBuf,
    cac_content_root: PathBuf,
    policy_id: String,
    oscal_catalog: String,
    filter_by_level: Vec<String>,
}

impl SyncCacContentProfileTask {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        cac_content_root: impl Into<PathBuf>,
        policy_id: impl Into<String>,
        oscal_catalog: impl Into<String>,
        filter_by_level: Vec<String>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            cac_content_root: cac_content_root.into(),
            policy_id: policy_id.into(),
            oscal_catalog: oscal_catalog.into(),
            filter_by_level,
        }
    }
}

impl Task for SyncCacContentProfileTask {
    fn name(&self) -> String {
        "sync-cac-content-profile".to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        let policy = CacPolicy::load(&self.cac_content_root, &self.policy_id)?;
        let levels: Vec<String> = if self.filter_by_level.is_empty() {
            policy.levels.iter().map(|l| l.id.clone()).collect()
        } else {
            self.filter_by_level.clone()
        };
        if levels.is_empty() {
            return Err(TaskError::Other(format!(
                "Policy {} defines no levels",
                self.policy_id
            )));
        }

        let import_path = format!(
            "{}/{}/{}.json",
            ModelKind::Catalog.dir(),
            self.oscal_catalog,
            ModelKind::Catalog.alias()
        );
        for level in levels {
            if !policy.levels.iter().any(|l| l.id == level) {
                return Err(TaskError::Other(format!(
                    "Level {level} is not defined in policy {}",
                    self.policy_id
                )));
            }
            let control_ids: Vec<String> = policy
                .controls_of_level(&level)
                .iter()
                .map(|c| to_oscal_control_id(&c.id))
                .collect();
            if control_ids.is_empty() {
                warn!(level = %level, "No controls at level, skipping profile");
                continue;
            }
            let profile_name = format!("{}-{level}", self.policy_id);
            let written =
                create_or_update_profile(&self.working_dir, &import_path, &profile_name, &control_ids)?;
            info!(
                profile = %profile_name,
                controls = control_ids.len(),
                written,
                "Synced CaC level to profile"
            );
        }
        Ok(SUCCESS_EXIT_CODE)
    }
}
