use std::path::Path;
use std::process::Command;
use tracing::{debug, error, info};

use crate::contract::{Trestle, TrestleError};

/// Runs the `trestle` executable found on `PATH`, or at an explicit location.
#[derive(Debug, Clone)]
pub struct TrestleCli {
    program: String,
}

impl Default for TrestleCli {
    fn default() -> Self {
        Self {
            program: "trestle".to_string(),
        }
    }
}

impl TrestleCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Trestle for TrestleCli {
    fn run(&self, root: &Path, args: &[String]) -> Result<(), TrestleError> {
        debug!(program = %self.program, root = %root.display(), ?args, "Running trestle");
        let output = Command::new(&self.program)
            .current_dir(root)
            .args(args)
            .output()
            .map_err(|e| -> TrestleError {
                error!(error = ?e, program = %self.program, "Failed to launch trestle process");
                format!("failed to launch {}: {e}", self.program).into()
            })?;

        if output.status.success() {
            info!(command = ?args.first(), root = %root.display(), "trestle command succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let details = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        error!(
            status = ?output.status,
            ?args,
            details = %details,
            "trestle exited with non-zero code"
        );
        Err(format!("trestle exited with {}: {}", output.status, details).into())
    }
}
