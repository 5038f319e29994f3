//! Reporting a [`BotResults`] to the console or a CI system.
//!
//! Every reporter renders to a writer; the CLI hands it stdout. The GitHub
//! Actions reporter additionally appends step outputs to `GITHUB_OUTPUT`.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

use crate::contract::BotResults;
use crate::provider::{is_github_actions, is_gitlab_ci};

pub const CHANGES_OUTPUT: &str = "changes";
pub const COMMIT_OUTPUT: &str = "commit";
pub const PR_NUMBER_OUTPUT: &str = "pr_number";

const NO_CHANGES: &str = "No changes detected";

pub trait ResultsReporter {
    fn report_results(&self, results: &BotResults, out: &mut dyn Write) -> io::Result<()>;
}

fn changes_str(changes: &[String]) -> String {
    changes.join("\n")
}

/// Plain text for a terminal.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ResultsReporter for ConsoleReporter {
    fn report_results(&self, results: &BotResults, out: &mut dyn Write) -> io::Result<()> {
        if !results.commit_sha.is_empty() {
            writeln!(out, "\nCommit Hash: {}", results.commit_sha)?;
            if results.pr_number != 0 {
                writeln!(out, "\nPull Request Number: {}", results.pr_number)?;
            }
        } else if !results.changes.is_empty() {
            writeln!(out, "\nChanges:\n{}", changes_str(&results.changes))?;
        } else {
            writeln!(out, "{NO_CHANGES}")?;
        }
        Ok(())
    }
}

/// `::group::` blocks plus step outputs for GitHub Actions.
#[derive(Debug, Default)]
pub struct GitHubActionsReporter {
    output_file: Option<PathBuf>,
}

impl GitHubActionsReporter {
    pub fn new(output_file: Option<PathBuf>) -> Self {
        Self { output_file }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from))
    }

    fn set_output(&self, name: &str, value: &str) -> io::Result<()> {
        let Some(path) = &self.output_file else {
            debug!(name, "GITHUB_OUTPUT is not set, skipping step output");
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{name}={value}")
    }

    fn group(out: &mut dyn Write, section: &str, content: &str) -> io::Result<()> {
        writeln!(out, "::group::{section}\n{content}\n::endgroup::")
    }
}

impl ResultsReporter for GitHubActionsReporter {
    fn report_results(&self, results: &BotResults, out: &mut dyn Write) -> io::Result<()> {
        if !results.commit_sha.is_empty() {
            self.set_output(CHANGES_OUTPUT, "true")?;
            self.set_output(COMMIT_OUTPUT, &results.commit_sha)?;
            Self::group(out, "Commit", &results.commit_sha)?;
            if results.pr_number != 0 {
                self.set_output(PR_NUMBER_OUTPUT, &results.pr_number.to_string())?;
                Self::group(out, "Pull Request", &results.pr_number.to_string())?;
            }
        } else if !results.changes.is_empty() {
            self.set_output(CHANGES_OUTPUT, "true")?;
            Self::group(out, "Changes", &changes_str(&results.changes))?;
        } else {
            self.set_output(CHANGES_OUTPUT, "false")?;
            writeln!(out, "{NO_CHANGES}")?;
        }
        Ok(())
    }
}

/// Collapsible job log sections for GitLab CI.
#[derive(Debug, Default)]
pub struct GitLabCiReporter;

impl GitLabCiReporter {
    fn section(out: &mut dyn Write, name: &str, header: &str, content: &str) -> io::Result<()> {
        let ts = Utc::now().timestamp();
        writeln!(
            out,
            "\x1b[0Ksection_start:{ts}:{name}[collapsed=true]\r\x1b[0K{header}\n{content}\n\x1b[0Ksection_end:{ts}:{name}\r\x1b[0K"
        )
    }
}

impl ResultsReporter for GitLabCiReporter {
    fn report_results(&self, results: &BotResults, out: &mut dyn Write) -> io::Result<()> {
        if !results.commit_sha.is_empty() {
            Self::section(out, "commit", "Commit", &results.commit_sha)?;
            if results.pr_number != 0 {
                let number = results.pr_number.to_string();
                Self::section(out, "merge_request", "Merge Request", &number)?;
            }
        } else if !results.changes.is_empty() {
            Self::section(out, "changes", "Changes", &changes_str(&results.changes))?;
        } else {
            writeln!(out, "{NO_CHANGES}")?;
        }
        Ok(())
    }
}

/// The reporter matching the CI environment, console otherwise.
pub fn reporter_from_env() -> Box<dyn ResultsReporter> {
    if is_github_actions() {
        Box::new(GitHubActionsReporter::from_env())
    } else if is_gitlab_ci() {
        Box::new(GitLabCiReporter)
    } else {
        Box::new(ConsoleReporter)
    }
}
