use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use trestle_bot_core::authored::AuthoredType;

use crate::commands;

/// CLI for trestle-bot: keep OSCAL content and its authored forms in sync.
#[derive(Parser, Debug)]
#[clap(
    name = "trestle-bot",
    version,
    about = "Workflow automation for OSCAL compliance content in git repositories"
)]
pub struct Cli {
    /// Display verbose output (-v debug, -vv trace)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to the trestle-bot config file [default: <repo>/.trestlebot/config.yml]
    #[clap(long, global = true, env = "TRESTLEBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name or path of the trestle executable
    #[clap(long, global = true, env = "TRESTLEBOT_TRESTLE_BIN", default_value = "trestle")]
    pub trestle_bin: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new trestle-bot workspace in a git repository
    Init(InitArgs),
    /// Assemble markdown into OSCAL JSON and regenerate markdown from it
    Autosync(AutosyncArgs),
    /// Create new authored content
    Create {
        #[clap(subcommand)]
        command: CreateCommands,
    },
    /// Transform rule files into component definitions
    RuleTransform(RuleTransformArgs),
    /// Copy OSCAL content from upstream git repositories
    SyncUpstreams(SyncUpstreamsArgs),
    /// Manage the upstreams recorded in the config file
    Upstream {
        #[clap(subcommand)]
        command: UpstreamCommands,
    },
    /// Transform a CaC product profile into a component definition
    SyncCacContent(SyncCacContentArgs),
    /// Transform a CaC controls file into an OSCAL catalog
    SyncCacCatalog(SyncCacCatalogArgs),
    /// Transform CaC control levels into OSCAL profiles
    SyncCacContentProfile(SyncCacContentProfileArgs),
}

#[derive(Subcommand, Debug)]
pub enum CreateCommands {
    /// Create a component definition implementing a profile
    Compdef(CreateCompdefArgs),
    /// Create an SSP from a profile and component definitions
    Ssp(CreateSspArgs),
}

#[derive(Subcommand, Debug)]
pub enum UpstreamCommands {
    /// Record an upstream source in the config file
    Add(UpstreamAddArgs),
    /// Sync every upstream recorded in the config file
    Sync(UpstreamSyncArgs),
}

/// Flags shared by every command that commits its results.
#[derive(Args, Debug, Clone, Default)]
pub struct GitArgs {
    /// Path to the git repository [default: config repo_path, then .]
    #[clap(long, env = "TRESTLEBOT_REPO_PATH")]
    pub repo_path: Option<PathBuf>,

    /// Branch to commit to [default: config branch, then the current branch]
    #[clap(long, env = "TRESTLEBOT_BRANCH")]
    pub branch: Option<String>,

    #[clap(long, env = "TRESTLEBOT_COMMITTER_NAME")]
    pub committer_name: Option<String>,

    #[clap(long, env = "TRESTLEBOT_COMMITTER_EMAIL")]
    pub committer_email: Option<String>,

    #[clap(long)]
    pub author_name: Option<String>,

    #[clap(long)]
    pub author_email: Option<String>,

    #[clap(long, default_value = "Sync automatic updates")]
    pub commit_message: String,

    /// Pathspecs to stage, `.` for everything
    #[clap(long = "file-pattern", default_value = ".")]
    pub file_patterns: Vec<String>,

    /// Commit locally without pushing
    #[clap(long)]
    pub dry_run: bool,

    /// Fail instead of committing when the run changes files
    #[clap(long)]
    pub check_only: bool,

    /// Branch to open a pull request against. No pull request is opened if unset
    #[clap(long)]
    pub target_branch: Option<String>,

    #[clap(long, default_value = "Automatic updates from trestlebot")]
    pub pull_request_title: String,

    /// github or gitlab [default: detected from the CI environment]
    #[clap(long)]
    pub git_provider_type: Option<String>,

    /// Git server URL [default: detected from the CI environment]
    #[clap(long)]
    pub git_server_url: Option<String>,

    /// Read the access token from standard input
    #[clap(long)]
    pub with_token: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[clap(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// OSCAL model the workspace authors (ssp or compdef)
    #[clap(long)]
    pub oscal_model: AuthoredType,

    #[clap(long)]
    pub markdown_dir: Option<String>,

    #[clap(long)]
    pub ssp_index_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct AutosyncArgs {
    /// catalog, profile, compdef or ssp
    pub oscal_model: AuthoredType,

    #[clap(flatten)]
    pub git: GitArgs,

    /// Markdown directory of this model [default: <config markdown_dir>/<model dir>]
    #[clap(long)]
    pub markdown_dir: Option<String>,

    /// Glob patterns of models to skip
    #[clap(long = "skip-items")]
    pub skip_items: Vec<String>,

    #[clap(long)]
    pub skip_assemble: bool,

    #[clap(long)]
    pub skip_regenerate: bool,

    /// Version to set on assembled models
    #[clap(long, default_value = "")]
    pub version: String,

    #[clap(long)]
    pub ssp_index_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateCompdefArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    #[clap(long)]
    pub profile_name: String,

    #[clap(long)]
    pub compdef_name: String,

    #[clap(long)]
    pub component_title: String,

    #[clap(long)]
    pub component_description: String,

    #[clap(long, default_value = "service")]
    pub component_definition_type: String,

    #[clap(long)]
    pub markdown_dir: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateSspArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    #[clap(long)]
    pub ssp_name: String,

    #[clap(long)]
    pub profile_name: String,

    /// Component definitions included in the SSP
    #[clap(long = "compdefs", value_delimiter = ',')]
    pub compdefs: Vec<String>,

    #[clap(long)]
    pub leveraged_ssp: Option<String>,

    #[clap(long)]
    pub markdown_dir: Option<String>,

    #[clap(long)]
    pub ssp_index_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct RuleTransformArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    /// Directory of rule files, laid out as <compdef>/<component>/<rule>
    #[clap(long, default_value = "rules")]
    pub rules_view_path: String,

    #[clap(long = "skip-items")]
    pub skip_items: Vec<String>,

    #[clap(long)]
    pub markdown_dir: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncUpstreamsArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    /// Sources as <repo_url>@<ref>
    #[clap(long = "sources", required = true)]
    pub sources: Vec<String>,

    #[clap(long = "include-models", default_value = "*")]
    pub include_models: Vec<String>,

    #[clap(long = "exclude-models")]
    pub exclude_models: Vec<String>,

    #[clap(long)]
    pub skip_validation: bool,
}

#[derive(Args, Debug)]
pub struct UpstreamAddArgs {
    #[clap(long, default_value = ".")]
    pub repo_path: PathBuf,

    /// Source as <repo_url>@<ref>
    #[clap(long)]
    pub url: String,

    #[clap(long = "include-models", default_value = "*")]
    pub include_models: Vec<String>,

    #[clap(long = "exclude-models")]
    pub exclude_models: Vec<String>,

    #[clap(long)]
    pub skip_validation: bool,
}

#[derive(Args, Debug)]
pub struct UpstreamSyncArgs {
    #[clap(flatten)]
    pub git: GitArgs,
}

#[derive(Args, Debug)]
pub struct SyncCacContentArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    #[clap(long)]
    pub cac_content_root: PathBuf,

    #[clap(long)]
    pub product: String,

    #[clap(long)]
    pub cac_profile: String,

    #[clap(long)]
    pub oscal_profile: String,

    #[clap(long, default_value = "service")]
    pub component_definition_type: String,
}

#[derive(Args, Debug)]
pub struct SyncCacCatalogArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    #[clap(long)]
    pub cac_content_root: PathBuf,

    #[clap(long)]
    pub policy_id: String,

    #[clap(long)]
    pub oscal_catalog: String,
}

#[derive(Args, Debug)]
pub struct SyncCacContentProfileArgs {
    #[clap(flatten)]
    pub git: GitArgs,

    #[clap(long)]
    pub cac_content_root: PathBuf,

    #[clap(long)]
    pub policy_id: String,

    #[clap(long)]
    pub oscal_catalog: String,

    /// Only write profiles for these levels
    #[clap(long = "filter-by-level")]
    pub filter_by_level: Vec<String>,
}

/// CLI logic entrypoint for integration tests and main()
pub fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let context = commands::Context::new(cli.config, &cli.trestle_bin);
    let result = match cli.command {
        Commands::Init(args) => commands::init(&context, args),
        Commands::Autosync(args) => commands::autosync(&context, args),
        Commands::Create { command } => match command {
            CreateCommands::Compdef(args) => commands::create_compdef(&context, args),
            CreateCommands::Ssp(args) => commands::create_ssp(&context, args),
        },
        Commands::RuleTransform(args) => commands::rule_transform(&context, args),
        Commands::SyncUpstreams(args) => commands::sync_upstreams(&context, args),
        Commands::Upstream { command } => match command {
            UpstreamCommands::Add(args) => commands::upstream_add(&context, args),
            UpstreamCommands::Sync(args) => commands::upstream_sync(&context, args),
        },
        Commands::SyncCacContent(args) => commands::sync_cac_content(&context, args),
        Commands::SyncCacCatalog(args) => commands::sync_cac_catalog(&context, args),
        Commands::SyncCacContentProfile(args) => commands::sync_cac_content_profile(&context, args),
    };

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!(success = result.is_ok(), "exit");
    });

    result
}
