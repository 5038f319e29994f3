//! Command handlers: resolve settings, build the task pipeline, run the bot.
//!
//! Settings resolve as flag, then environment (through clap), then the
//! `.trestlebot/config.yml` file, then a built-in default.

use anyhow::{anyhow, bail, Context as _, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use trestle_bot_core::authored::{create_new_compdef, AuthoredObject, AuthoredType};
use trestle_bot_core::bot::{RunOptions, TrestleBot};
use trestle_bot_core::config::{
    TrestleBotConfig, UpstreamsConfig, DEFAULT_MARKDOWN_DIR, DEFAULT_SSP_INDEX_FILE,
    TRESTLEBOT_CONFIG_DIR,
};
use trestle_bot_core::contract::{GitProvider, Task, Trestle, SUCCESS_EXIT_CODE};
use trestle_bot_core::error::{GitProviderError, TaskError};
use trestle_bot_core::filter::{ModelFilter, KEEP_FILE};
use trestle_bot_core::git::{GitRepo, Identity};
use trestle_bot_core::model::{self, ModelKind};
use trestle_bot_core::provider::{load_provider_from_environment, provider_factory, ProviderType};
use trestle_bot_core::reporter::reporter_from_env;
use trestle_bot_core::tasks::cac::{
    SyncCacCatalogTask, SyncCacContentProfileTask, SyncCacContentTask,
};
use trestle_bot_core::tasks::sync_upstreams::split_source;
use trestle_bot_core::tasks::{AssembleTask, RegenerateTask, RuleTransformTask, SyncUpstreamsTask};
use trestle_bot_core::trestle::TrestleCli;

use crate::cli::{
    AutosyncArgs, CreateCompdefArgs, CreateSspArgs, GitArgs, InitArgs, RuleTransformArgs,
    SyncCacCatalogArgs, SyncCacContentArgs, SyncCacContentProfileArgs, SyncUpstreamsArgs,
    UpstreamAddArgs, UpstreamSyncArgs,
};
use crate::error::InvalidArgs;
use crate::load_config::{load_config_or_default, write_config};

pub const TOKEN_ENV: &str = "TRESTLEBOT_REPO_ACCESS_TOKEN";

/// Process-wide collaborators shared by every command.
pub struct Context {
    config_path: Option<PathBuf>,
    trestle: Arc<dyn Trestle>,
}

/// A repository plus the config found for it.
struct Workspace {
    repo_path: PathBuf,
    config_path: PathBuf,
    config: TrestleBotConfig,
}

impl Workspace {
    fn markdown_dir_for(&self, kind: ModelKind) -> String {
        format!("{}/{}", self.config.markdown_dir(), kind.dir())
    }

    fn ssp_index_path(&self, flag: Option<&str>) -> PathBuf {
        self.repo_path
            .join(flag.unwrap_or_else(|| self.config.ssp_index_file()))
    }
}

impl Context {
    pub fn new(config_path: Option<PathBuf>, trestle_bin: &str) -> Self {
        Self::with_trestle(config_path, Arc::new(TrestleCli::new(trestle_bin)))
    }

    pub fn with_trestle(config_path: Option<PathBuf>, trestle: Arc<dyn Trestle>) -> Self {
        Self {
            config_path,
            trestle,
        }
    }

    fn config_path_for(&self, repo_hint: &Path) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| TrestleBotConfig::path_in(repo_hint))
    }

    fn workspace(&self, git: &GitArgs) -> Result<Workspace> {
        let hint = git.repo_path.clone().unwrap_or_else(|| PathBuf::from("."));
        let config_path = self.config_path_for(&hint);
        let config = load_config_or_default(&config_path)?;
        let repo_path = git
            .repo_path
            .clone()
            .or_else(|| config.repo_path.clone())
            .unwrap_or(hint);
        Ok(Workspace {
            repo_path,
            config_path,
            config,
        })
    }

    fn authored(
        &self,
        ws: &Workspace,
        authored_type: AuthoredType,
        ssp_index_file: Option<&str>,
    ) -> Result<AuthoredObject> {
        let index = ws.ssp_index_path(ssp_index_file);
        let index = (authored_type == AuthoredType::Ssp).then_some(index.as_path());
        AuthoredObject::for_type(&ws.repo_path, authored_type, index, self.trestle.clone())
            .with_context(|| format!("Failed to open {authored_type} workspace"))
    }

    fn run_bot(&self, ws: &Workspace, git: &GitArgs, tasks: Vec<Box<dyn Task>>) -> Result<()> {
        let committer_name = git
            .committer_name
            .clone()
            .or_else(|| ws.config.committer_name.clone())
            .ok_or_else(|| {
                InvalidArgs::new("--committer-name", "committer name must be set by flag, environment or config")
            })?;
        let committer_email = git
            .committer_email
            .clone()
            .or_else(|| ws.config.committer_email.clone())
            .ok_or_else(|| {
                InvalidArgs::new("--committer-email", "committer email must be set by flag, environment or config")
            })?;
        let branch = match git.branch.clone().or_else(|| ws.config.branch.clone()) {
            Some(branch) => branch,
            None => GitRepo::open(&ws.repo_path)?
                .current_branch()
                .ok_or_else(|| InvalidArgs::new("--branch", "no branch given and HEAD is detached"))?,
        };
        let provider = resolve_provider(git)?;

        let bot = TrestleBot::new(&ws.repo_path, branch, Identity::new(committer_name, committer_email))
            .with_author(git.author_name.clone(), git.author_email.clone())
            .with_target_branch(git.target_branch.clone());
        let options = RunOptions {
            patterns: git.file_patterns.clone(),
            commit_message: git.commit_message.clone(),
            pull_request_title: git.pull_request_title.clone(),
            check_only: git.check_only,
            dry_run: git.dry_run,
        };

        let results = bot
            .run(&tasks, provider.as_deref(), &options)
            .context("trestle-bot run failed")?;
        reporter_from_env()
            .report_results(&results, &mut io::stdout().lock())
            .context("Failed to report results")?;
        Ok(())
    }
}

/// A one-off pipeline stage built from a closure.
struct FnTask<F> {
    name: &'static str,
    f: F,
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> Result<(), TaskError>,
{
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn execute(&self) -> Result<i32, TaskError> {
        (self.f)()?;
        Ok(SUCCESS_EXIT_CODE)
    }
}

/// Provider for opening pull requests, only when a target branch is set.
pub fn resolve_provider(git: &GitArgs) -> Result<Option<Box<dyn GitProvider>>> {
    if git.target_branch.as_deref().filter(|b| !b.is_empty()).is_none() {
        return Ok(None);
    }

    let token = if git.with_token {
        io::read_to_string(io::stdin()).context("Failed to read token from standard input")?
    } else {
        std::env::var(TOKEN_ENV).unwrap_or_default()
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(InvalidArgs::new(
            "--with-token",
            format!(
                "with-token flag must be set to read from standard input or use {TOKEN_ENV} environment variable when using target-branch"
            ),
        )
        .into());
    }

    let detected = if git.git_provider_type.is_none() || git.git_server_url.is_none() {
        load_provider_from_environment()?
    } else {
        None
    };
    let provider_type = git
        .git_provider_type
        .clone()
        .or_else(|| detected.as_ref().map(|(t, _)| t.to_string()));
    let server_url = git
        .git_server_url
        .clone()
        .or_else(|| detected.map(|(_, url)| url));

    let Some(provider_type) = provider_type else {
        let message = if server_url.is_some() {
            "git-provider-type must be set when using git-server-url"
        } else {
            "Could not determine Git provider from inputs"
        };
        return Err(InvalidArgs::new("--git-provider-type", message).into());
    };
    let provider_type: ProviderType = provider_type
        .parse()
        .map_err(|e: GitProviderError| InvalidArgs::new("--git-provider-type", e.to_string()))?;

    match provider_factory(token, provider_type, server_url.as_deref()) {
        Ok(provider) => Ok(Some(provider)),
        Err(e @ GitProviderError::CustomGitHubServer) => {
            Err(InvalidArgs::new("--git-server-url", e.to_string()).into())
        }
        Err(e) => Err(anyhow!(e)),
    }
}

fn include_all_but(skip: &[String]) -> ModelFilter {
    ModelFilter::new(skip, &["*".to_string()])
}

fn model_dirs(model: AuthoredType) -> Result<&'static [&'static str], InvalidArgs> {
    match model {
        AuthoredType::Ssp => Ok(&[
            "system-security-plans",
            "component-definitions",
            "catalogs",
            "profiles",
        ]),
        AuthoredType::Compdef => Ok(&["component-definitions", "catalogs", "profiles", "rules"]),
        other => Err(InvalidArgs::new(
            "--oscal-model",
            format!("init supports ssp and compdef, got {other}"),
        )),
    }
}

pub fn init(ctx: &Context, args: InitArgs) -> Result<()> {
    let dirs = model_dirs(args.oscal_model)?;
    let root = &args.repo_path;
    if !root.is_dir() {
        bail!("Initialization failed. Given directory {} does not exist.", root.display());
    }
    if !root.join(".git").exists() {
        bail!("Initialization failed. Given directory {} is not a Git repository.", root.display());
    }
    let bot_dir = root.join(TRESTLEBOT_CONFIG_DIR);
    if bot_dir.exists() {
        bail!(
            "Initialization failed. Found existing {TRESTLEBOT_CONFIG_DIR} directory in {}",
            root.display()
        );
    }

    for dir in std::iter::once(bot_dir.clone()).chain(dirs.iter().map(|d| root.join(d))) {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::write(dir.join(KEEP_FILE), "")
            .with_context(|| format!("Failed to create keep file in {}", dir.display()))?;
    }

    if !model::is_valid_project_root(root) {
        ctx.trestle
            .run(root, &["init".to_string(), "--govdocs".to_string()])
            .map_err(|e| anyhow!("Initialization failed. Unexpected trestle error: {e}"))?;
    }

    let config = TrestleBotConfig {
        markdown_dir: Some(args.markdown_dir.unwrap_or_else(|| DEFAULT_MARKDOWN_DIR.to_string())),
        ssp_index_file: (args.oscal_model == AuthoredType::Ssp).then(|| {
            args.ssp_index_file
                .unwrap_or_else(|| DEFAULT_SSP_INDEX_FILE.to_string())
        }),
        ..TrestleBotConfig::default()
    };
    write_config(TrestleBotConfig::path_in(root), &config)?;
    info!(root = %root.display(), "Initialized trestlebot project successfully");
    Ok(())
}

pub fn autosync(ctx: &Context, args: AutosyncArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let authored_type = args.oscal_model;
    let markdown_dir = args
        .markdown_dir
        .unwrap_or_else(|| ws.markdown_dir_for(authored_type.model_kind()));
    let authored = ctx.authored(&ws, authored_type, args.ssp_index_file.as_deref())?;
    let filter = include_all_but(&args.skip_items);

    let mut tasks: Vec<Box<dyn Task>> = Vec::new();
    if !args.skip_assemble {
        tasks.push(Box::new(AssembleTask::new(
            authored.clone(),
            markdown_dir.clone(),
            args.version,
            Some(filter.clone()),
        )));
    } else {
        info!("Assemble task skipped");
    }
    if !args.skip_regenerate {
        tasks.push(Box::new(RegenerateTask::new(authored, markdown_dir, Some(filter))));
    } else {
        info!("Regenerate task skipped");
    }
    ctx.run_bot(&ws, &args.git, tasks)
}

pub fn create_compdef(ctx: &Context, args: CreateCompdefArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let markdown_dir = args
        .markdown_dir
        .unwrap_or_else(|| ws.markdown_dir_for(ModelKind::ComponentDefinition));
    let authored = ctx.authored(&ws, AuthoredType::Compdef, None)?;

    let only_new = ModelFilter::new(&[] as &[String], &[args.compdef_name.clone()]);
    let root = ws.repo_path.clone();
    let compdef_name = args.compdef_name.clone();
    let create = FnTask {
        name: "create-compdef",
        f: move || {
            let path = create_new_compdef(
                &root,
                &args.profile_name,
                &compdef_name,
                &args.component_title,
                &args.component_description,
                &args.component_definition_type,
            )?;
            info!(path = %path.display(), "Created component definition");
            Ok(())
        },
    };
    let tasks: Vec<Box<dyn Task>> = vec![
        Box::new(create),
        Box::new(RegenerateTask::new(authored, markdown_dir, Some(only_new))),
    ];
    ctx.run_bot(&ws, &args.git, tasks)
}

pub fn create_ssp(ctx: &Context, args: CreateSspArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let markdown_dir = args
        .markdown_dir
        .unwrap_or_else(|| ws.markdown_dir_for(ModelKind::SystemSecurityPlan));
    let authored = ctx.authored(&ws, AuthoredType::Ssp, args.ssp_index_file.as_deref())?;

    let create = FnTask {
        name: "create-ssp",
        f: move || {
            let mut authored = authored.clone();
            authored.create_new_ssp(
                &args.ssp_name,
                &args.profile_name,
                args.compdefs.clone(),
                &markdown_dir,
                args.leveraged_ssp.clone(),
            )?;
            Ok(())
        },
    };
    ctx.run_bot(&ws, &args.git, vec![Box::new(create)])
}

pub fn rule_transform(ctx: &Context, args: RuleTransformArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let markdown_dir = args
        .markdown_dir
        .unwrap_or_else(|| ws.markdown_dir_for(ModelKind::ComponentDefinition));
    let authored = ctx.authored(&ws, AuthoredType::Compdef, None)?;
    let filter = include_all_but(&args.skip_items);

    let tasks: Vec<Box<dyn Task>> = vec![
        Box::new(RuleTransformTask::new(
            &ws.repo_path,
            args.rules_view_path,
            Some(filter.clone()),
            ctx.trestle.clone(),
        )),
        Box::new(RegenerateTask::new(authored, markdown_dir, Some(filter))),
    ];
    ctx.run_bot(&ws, &args.git, tasks)
}

fn check_sources<'a>(sources: impl IntoIterator<Item = &'a String>) -> Result<(), InvalidArgs> {
    for source in sources {
        split_source(source).map_err(|e| InvalidArgs::new("--sources", e.to_string()))?;
    }
    Ok(())
}

pub fn sync_upstreams(ctx: &Context, args: SyncUpstreamsArgs) -> Result<()> {
    check_sources(&args.sources)?;
    let ws = ctx.workspace(&args.git)?;
    let filter = ModelFilter::new(&args.exclude_models, &args.include_models);
    let task = SyncUpstreamsTask::new(&ws.repo_path, args.sources, Some(filter), !args.skip_validation)?;
    ctx.run_bot(&ws, &args.git, vec![Box::new(task)])
}

pub fn upstream_add(ctx: &Context, args: UpstreamAddArgs) -> Result<()> {
    check_sources([&args.url])?;
    let config_path = ctx.config_path_for(&args.repo_path);
    let mut config = load_config_or_default(&config_path)?;
    let upstream = UpstreamsConfig {
        url: args.url,
        include_models: args.include_models,
        exclude_models: args.exclude_models,
        skip_validation: args.skip_validation,
    };
    let url = upstream.url.clone();
    if config.add_upstream(upstream) {
        write_config(&config_path, &config)?;
        info!(upstream = %url, "Upstream recorded");
    } else {
        warn!(upstream = %url, "Upstream already recorded");
    }
    Ok(())
}

pub fn upstream_sync(ctx: &Context, args: UpstreamSyncArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    if ws.config.upstreams.is_empty() {
        return Err(InvalidArgs::new(
            "--config",
            format!("no upstreams recorded in {}", ws.config_path.display()),
        )
        .into());
    }
    check_sources(ws.config.upstreams.iter().map(|u| &u.url))?;

    let mut tasks: Vec<Box<dyn Task>> = Vec::new();
    for upstream in &ws.config.upstreams {
        tasks.push(Box::new(SyncUpstreamsTask::new(
            &ws.repo_path,
            vec![upstream.url.clone()],
            Some(upstream.filter()),
            !upstream.skip_validation,
        )?));
    }
    ctx.run_bot(&ws, &args.git, tasks)
}

pub fn sync_cac_content(ctx: &Context, args: SyncCacContentArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let task = SyncCacContentTask::new(
        &ws.repo_path,
        args.cac_content_root,
        args.product,
        args.cac_profile,
        args.oscal_profile,
        args.component_definition_type,
        ctx.trestle.clone(),
    );
    ctx.run_bot(&ws, &args.git, vec![Box::new(task)])
}

pub fn sync_cac_catalog(ctx: &Context, args: SyncCacCatalogArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let task = SyncCacCatalogTask::new(
        &ws.repo_path,
        args.cac_content_root,
        args.policy_id,
        args.oscal_catalog,
    );
    ctx.run_bot(&ws, &args.git, vec![Box::new(task)])
}

pub fn sync_cac_content_profile(ctx: &Context, args: SyncCacContentProfileArgs) -> Result<()> {
    let ws = ctx.workspace(&args.git)?;
    let task = SyncCacContentProfileTask::new(
        &ws.repo_path,
        args.cac_content_root,
        args.policy_id,
        args.oscal_catalog,
        args.filter_by_level,
    );
    ctx.run_bot(&ws, &args.git, vec![Box::new(task)])
}
