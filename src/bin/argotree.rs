// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use argotree::{
    config::Settings,
    env::Environment,
    git::{
        provider::{new_provider, CreateRepoOptions, GetRepoOptions, ProviderOptions},
        CancelFlag, CloneOptions, Git2Access, Repository, RepositoryAccess,
    },
    kube::{KubectlClient, KustomizeBuilder, TemplateValues},
    manager::Manager,
    path::{default_settings_path, unique_name},
    registry::Registry,
    storage::Workspace,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "argotree [options] <argotree-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, cancel: CancelFlag) -> Result<()> {
        let settings = Settings::load(match self.settings {
            Some(path) => path,
            None => default_settings_path()?,
        })?;
        let ctx = Context { settings, cancel };

        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Env(EnvCommand::Add(opts)) => run_env_add(&ctx, opts),
            Command::Env(EnvCommand::Delete(opts)) => run_env_delete(&ctx, opts),
            Command::Env(EnvCommand::Uninstall(opts)) => run_env_uninstall(opts),
            Command::Env(EnvCommand::Leaves(opts)) => run_env_leaves(opts),
            Command::Env(EnvCommand::List(opts)) => run_env_list(opts),
            Command::Manifest(ManifestCommand::Add(opts)) => run_manifest_add(&ctx, opts),
            Command::Repo(RepoCommand::Get(opts)) => run_repo_get(&ctx, opts),
            Command::Repo(RepoCommand::Create(opts)) => run_repo_create(&ctx, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize empty environment registry.
    #[command(override_usage = "argotree init [options]")]
    Init(RepoDirOptions),

    /// Manage environments of a repository.
    #[command(subcommand)]
    Env(EnvCommand),

    /// Manage manifests of remote repositories.
    #[command(subcommand)]
    Manifest(ManifestCommand),

    /// Manage repositories of the hosting provider.
    #[command(subcommand)]
    Repo(RepoCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum EnvCommand {
    /// Add environment from template.
    #[command(override_usage = "argotree env add [options] --root-app <path> --template <ref> <env_name>")]
    Add(EnvAddOptions),

    /// Delete environment.
    #[command(override_usage = "argotree env delete [options] <env_name>")]
    Delete(EnvDeleteOptions),

    /// Uninstall every managed application of environment.
    #[command(override_usage = "argotree env uninstall [options] <env_name>")]
    Uninstall(EnvNameOptions),

    /// List leaf applications of environment.
    #[command(override_usage = "argotree env leaves [options] <env_name>")]
    Leaves(EnvNameOptions),

    /// List registered environments.
    #[command(override_usage = "argotree env list [options]")]
    List(RepoDirOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum ManifestCommand {
    /// Add manifest to application of remote repository.
    #[command(override_usage = "argotree manifest add [options] --clone-url <url> --root-app <path> --app <name> <file>")]
    Add(ManifestAddOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum RepoCommand {
    /// Print clone URL of repository.
    #[command(override_usage = "argotree repo get <owner> <name>")]
    Get(RepoGetOptions),

    /// Create repository and print its clone URL.
    #[command(override_usage = "argotree repo create [options] <owner> <name>")]
    Create(RepoCreateOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RepoDirOptions {
    /// Path to top-level of GitOps repository.
    #[arg(short, long, value_name = "path", default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EnvNameOptions {
    /// Name of environment.
    #[arg(required = true, value_name = "env_name")]
    pub name: String,

    #[command(flatten)]
    pub repo: RepoDirOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EnvAddOptions {
    /// Name of environment to add.
    #[arg(required = true, value_name = "env_name")]
    pub name: String,

    /// Repository relative path to root application manifest of template.
    #[arg(short, long, value_name = "path")]
    pub root_app: PathBuf,

    /// Template reference in `url[#branch|@tag]` form.
    #[arg(short, long, value_name = "ref")]
    pub template: String,

    /// Use local checkout of template instead of cloning it.
    #[arg(long, value_name = "path")]
    pub template_dir: Option<PathBuf>,

    /// Template value to substitute into bootstrap manifests.
    #[arg(long = "value", value_name = "key=value", value_parser = parse_key_value)]
    pub values: Vec<(String, String)>,

    /// Only validate cluster changes.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub repo: RepoDirOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EnvDeleteOptions {
    /// Name of environment to delete.
    #[arg(required = true, value_name = "env_name")]
    pub name: String,

    /// Template value to substitute into bootstrap manifests.
    #[arg(long = "value", value_name = "key=value", value_parser = parse_key_value)]
    pub values: Vec<(String, String)>,

    /// Only validate cluster changes.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub repo: RepoDirOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ManifestAddOptions {
    /// URL of remote repository to clone.
    #[arg(long, value_name = "url")]
    pub clone_url: String,

    /// Repository relative path to root application manifest.
    #[arg(long, value_name = "path")]
    pub root_app: String,

    /// Name label of application to add manifest to.
    #[arg(long, value_name = "name")]
    pub app: String,

    /// Manifest file to add.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RepoGetOptions {
    #[arg(required = true, value_name = "owner")]
    pub owner: String,

    #[arg(required = true, value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RepoCreateOptions {
    #[arg(required = true, value_name = "owner")]
    pub owner: String,

    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Make repository private.
    #[arg(short, long)]
    pub private: bool,
}

/// Shared state of a single invocation.
struct Context {
    settings: Settings,
    cancel: CancelFlag,
}

impl Context {
    fn access(&self) -> Git2Access {
        Git2Access::new(ProgressBar::new(0), self.cancel.clone())
    }

    fn cluster(&self) -> KubectlClient {
        KubectlClient::new(&self.settings.cluster.kubectl, self.settings.cluster.context.clone())
    }

    fn templater(&self) -> KustomizeBuilder {
        KustomizeBuilder::new(&self.settings.cluster.kubectl)
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let cancel = CancelFlag::new();
    let handler = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            handler.cancel();
        }
    });

    let cli = Cli::parse();
    match tokio::task::spawn_blocking(move || cli.run(cancel)).await {
        Ok(Ok(())) => exit(0),
        Ok(Err(error)) => {
            error!("{error:?}");
            exit(1);
        }
        Err(error) => {
            error!("{error}");
            exit(1);
        }
    }
}

fn run_init(opts: RepoDirOptions) -> Result<()> {
    let registry = Registry::create(Workspace::on_disk(opts.dir));
    if registry.path().exists() {
        return Err(anyhow!("registry {:?} already exists", registry.path().display()));
    }

    registry.persist()?;
    info!("created {:?}", registry.path().display());

    Ok(())
}

fn run_env_add(ctx: &Context, opts: EnvAddOptions) -> Result<()> {
    let mut registry = Registry::load(Workspace::on_disk(opts.repo.dir))?;
    let template_dir = match opts.template_dir {
        Some(dir) => dir,
        None => {
            let repo = ctx.access().clone_repo(&CloneOptions {
                url: opts.template.clone(),
                path: ctx.settings.clone_dir()?.join(unique_name("template")),
                auth: ctx.settings.git.auth(),
                depth: ctx.settings.git.clone_depth,
            })?;
            repo.root()?
        }
    };

    let env = Environment::new(opts.name, opts.root_app, opts.template);
    registry.add_environment(
        env,
        &Workspace::on_disk(template_dir),
        &opts.values.into_iter().collect::<TemplateValues>(),
        opts.dry_run,
        &ctx.cluster(),
        &ctx.templater(),
    )?;

    Ok(())
}

fn run_env_delete(ctx: &Context, opts: EnvDeleteOptions) -> Result<()> {
    let mut registry = Registry::load(Workspace::on_disk(opts.repo.dir))?;
    registry.delete_environment(
        &opts.name,
        &opts.values.into_iter().collect::<TemplateValues>(),
        opts.dry_run,
        &ctx.cluster(),
        &ctx.templater(),
    )?;

    Ok(())
}

fn run_env_uninstall(opts: EnvNameOptions) -> Result<()> {
    let registry = Registry::load(Workspace::on_disk(opts.repo.dir))?;
    let env = registry.environment(&opts.name)?;
    if env.uninstall(registry.workspace())? {
        info!("uninstalled every application of {}", env.name());
    } else {
        warn!("{} still has unmanaged applications", env.name());
    }

    Ok(())
}

fn run_env_leaves(opts: EnvNameOptions) -> Result<()> {
    let registry = Registry::load(Workspace::on_disk(opts.repo.dir))?;
    let env = registry.environment(&opts.name)?;
    for leaf in env.leaf_applications(registry.workspace())? {
        let managed = if leaf.is_managed() { "managed" } else { "unmanaged" };
        println!("{}\t{}\t{managed}", leaf.label_name(), leaf.source_path());
    }

    Ok(())
}

fn run_env_list(opts: RepoDirOptions) -> Result<()> {
    let registry = Registry::load(Workspace::on_disk(opts.dir))?;
    for env in registry.environments() {
        println!("{}\t{}\t{}", env.name(), env.root_app_path.display(), env.template_ref);
    }

    Ok(())
}

fn run_manifest_add(ctx: &Context, opts: ManifestAddOptions) -> Result<()> {
    let manifest = fs::read(&opts.file)?;
    let manager = Manager::new(ctx.access(), ctx.settings.clone_dir()?)
        .with_auth(ctx.settings.git.auth())
        .with_depth(ctx.settings.git.clone_depth);

    let file_name = manager.add_manifest(&opts.clone_url, &opts.root_app, &opts.app, &manifest)?;
    println!("{file_name}");

    Ok(())
}

fn provider_options(ctx: &Context) -> ProviderOptions {
    ProviderOptions {
        kind: ctx.settings.provider.kind.clone(),
        auth: ctx.settings.git.auth(),
        host: ctx.settings.provider.host.clone(),
    }
}

fn run_repo_get(ctx: &Context, opts: RepoGetOptions) -> Result<()> {
    let provider = new_provider(&provider_options(ctx))?;
    let url = provider.get_repository(&GetRepoOptions {
        owner: opts.owner,
        name: opts.name,
    })?;
    println!("{url}");

    Ok(())
}

fn run_repo_create(ctx: &Context, opts: RepoCreateOptions) -> Result<()> {
    let provider = new_provider(&provider_options(ctx))?;
    let url = provider.create_repository(&CreateRepoOptions {
        owner: opts.owner,
        name: opts.name,
        private: opts.private,
    })?;
    println!("{url}");

    Ok(())
}

fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {arg:?}"))
}
