// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotpick::{
    config::Config,
    deploy::{
        apply::Applier,
        backup::{BackupManager, BackupRecord},
        diff::DiffEngine,
    },
    expand_selection,
    fetch::{Git2Fetcher, RepoCache},
    model::{CreatorSpec, DotfileSpec, Owner, ResolvedFileMap},
    path::{default_config_file, home_dir},
    repo::submodule::Materializer,
    RepositorySnapshot, Resolution,
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use ignore::WalkBuilder;
use indicatif::MultiProgress;
use inquire::{Confirm, Select};
use std::{
    ffi::OsStr,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::exit,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotpick [options] <dotpick-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load(default_config_file()?)?,
        };

        match self.command {
            Command::Classify(opts) => run_classify(opts),
            Command::Resolve(opts) => run_resolve(&config, opts),
            Command::Preview(opts) => run_preview(&config, opts),
            Command::Apply(opts) => run_apply(&config, opts),
            Command::Backups(opts) => run_backups(&config, opts),
            Command::Restore(opts) => run_restore(&config, opts),
            Command::Fetch(opts) => run_fetch(&config, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show layout of creator repository.
    #[command(override_usage = "dotpick classify [options] <repo>")]
    Classify(ClassifyOptions),

    /// Show which repository files back each logical path.
    #[command(override_usage = "dotpick resolve [options] <repo> <path>...")]
    Resolve(SelectionOptions),

    /// Show what deploying logical paths would change.
    #[command(override_usage = "dotpick preview [options] <repo> <path>...")]
    Preview(SelectionOptions),

    /// Deploy logical paths into home directory.
    #[command(override_usage = "dotpick apply [options] <repo> <path>...")]
    Apply(ApplyOptions),

    /// List recorded backups.
    #[command(override_usage = "dotpick backups [options] [<original>]")]
    Backups(BackupsOptions),

    /// Restore backup over original file.
    #[command(override_usage = "dotpick restore [options] <backup> <original>")]
    Restore(RestoreOptions),

    /// Clone or update creator repository in cache.
    #[command(override_usage = "dotpick fetch [options] <creator_id> <url>")]
    Fetch(FetchOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ClassifyOptions {
    /// Path to creator repository.
    #[arg(required = true, value_name = "repo")]
    pub repo: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct SelectionOptions {
    /// Path to creator repository.
    #[arg(required = true, value_name = "repo")]
    pub repo: PathBuf,

    /// Logical paths to resolve, e.g., `.config/nvim`.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<String>,

    /// Creator identifier to stamp backups with.
    #[arg(long, value_name = "creator_id", default_value = "local")]
    pub creator: String,

    /// Dotfile identifier to stamp backups with.
    #[arg(long, value_name = "dotfile_id", default_value = "dotfile")]
    pub dotfile: String,

    /// Never prompt for manual selection of unresolved paths.
    #[arg(long)]
    pub no_prompt: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    #[command(flatten)]
    pub selection: SelectionOptions,

    /// Deploy without asking for confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Restore backups of the whole batch if any file fails.
    #[arg(long)]
    pub rollback_on_failure: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BackupsOptions {
    /// Only list backups of this file.
    #[arg(value_name = "original")]
    pub original: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// Backup file to restore from.
    #[arg(required = true, value_name = "backup")]
    pub backup: PathBuf,

    /// File to restore over.
    #[arg(required = true, value_name = "original")]
    pub original: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FetchOptions {
    /// Identifier of creator to cache repository under.
    #[arg(required = true, value_name = "creator_id")]
    pub creator_id: String,

    /// URL of creator repository.
    #[arg(required = true, value_name = "url")]
    pub url: String,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_classify(opts: ClassifyOptions) -> Result<()> {
    let snapshot = RepositorySnapshot::inspect(opts.repo);
    println!("{}: {}", snapshot.root().display(), snapshot.layout());

    Ok(())
}

fn run_resolve(config: &Config, opts: SelectionOptions) -> Result<()> {
    let files = resolve_selection(config, &opts)?;
    for (source, target) in files.iter() {
        println!("{} -> {}", source.display(), target.display());
    }

    Ok(())
}

fn run_preview(config: &Config, opts: SelectionOptions) -> Result<()> {
    let files = resolve_selection(config, &opts)?;
    let engine = DiffEngine::new().with_preview_lines(config.settings.preview_lines);
    let preview = engine.preview(&files, home_dir()?);
    for (source, error) in preview.failures() {
        warn!("cannot preview {:?}: {error}", source.display());
    }

    for result in preview.diffs() {
        println!(
            "{} ({}, +{} -{})",
            result.target.display(),
            result.kind,
            result.additions,
            result.deletions
        );
        print!("{}", result.diff);
    }

    Ok(())
}

fn run_apply(config: &Config, opts: ApplyOptions) -> Result<()> {
    let files = resolve_selection(config, &opts.selection)?;
    let home = home_dir()?;
    let engine = DiffEngine::new().with_preview_lines(config.settings.preview_lines);
    let preview = engine.preview(&files, &home);
    for (source, error) in preview.failures() {
        warn!("skip {:?}: {error}", source.display());
    }

    // INVARIANT: Only deploy what could be previewed.
    let files = preview.readable();
    let changes = preview.changes();
    if changes == 0 {
        info!("nothing to deploy, every comparable target is up to date");
        return match preview.failures().count() {
            0 => Ok(()),
            unreadable => Err(anyhow!("{unreadable} file(s) could not be compared")),
        };
    }

    if !opts.yes {
        let proceed = Confirm::new(&format!("deploy {changes} changed file(s)?"))
            .with_default(false)
            .prompt()?;
        if !proceed {
            warn!("deployment aborted");
            return Ok(());
        }
    }

    let owner = Owner::new(&opts.selection.creator, &opts.selection.dotfile);
    let applier = Applier::new(
        &home,
        BackupManager::new(&config.settings.backup_dir, &home),
    );
    let report = applier.apply_multiple(&files, &owner);
    for outcome in report.failed() {
        warn!("{outcome}");
    }

    if opts.rollback_on_failure && report.failed().count() > 0 {
        warn!("rolling back batch");
        applier.rollback(report.outcomes())?;
    }

    report.into_result()?;

    let unreadable = preview.failures().count();
    if unreadable > 0 {
        return Err(anyhow!("{unreadable} file(s) could not be compared and were skipped"));
    }

    Ok(())
}

fn run_backups(config: &Config, opts: BackupsOptions) -> Result<()> {
    let backups = BackupManager::new(&config.settings.backup_dir, home_dir()?);
    let records = match opts.original {
        Some(original) => backups.list_backups(original),
        None => backups.list_all(),
    };

    if records.is_empty() {
        info!("no backups recorded");
    }

    for BackupRecord {
        original_path,
        backup_path,
        timestamp,
        creator_id,
        dotfile_id,
    } in records
    {
        println!(
            "{} {}/{} {} -> {}",
            timestamp.to_rfc3339(),
            creator_id,
            dotfile_id,
            original_path.display(),
            backup_path.display()
        );
    }

    Ok(())
}

fn run_restore(config: &Config, opts: RestoreOptions) -> Result<()> {
    let backups = BackupManager::new(&config.settings.backup_dir, home_dir()?);
    backups.restore(opts.backup, opts.original)?;

    Ok(())
}

async fn run_fetch(config: &Config, opts: FetchOptions) -> Result<()> {
    let cancel = CancellationToken::new();
    let fetcher = Git2Fetcher::new()
        .shallow(config.settings.shallow_clone)
        .interactive(std::io::stdin().is_terminal())
        .with_cancel(cancel.clone())
        .with_progress(MultiProgress::new());
    let cache = RepoCache::new(&config.settings.cache_dir, fetcher)
        .with_max_concurrent(config.settings.max_concurrent_fetches);

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelling fetch");
            cancel.cancel();
        }
    });

    let creator = CreatorSpec {
        id: opts.creator_id.clone(),
        name: opts.creator_id,
        repo: opts.url,
    };
    let result = cache.ensure_repos(std::slice::from_ref(&creator)).await;
    watcher.abort();

    for path in result? {
        info!("dotfiles of {} cached at {:?}", creator.name, path.display());
    }

    Ok(())
}

/// Resolve every logical path of a selection, one path at a time.
fn resolve_selection(config: &Config, opts: &SelectionOptions) -> Result<ResolvedFileMap> {
    let snapshot = RepositorySnapshot::inspect(&opts.repo);
    info!("{:?} looks {}", snapshot.root().display(), snapshot.layout());

    let fetcher = Git2Fetcher::new()
        .shallow(config.settings.shallow_clone)
        .interactive(std::io::stdin().is_terminal());
    let materializer =
        Materializer::new(fetcher).with_max_depth(config.settings.submodule_depth);
    let interactive = !opts.no_prompt && std::io::stdin().is_terminal();

    let mut files = ResolvedFileMap::new();
    for logical in &opts.paths {
        let spec = DotfileSpec {
            id: opts.dotfile.clone(),
            name: opts.dotfile.clone(),
            paths: vec![logical.clone()],
            ..Default::default()
        };

        match snapshot.resolve_dotfile_with(&spec, &materializer)? {
            Resolution::Resolved(resolved) => files.extend(resolved),
            Resolution::NotFound {
                requested,
                repo_root,
            } if interactive => {
                let selected = select_manually(&requested, &repo_root)?;
                files.extend(expand_selection(selected, &requested)?);
            }
            Resolution::NotFound { requested, .. } => {
                return Err(anyhow!("cannot locate {requested:?} in {:?}", snapshot.root().display()));
            }
        }
    }

    Ok(files)
}

/// Let the user pick which directory of the repository holds `logical`.
fn select_manually(logical: &str, root: &Path) -> Result<PathBuf> {
    let mut candidates = WalkBuilder::new(root)
        .standard_filters(false)
        .max_depth(Some(3))
        .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
        .build()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.depth() > 0)
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|path| path.display().to_string())
        })
        .collect::<Vec<_>>();
    candidates.sort();

    let choice = Select::new(
        &format!("could not locate {logical:?}, pick its location"),
        candidates,
    )
    .prompt()?;

    Ok(root.join(choice))
}
