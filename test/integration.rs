// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_tree, RepoFixture, RepoKind};

use dotpick::{
    deploy::{
        apply::{Applier, ApplyState},
        backup::BackupManager,
        diff::{preview, DiffKind},
    },
    fetch::{Git2Fetcher, RepoCache},
    model::{CreatorSpec, DotfileSpec, Layout, Owner},
    repo::submodule::{EntryOutcome, Materializer, ResolvedBy},
    RepositorySnapshot, Resolution,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::PathBuf,
};

fn dotfile(id: &str, paths: &[&str]) -> DotfileSpec {
    DotfileSpec {
        id: id.into(),
        name: id.into(),
        paths: paths.iter().map(|path| path.to_string()).collect(),
        ..Default::default()
    }
}

fn local_fetcher() -> Git2Fetcher {
    // INVARIANT: Local transport does not support shallow fetches.
    Git2Fetcher::new().shallow(false)
}

#[tokio::test]
async fn fetch_resolve_preview_apply_rollback() -> Result<()> {
    let origin_dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(origin_dir.path(), RepoKind::Bare)?;
    origin.stage_and_commit("nvim/.config/nvim/init.lua", "vim.o.number = true\n")?;
    origin.stage_and_commit("nvim/.config/nvim/lua/keys.lua", "-- keys\n")?;
    origin.stage_and_commit("tmux/.tmux.conf", "set -g mouse on\n")?;

    let cache_dir = tempfile::tempdir()?;
    let cache = RepoCache::new(cache_dir.path(), local_fetcher());
    let creator = CreatorSpec {
        id: "tj".into(),
        name: "TJ".into(),
        repo: origin.url(),
    };
    let paths = cache.ensure_repos(std::slice::from_ref(&creator)).await?;
    assert_eq!(paths, vec![cache.repo_path("tj")]);
    assert!(cache.is_cached("tj"));

    let snapshot = RepositorySnapshot::inspect(cache.repo_path("tj"));
    assert_eq!(snapshot.layout(), Layout::PackageBased);

    let spec = dotfile("setup", &[".config/nvim", ".tmux.conf"]);
    let files = match snapshot.resolve_dotfile(&spec)? {
        Resolution::Resolved(files) => files,
        other => panic!("expected resolved files, got {other:?}"),
    };
    assert_eq!(files.len(), 3);

    let home = tempfile::tempdir()?;
    write(home.path().join(".tmux.conf"), "set -g mouse off\n")?;

    let preview = preview(&files, home.path());
    assert_eq!(preview.failures().count(), 0);
    let diffs = preview.diffs().collect::<Vec<_>>();
    let kinds = diffs
        .iter()
        .map(|result| (result.target.clone(), result.kind))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            (home.path().join(".config/nvim/init.lua"), DiffKind::New),
            (home.path().join(".config/nvim/lua/keys.lua"), DiffKind::New),
            (home.path().join(".tmux.conf"), DiffKind::Modified),
        ]
    );
    assert_eq!(diffs[2].diff, "- set -g mouse off\n+ set -g mouse on\n");

    let backups_dir = tempfile::tempdir()?;
    let applier = Applier::new(
        home.path(),
        BackupManager::new(backups_dir.path(), home.path()),
    );
    let owner = Owner::new("tj", "setup");
    let report = applier.apply_multiple(&files, &owner);
    assert_eq!(report.succeeded().count(), 3);
    assert_eq!(
        read_to_string(home.path().join(".config/nvim/init.lua"))?,
        "vim.o.number = true\n"
    );
    assert_eq!(
        read_to_string(home.path().join(".tmux.conf"))?,
        "set -g mouse on\n"
    );

    let records = applier
        .backups()
        .list_backups(home.path().join(".tmux.conf"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].creator_id, "tj");
    assert_eq!(records[0].dotfile_id, "setup");

    applier.rollback(report.outcomes())?;
    assert_eq!(
        read_to_string(home.path().join(".tmux.conf"))?,
        "set -g mouse off\n"
    );

    Ok(())
}

#[test]
fn ensure_repo_pulls_new_commits() -> Result<()> {
    let origin_dir = tempfile::tempdir()?;
    let origin = RepoFixture::new(origin_dir.path(), RepoKind::Bare)?;
    origin.stage_and_commit(".vimrc", "set number\n")?;

    let cache_dir = tempfile::tempdir()?;
    let cache = RepoCache::new(cache_dir.path(), local_fetcher());
    let creator = CreatorSpec {
        id: "prime".into(),
        name: "Prime".into(),
        repo: origin.url(),
    };

    let path = cache.ensure_repo(&creator)?;
    assert!(!path.join(".bashrc").exists());

    origin.stage_and_commit(".bashrc", "set -o vi\n")?;
    let path = cache.ensure_repo(&creator)?;
    assert_eq!(read_to_string(path.join(".bashrc"))?, "set -o vi\n");
    assert_eq!(read_to_string(path.join(".vimrc"))?, "set number\n");

    assert_eq!(cache.cached_creators()?, vec!["prime".to_string()]);
    cache.clear_creator("prime")?;
    assert!(!cache.is_cached("prime"));

    Ok(())
}

#[test]
fn resolve_materializes_submodule_from_remote() -> Result<()> {
    let nvim_dir = tempfile::tempdir()?;
    let nvim = RepoFixture::new(nvim_dir.path(), RepoKind::Normal)?;
    nvim.stage_and_commit("init.lua", "require('config')\n")?;
    nvim.stage_and_commit("lua/config.lua", "vim.o.wrap = false\n")?;

    let creator = tempfile::tempdir()?;
    let gitmodules = format!(
        "[submodule \"nvim\"]\n\tpath = .config/nvim\n\turl = {}\n",
        nvim.url()
    );
    write_tree(
        creator.path(),
        [
            (".gitmodules", gitmodules.as_str()),
            (".config/nvim/.git", "gitdir: ../../.git/modules/nvim\n"),
            (".bashrc", "export EDITOR=nvim\n"),
        ],
    )?;

    let snapshot = RepositorySnapshot::inspect(creator.path());
    assert_eq!(snapshot.layout(), Layout::Flat);

    let materializer = Materializer::new(local_fetcher()).with_max_depth(3);
    let spec = dotfile("nvim", &[".config/nvim"]);
    let result = snapshot.resolve_dotfile_with(&spec, &materializer)?;
    let files = match result {
        Resolution::Resolved(files) => files,
        other => panic!("expected resolved files, got {other:?}"),
    };

    let targets = files
        .iter()
        .map(|(_, target)| target.to_path_buf())
        .collect::<Vec<_>>();
    assert_eq!(
        targets,
        vec![
            PathBuf::from(".config/nvim/init.lua"),
            PathBuf::from(".config/nvim/lua/config.lua"),
        ]
    );

    // Already populated now, so nothing gets cloned twice.
    let report = materializer.materialize(creator.path(), 3)?;
    assert_eq!(
        report.entries[0].outcome,
        EntryOutcome::Resolved(ResolvedBy::AlreadyPresent)
    );

    Ok(())
}

#[test]
fn failed_entry_in_batch_does_not_stop_others() -> Result<()> {
    let repo = tempfile::tempdir()?;
    write_tree(repo.path(), [(".a", "a"), (".b", "b"), (".c", "c")])?;
    let home = tempfile::tempdir()?;
    create_dir_all(home.path())?;
    write(home.path().join("blocked"), "")?;

    let files = dotpick::ResolvedFileMap::from_iter([
        (repo.path().join(".a"), ".a"),
        (repo.path().join(".b"), "blocked/.b"),
        (repo.path().join(".c"), ".config/.c"),
    ]);
    let backups = tempfile::tempdir()?;
    let applier = Applier::new(
        home.path(),
        BackupManager::new(backups.path(), home.path()),
    );
    let report = applier.apply_multiple(&files, &Owner::new("me", "abc"));

    let states = report
        .outcomes()
        .iter()
        .map(|outcome| outcome.state)
        .collect::<Vec<_>>();
    assert_eq!(
        states,
        vec![ApplyState::Succeeded, ApplyState::Failed, ApplyState::Succeeded]
    );
    assert!(report.into_result().is_err());

    Ok(())
}
