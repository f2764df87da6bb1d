// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Creator repository inspection.
//!
//! A [`RepositorySnapshot`] is a checked-out creator repository paired with
//! its classified [`Layout`]. It turns registry entries into a
//! [`ResolvedFileMap`] of concrete files ready for deployment.
//!
//! # Directory Expansion
//!
//! A logical path may resolve to a directory. In that case every regular file
//! below it is mapped individually, keeping its position relative to the
//! directory, and any `.git` entry is skipped. Symlinks are followed only
//! while they stay inside the repository, and symlink cycles are skipped.
//! A directory holding no files at
//! all usually means an unpopulated submodule. Then submodule materialization
//! runs at the repository root, and the directory is walked once more.
//!
//! # Manual Selection
//!
//! When resolution comes up empty, the caller gets
//! [`Resolution::NotFound`] along with the repository root, so a human can
//! pick the right directory. [`expand_selection`] maps that choice just like
//! an automatic hit.

pub mod layout;
pub mod resolve;
pub mod submodule;

use crate::{
    fetch::Fetch,
    model::{DotfileSpec, Layout, ResolvedFileMap},
    repo::submodule::Materializer,
};

use ignore::WalkBuilder;
use std::{
    ffi::OsStr,
    fs::canonicalize,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Name of git metadata entries skipped during expansion.
const VCS_DIR: &str = ".git";

/// Checked-out creator repository with its classified layout.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RepositorySnapshot {
    root: PathBuf,
    layout: Layout,
}

impl RepositorySnapshot {
    /// Inspect repository at `root`, classifying its layout.
    pub fn inspect(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        let layout = layout::classify(&root);
        Self { root, layout }
    }

    /// Root of the checkout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classified layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Resolve single logical path to a real path in this repository.
    pub fn resolve(&self, logical: impl AsRef<str>) -> Option<PathBuf> {
        resolve::resolve(&self.root, logical, self.layout)
    }

    /// Resolve every logical path of a dotfile without touching submodules.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Walk`] if a resolved directory cannot be walked.
    #[instrument(skip(self, spec), fields(dotfile = %spec.id), level = "debug")]
    pub fn resolve_dotfile(&self, spec: &DotfileSpec) -> Result<Resolution> {
        self.resolve_paths(spec, || false)
    }

    /// Resolve every logical path of a dotfile, materializing submodules if
    /// a resolved directory turns out empty.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Walk`] if a resolved directory cannot be walked.
    #[instrument(skip(self, spec, materializer), fields(dotfile = %spec.id), level = "debug")]
    pub fn resolve_dotfile_with<F>(
        &self,
        spec: &DotfileSpec,
        materializer: &Materializer<F>,
    ) -> Result<Resolution>
    where
        F: Fetch,
    {
        self.resolve_paths(spec, || {
            match materializer.materialize_default(&self.root) {
                Ok(report) => {
                    info!("materialized {} submodule(s)", report.cloned());
                    true
                }
                Err(error) => {
                    warn!("submodule materialization failed: {error}");
                    false
                }
            }
        })
    }

    fn resolve_paths(
        &self,
        spec: &DotfileSpec,
        mut materialize: impl FnMut() -> bool,
    ) -> Result<Resolution> {
        let mut files = ResolvedFileMap::new();
        let mut materialized = false;

        for logical in &spec.paths {
            let Some(source) = self.resolve(logical) else {
                return Ok(self.not_found(logical));
            };

            let mut found = expand_into(&self.root, &source, logical, &mut files)?;
            if found == 0 && source.is_dir() && !materialized {
                debug!("{:?} has no files, trying submodules", source.display());
                materialized = true;
                if materialize() {
                    found = expand_into(&self.root, &source, logical, &mut files)?;
                }
            }

            if found == 0 {
                return Ok(self.not_found(logical));
            }
        }

        Ok(Resolution::Resolved(files))
    }

    fn not_found(&self, logical: &str) -> Resolution {
        debug!("could not resolve {logical:?}");
        Resolution::NotFound {
            requested: logical.to_string(),
            repo_root: self.root.clone(),
        }
    }
}

/// Result of resolving a dotfile against a repository.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Resolution {
    /// Every logical path produced at least one file.
    Resolved(ResolvedFileMap),

    /// A logical path could not be located. Manual selection needed.
    NotFound {
        requested: String,
        repo_root: PathBuf,
    },
}

/// Map a manually selected file or directory onto a logical path.
///
/// # Errors
///
/// - Return [`RepoError::Walk`] if the selected directory cannot be walked.
/// - Return [`RepoError::EmptySelection`] if the selection holds no files.
pub fn expand_selection(
    selected: impl AsRef<Path>,
    logical: impl AsRef<str>,
) -> Result<ResolvedFileMap> {
    let selected = selected.as_ref();
    let mut files = ResolvedFileMap::new();
    if expand_into(selected, selected, logical.as_ref(), &mut files)? == 0 {
        return Err(RepoError::EmptySelection {
            path: selected.to_path_buf(),
        });
    }

    Ok(files)
}

/// Map `source` onto `logical` inside `files`, returning number of files
/// added.
///
/// Nothing whose real location falls outside of `boundary` gets mapped.
fn expand_into(
    boundary: &Path,
    source: &Path,
    logical: &str,
    files: &mut ResolvedFileMap,
) -> Result<usize> {
    let Ok(boundary) = canonicalize(boundary) else {
        return Ok(0);
    };

    if !source.is_dir() {
        if !source.is_file() || !is_within(&boundary, source) {
            return Ok(0);
        }
        files.insert(source, logical);
        return Ok(1);
    }

    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            entry.file_name() != OsStr::new(VCS_DIR) && is_within(&boundary, entry.path())
        })
        .build();

    let mut count = 0;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_loop(&err) => {
                warn!("skip symlink cycle: {err}");
                continue;
            }
            Err(err) => {
                return Err(RepoError::Walk {
                    source: err,
                    path: source.to_path_buf(),
                })
            }
        };

        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        files.insert(entry.path(), Path::new(logical).join(relative));
        count += 1;
    }

    Ok(count)
}

fn is_within(boundary: &Path, path: &Path) -> bool {
    canonicalize(path).is_ok_and(|real| real.starts_with(boundary))
}

fn is_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop(err),
        _ => false,
    }
}

/// Repository inspection error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Directory walk failed.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Manual selection contains no files.
    #[error("selection {:?} contains no files", path.display())]
    EmptySelection { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        fetch::{FetchError, Result as FetchResult},
        repo::submodule::Materializer,
    };
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use tempfile::TempDir;

    /// Lay out a fake repository from `(path, contents)` pairs.
    pub(crate) fn repo_fixture<'a>(
        files: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> anyhow::Result<TempDir> {
        let root = tempfile::tempdir()?;
        for (path, contents) in files {
            let path = root.path().join(path);
            if let Some(parent) = path.parent() {
                mkdirp::mkdirp(parent)?;
            }
            write(path, contents)?;
        }

        Ok(root)
    }

    fn dotfile(paths: &[&str]) -> DotfileSpec {
        DotfileSpec {
            id: "nvim".into(),
            name: "Neovim".into(),
            paths: paths.iter().map(|path| path.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fetcher that drops a single file into every clone.
    #[derive(Debug, Default)]
    struct StaticFetcher;

    impl Fetch for StaticFetcher {
        fn clone_repo(&self, url: &str, into: &Path) -> FetchResult<()> {
            if url.contains("missing") {
                return Err(FetchError::from(git2::Error::from_str("not found")));
            }
            create_dir_all(into.join(".git")).unwrap();
            write(into.join("init.lua"), "-- from submodule").unwrap();
            Ok(())
        }

        fn pull_repo(&self, _: &Path) -> FetchResult<()> {
            Ok(())
        }
    }

    #[test]
    fn resolve_dotfile_expands_directories() -> anyhow::Result<()> {
        let root = repo_fixture([
            ("nvim/.config/nvim/init.lua", "-- init"),
            ("nvim/.config/nvim/lua/plugins.lua", "-- plugins"),
            ("nvim/.config/nvim/.git", "gitdir: ../.git/modules/nvim\n"),
            ("tmux/.tmux.conf", "# tmux"),
        ])?;
        let snapshot = RepositorySnapshot::inspect(root.path());
        assert_eq!(snapshot.layout(), Layout::PackageBased);

        let result = snapshot.resolve_dotfile(&dotfile(&[".config/nvim", ".tmux.conf"]))?;
        let package = root.path().join("nvim/.config/nvim");
        let expect = Resolution::Resolved(ResolvedFileMap::from_iter([
            (package.join("init.lua"), PathBuf::from(".config/nvim/init.lua")),
            (
                package.join("lua/plugins.lua"),
                PathBuf::from(".config/nvim/lua/plugins.lua"),
            ),
            (
                root.path().join("tmux/.tmux.conf"),
                PathBuf::from(".tmux.conf"),
            ),
        ]));
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_dotfile_reports_missing_path() -> anyhow::Result<()> {
        let root = repo_fixture([(".vimrc", "")])?;
        let snapshot = RepositorySnapshot::inspect(root.path());

        let result = snapshot.resolve_dotfile(&dotfile(&[".vimrc", ".config/helix"]))?;
        let expect = Resolution::NotFound {
            requested: ".config/helix".into(),
            repo_root: snapshot.root().to_path_buf(),
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_dotfile_materializes_empty_submodule() -> anyhow::Result<()> {
        let root = repo_fixture([
            (
                ".gitmodules",
                "[submodule \"nvim\"]\n\tpath = .config/nvim\n\turl = https://example.com/nvim\n",
            ),
            (".config/nvim/.git", "gitdir: ../../.git/modules/nvim\n"),
            (".bashrc", ""),
        ])?;
        let snapshot = RepositorySnapshot::inspect(root.path());
        let materializer = Materializer::new(StaticFetcher);

        let without = snapshot.resolve_dotfile(&dotfile(&[".config/nvim"]))?;
        assert!(matches!(without, Resolution::NotFound { .. }));

        let result = snapshot.resolve_dotfile_with(&dotfile(&[".config/nvim"]), &materializer)?;
        let expect = Resolution::Resolved(ResolvedFileMap::from_iter([(
            root.path().join(".config/nvim/init.lua"),
            PathBuf::from(".config/nvim/init.lua"),
        )]));
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_dotfile_gives_up_when_materialization_fails() -> anyhow::Result<()> {
        let root = repo_fixture([
            (
                ".gitmodules",
                "[submodule \"nvim\"]\npath = .config/nvim\nurl = https://example.com/missing\n",
            ),
            (".config/nvim/.git", "gitdir: ../../.git/modules/nvim\n"),
        ])?;
        let snapshot = RepositorySnapshot::inspect(root.path());
        let materializer = Materializer::new(StaticFetcher);

        let result = snapshot.resolve_dotfile_with(&dotfile(&[".config/nvim"]), &materializer)?;
        assert!(matches!(
            result,
            Resolution::NotFound { requested, .. } if requested == ".config/nvim"
        ));

        Ok(())
    }

    #[test]
    fn expand_manual_selection() -> anyhow::Result<()> {
        let root = repo_fixture([
            ("stuff/editor/init.vim", "set nu"),
            ("stuff/editor/ftplugin/rs.vim", ""),
        ])?;

        let result = expand_selection(root.path().join("stuff/editor"), ".config/nvim")?;
        let expect = ResolvedFileMap::from_iter([
            (
                root.path().join("stuff/editor/ftplugin/rs.vim"),
                PathBuf::from(".config/nvim/ftplugin/rs.vim"),
            ),
            (
                root.path().join("stuff/editor/init.vim"),
                PathBuf::from(".config/nvim/init.vim"),
            ),
        ]);
        assert_eq!(result, expect);

        let result = expand_selection(root.path().join("nothing"), ".config/nvim");
        assert!(matches!(result, Err(RepoError::EmptySelection { .. })));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn expansion_stays_inside_repository() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;

        let root = repo_fixture([
            ("nvim/.config/nvim/init.lua", "-- init"),
            ("nvim/.config/nvim/lua/keys.lua", "-- keys"),
        ])?;
        let outside = repo_fixture([("secret/id_ed25519", "private")])?;
        let nvim = root.path().join("nvim/.config/nvim");
        symlink(outside.path().join("secret"), nvim.join("stolen"))?;
        symlink(&nvim, nvim.join("lua/loop"))?;
        symlink(nvim.join("init.lua"), nvim.join("linked.lua"))?;

        let snapshot = RepositorySnapshot::inspect(root.path());
        let result = snapshot.resolve_dotfile(&dotfile(&[".config/nvim"]))?;
        let expect = Resolution::Resolved(ResolvedFileMap::from_iter([
            (nvim.join("init.lua"), PathBuf::from(".config/nvim/init.lua")),
            (nvim.join("linked.lua"), PathBuf::from(".config/nvim/linked.lua")),
            (nvim.join("lua/keys.lua"), PathBuf::from(".config/nvim/lua/keys.lua")),
        ]));
        assert_eq!(result, expect);

        Ok(())
    }
}
