// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Logical path resolution.
//!
//! Registry entries name dotfiles by where they belong in the user's home,
//! e.g., `.config/nvim`. Creator repositories rarely store them there. This
//! module maps a logical path onto the real file or directory inside a
//! checked-out repository.
//!
//! # Resolution Order
//!
//! Each step short-circuits on its first hit:
//!
//! 1. Exact join of the repository root and the logical path.
//! 2. Basename with its leading dot stripped, directly under the root. Many
//!    flat repositories store `.tmux.conf` as `tmux.conf`.
//! 3. Alias substitution: `.config` becomes `xdg_config` or `config`, and `~`
//!    becomes `home`.
//! 4. Layout-specific search, see [`Layout`].
//!
//! Logical paths that are absolute or climb out with `..` never resolve, and
//! neither do candidates whose real location lies outside the repository.
//!
//! No hit means the caller should hand control to a human to pick the
//! directory manually. It is never a hard error.

use crate::{model::Layout, path::is_confined};

use std::{
    fs::{canonicalize, read_dir},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Alias groups tried in order against the logical path.
const ALIASES: &[(&str, &[&str])] = &[(".config", &["xdg_config", "config"]), ("~", &["home"])];

/// Storage prefix the managed layout uses in place of a leading dot.
const MANAGED_DOT_PREFIX: &str = "dot_";

/// Resolve logical path to a real path inside the repository at `root`.
///
/// Accepts both file and directory targets. Returns `None` if no location
/// could be found.
#[instrument(skip(root, logical), level = "debug")]
pub fn resolve(root: impl AsRef<Path>, logical: impl AsRef<str>, layout: Layout) -> Option<PathBuf> {
    let root = root.as_ref();
    let logical = logical.as_ref();

    if !is_confined(logical) {
        debug!("refuse to resolve {logical:?} outside of {:?}", root.display());
        return None;
    }

    let found = exact(root, logical)
        .or_else(|| without_leading_dot(root, logical))
        .or_else(|| aliased(root, logical))
        .or_else(|| by_layout(root, logical, layout));

    match &found {
        Some(path) => debug!("resolved {logical:?} to {:?}", path.display()),
        None => debug!("could not resolve {logical:?} in {:?}", root.display()),
    }

    found
}

fn exact(root: &Path, logical: &str) -> Option<PathBuf> {
    existing(root, root.join(logical))
}

fn without_leading_dot(root: &Path, logical: &str) -> Option<PathBuf> {
    let base = Path::new(logical).file_name()?.to_str()?;
    let stripped = base.strip_prefix('.')?;
    if stripped.is_empty() {
        return None;
    }

    existing(root, root.join(stripped))
}

fn aliased(root: &Path, logical: &str) -> Option<PathBuf> {
    ALIASES
        .iter()
        .filter(|(pattern, _)| logical.contains(pattern))
        .flat_map(|(pattern, replacements)| {
            replacements
                .iter()
                .map(move |replacement| logical.replacen(pattern, replacement, 1))
        })
        .find_map(|candidate| exact(root, &candidate))
}

fn by_layout(root: &Path, logical: &str, layout: Layout) -> Option<PathBuf> {
    match layout {
        Layout::PackageBased => in_packages(root, logical),
        Layout::ManagedSingleRoot => in_managed_root(root, logical),
        Layout::SingleConfigDir => existing(root, root.join("config").join(logical)),
        Layout::Flat | Layout::BareWorktree | Layout::Unknown => None,
    }
}

fn in_packages(root: &Path, logical: &str) -> Option<PathBuf> {
    let mut packages = read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();

    // INVARIANT: Directory listing order is platform dependent, so fix it.
    packages.sort();

    packages
        .into_iter()
        .find_map(|package| existing(root, package.join(logical)))
}

fn in_managed_root(root: &Path, logical: &str) -> Option<PathBuf> {
    let logical = Path::new(logical);
    let base = logical.file_name()?.to_str()?;
    let stripped = base.strip_prefix('.')?;
    let managed = logical.with_file_name(format!("{MANAGED_DOT_PREFIX}{stripped}"));

    let path = root.join(managed);
    existing(root, path).filter(|path| path.is_file())
}

fn existing(root: &Path, path: PathBuf) -> Option<PathBuf> {
    // INVARIANT: Symlinks may not lead a candidate out of the repository.
    let real = canonicalize(&path).ok()?;
    let root = canonicalize(root).ok()?;
    real.starts_with(root).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{layout::classify, tests::repo_fixture};
    use simple_test_case::test_case;

    #[test]
    fn resolve_flat_root_file() -> anyhow::Result<()> {
        let root = repo_fixture([(".tmux.conf", "set -g mouse on\n"), (".bashrc", "")])?;
        let layout = classify(root.path());
        assert_eq!(layout, Layout::Flat);

        let result = resolve(root.path(), ".tmux.conf", layout);
        assert_eq!(result, Some(root.path().join(".tmux.conf")));

        Ok(())
    }

    #[test]
    fn resolve_strips_leading_dot_at_root() -> anyhow::Result<()> {
        let root = repo_fixture([("tmux.conf", ""), ("README.md", "")])?;

        let result = resolve(root.path(), ".tmux.conf", Layout::Unknown);
        assert_eq!(result, Some(root.path().join("tmux.conf")));

        Ok(())
    }

    #[test_case(".config/nvim", "xdg_config/nvim/init.lua", "xdg_config/nvim"; "xdg config alias")]
    #[test_case(".config/kitty/kitty.conf", "config/kitty/kitty.conf", "config/kitty/kitty.conf"; "config alias")]
    #[test_case("~/.bashrc", "home/.bashrc", "home/.bashrc"; "home alias")]
    #[test]
    fn resolve_aliases(logical: &str, stored: &str, expect: &str) {
        let root = repo_fixture([(stored, "")]).unwrap();
        let result = resolve(root.path(), logical, Layout::Unknown);
        assert_eq!(result, Some(root.path().join(expect)));
    }

    #[test]
    fn resolve_prefers_first_alias_candidate() -> anyhow::Result<()> {
        let root = repo_fixture([("xdg_config/nvim/init.lua", ""), ("config/nvim/init.lua", "")])?;

        let result = resolve(root.path(), ".config/nvim", Layout::SingleConfigDir);
        assert_eq!(result, Some(root.path().join("xdg_config/nvim")));

        Ok(())
    }

    #[test]
    fn resolve_package_directory() -> anyhow::Result<()> {
        let root = repo_fixture([
            ("nvim/.config/nvim/init.lua", "-- test"),
            ("tmux/.tmux.conf", "# test"),
        ])?;
        let layout = classify(root.path());
        assert_eq!(layout, Layout::PackageBased);

        let result = resolve(root.path(), ".config/nvim", layout);
        let expect = root.path().join("nvim/.config/nvim");
        assert_eq!(result, Some(expect.clone()));
        assert!(expect.is_dir());

        let result = resolve(root.path(), ".tmux.conf", layout);
        assert_eq!(result, Some(root.path().join("tmux/.tmux.conf")));

        Ok(())
    }

    #[test]
    fn resolve_managed_dot_prefix() -> anyhow::Result<()> {
        let root = repo_fixture([
            (".chezmoiroot", ""),
            ("dot_vimrc", "set number\n"),
            ("dot_config/git/dot_gitconfig", ""),
        ])?;
        let layout = classify(root.path());
        assert_eq!(layout, Layout::ManagedSingleRoot);

        let result = resolve(root.path(), ".vimrc", layout);
        assert_eq!(result, Some(root.path().join("dot_vimrc")));

        let result = resolve(root.path(), "dot_config/git/.gitconfig", layout);
        assert_eq!(result, Some(root.path().join("dot_config/git/dot_gitconfig")));

        Ok(())
    }

    #[test]
    fn resolve_single_config_dir() -> anyhow::Result<()> {
        let root = repo_fixture([("config/alacritty/alacritty.toml", "")])?;
        let layout = classify(root.path());
        assert_eq!(layout, Layout::SingleConfigDir);

        let result = resolve(root.path(), "alacritty", layout);
        assert_eq!(result, Some(root.path().join("config/alacritty")));

        Ok(())
    }

    #[test]
    fn resolve_missing_path_is_none() -> anyhow::Result<()> {
        let root = repo_fixture([(".vimrc", "")])?;

        let result = resolve(root.path(), ".config/helix", Layout::Flat);
        assert_eq!(result, None);

        Ok(())
    }

    #[test]
    fn resolve_refuses_paths_outside_root() -> anyhow::Result<()> {
        let root = repo_fixture([(".vimrc", "")])?;
        let outside = repo_fixture([("secret", "hunter2")])?;
        let secret = outside.path().join("secret");

        let absolute = secret.to_string_lossy().into_owned();
        assert_eq!(resolve(root.path(), absolute, Layout::Flat), None);

        let name = outside.path().file_name().map(|name| name.to_string_lossy().into_owned());
        let climbing = format!("../{}/secret", name.unwrap_or_default());
        assert_eq!(resolve(root.path(), climbing, Layout::Flat), None);

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn resolve_ignores_symlink_leading_outside_root() -> anyhow::Result<()> {
        let root = repo_fixture([(".vimrc", "")])?;
        let outside = repo_fixture([("secret", "hunter2")])?;
        std::os::unix::fs::symlink(outside.path().join("secret"), root.path().join(".netrc"))?;

        assert_eq!(resolve(root.path(), ".netrc", Layout::Flat), None);
        assert_eq!(
            resolve(root.path(), ".vimrc", Layout::Flat),
            Some(root.path().join(".vimrc"))
        );

        Ok(())
    }
}
