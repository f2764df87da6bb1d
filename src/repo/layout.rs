// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository layout classification.
//!
//! Dotfile repositories come in many shapes, and nothing inside them declares
//! which shape they are. Classification looks at weak structural signals at
//! the top-level of a checked-out repository to guess its convention.
//!
//! # Priority Cascade
//!
//! Layouts are __not__ mutually exclusive. A chezmoi repository may also
//! contain package-like directories, and a package-based repository may also
//! carry a `config` directory. Thus, classification is an ordered list of
//! `(predicate, layout)` rules where the first rule that holds wins:
//!
//! 1. [`Layout::ManagedSingleRoot`]: a `.chezmoi*` marker exists at the root.
//! 2. [`Layout::PackageBased`]: two or more package directories exist.
//! 3. [`Layout::SingleConfigDir`]: a `config` directory exists.
//! 4. [`Layout::Flat`]: a dot-prefixed entry exists that is not git metadata.
//! 5. [`Layout::BareWorktree`]: the root is itself a bare git directory.
//! 6. [`Layout::Unknown`]: nothing matched.
//!
//! Classification never fails. An unreadable root is simply
//! [`Layout::Unknown`].

use crate::model::Layout;

use std::{
    fs::{read_dir, DirEntry},
    path::Path,
};
use tracing::{debug, instrument};

/// Top-level directories that hold tooling instead of packages.
const NON_PACKAGE_DIRS: &[&str] = &["scripts", "bin"];

/// Dot-prefixed entries that belong to git rather than to the user.
const VCS_METADATA: &[&str] = &[".git", ".gitignore", ".github"];

/// Classification rules in priority order.
const RULES: &[(fn(&Path) -> bool, Layout)] = &[
    (has_manager_marker, Layout::ManagedSingleRoot),
    (has_package_dirs, Layout::PackageBased),
    (has_config_dir, Layout::SingleConfigDir),
    (has_root_dotfiles, Layout::Flat),
    (is_bare_gitdir, Layout::BareWorktree),
];

/// Classify organizational layout of repository at target root.
#[instrument(skip(root), level = "debug")]
pub fn classify(root: impl AsRef<Path>) -> Layout {
    let root = root.as_ref();
    let layout = RULES
        .iter()
        .find(|(holds, _)| holds(root))
        .map(|(_, layout)| *layout)
        .unwrap_or_default();
    debug!("classified {:?} as {layout}", root.display());

    layout
}

fn entries(dir: &Path) -> Vec<DirEntry> {
    read_dir(dir)
        .map(|iter| iter.filter_map(Result::ok).collect())
        .unwrap_or_default()
}

fn name_of(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

fn is_dir(entry: &DirEntry) -> bool {
    entry.path().is_dir()
}

fn has_manager_marker(root: &Path) -> bool {
    let pattern = format!(
        "{}/.chezmoi*",
        glob::Pattern::escape(root.to_string_lossy().as_ref())
    );
    glob::glob(&pattern)
        .map(|mut paths| paths.any(|path| path.is_ok()))
        .unwrap_or(false)
}

fn has_package_dirs(root: &Path) -> bool {
    let packages = entries(root)
        .iter()
        .filter(|entry| is_dir(entry))
        .filter(|entry| {
            let name = name_of(entry);
            !name.starts_with('.') && !NON_PACKAGE_DIRS.contains(&name.as_str())
        })
        .filter(|entry| looks_like_package(&entry.path()))
        .count();

    packages >= 2
}

fn looks_like_package(dir: &Path) -> bool {
    entries(dir).iter().any(|entry| {
        let name = name_of(entry);
        name.starts_with('.') || name.contains("config")
    })
}

fn has_config_dir(root: &Path) -> bool {
    root.join("config").is_dir()
}

fn has_root_dotfiles(root: &Path) -> bool {
    entries(root).iter().any(|entry| {
        let name = name_of(entry);
        name.starts_with('.') && !VCS_METADATA.contains(&name.as_str())
    })
}

fn is_bare_gitdir(root: &Path) -> bool {
    root.join("HEAD").is_file() && root.join("objects").is_dir() && root.join("refs").is_dir()
}
