// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile deployment.
//!
//! Deployment takes a [`ResolvedFileMap`] and writes it into the user's home.
//! Three pieces cooperate:
//!
//! - [`diff`]: preview what would change for each file.
//! - [`backup`]: snapshot anything about to be overwritten, and keep an index
//!   of every snapshot ever made.
//! - [`apply`]: back up, write, and repair on failure, one file at a time.
//!
//! Logical target paths are always interpreted relative to a home directory,
//! see [`target_path`].
//!
//! [`ResolvedFileMap`]: crate::model::ResolvedFileMap

pub mod apply;
pub mod backup;
pub mod diff;

#[cfg(not(unix))]
use std::fs::canonicalize;
use std::{
    fs::{copy, metadata, set_permissions},
    io,
    path::{Component, Path, PathBuf},
};

/// Resolve logical target path against `home`.
///
/// A leading `~` component stands for `home` itself. Absolute paths are taken
/// verbatim. Everything else, including paths with a leading `.`, is relative
/// to `home`.
pub fn target_path(home: impl AsRef<Path>, relative: impl AsRef<Path>) -> PathBuf {
    let home = home.as_ref();
    let relative = relative.as_ref();

    let mut components = relative.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => home.join(components.as_path()),
        _ if relative.is_absolute() => relative.to_path_buf(),
        _ => home.join(relative),
    }
}

/// Check if `a` and `b` name the same file on disk.
///
/// Hard links and symlinks count as the same file. Paths that do not exist
/// never match.
#[cfg(unix)]
pub(crate) fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (metadata(a), metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn is_same_file(a: &Path, b: &Path) -> bool {
    match (canonicalize(a), canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy bytes and permission bits of `from` over `to`.
pub(crate) fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    copy(from, to)?;
    set_permissions(to, metadata(from)?.permissions())
}
