// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shared domain types.
//!
//! Every stage of the pipeline speaks in terms of the types defined here:
//! classification produces a [`Layout`], resolution produces a
//! [`ResolvedFileMap`], and deployment stamps its work with an [`Owner`]. The
//! registry structures [`CreatorSpec`] and [`DotfileSpec`] arrive already
//! parsed from whatever registry the caller talks to.

use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map, BTreeMap},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Organizational convention of a dotfile repository.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Dotfiles sit directly at the repository root (`.vimrc`, `.bashrc`).
    Flat,

    /// One directory per package mirroring home (`nvim/.config/nvim`).
    PackageBased,

    /// A dotfile manager owns the root and renames files (`dot_vimrc`).
    ManagedSingleRoot,

    /// Everything lives under a single top-level `config` directory.
    SingleConfigDir,

    /// The root is a bare git directory meant for a work tree alias.
    BareWorktree,

    /// No recognizable convention.
    #[default]
    Unknown,
}

impl Display for Layout {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Flat => "flat",
            Self::PackageBased => "package-based",
            Self::ManagedSingleRoot => "managed single root",
            Self::SingleConfigDir => "single config directory",
            Self::BareWorktree => "bare work tree",
            Self::Unknown => "unknown",
        };
        fmt.write_str(name)
    }
}

/// Creator entry handed over by the registry.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CreatorSpec {
    /// Unique creator identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// URL of the creator's dotfile repository.
    pub repo: String,
}

/// Dotfile entry handed over by the registry.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DotfileSpec {
    /// Identifier, unique within a creator.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Brief description of the configuration.
    #[serde(default)]
    pub description: String,

    /// Logical paths that make up this dotfile, e.g., `.config/nvim`.
    pub paths: Vec<String>,

    /// Names of programs this dotfile expects to be installed.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Creator and dotfile a piece of deployment work belongs to.
#[derive(Default, Debug, PartialEq, Eq, Clone, Hash)]
pub struct Owner {
    pub creator_id: String,
    pub dotfile_id: String,
}

impl Owner {
    /// Construct new owner.
    pub fn new(creator_id: impl Into<String>, dotfile_id: impl Into<String>) -> Self {
        Self {
            creator_id: creator_id.into(),
            dotfile_id: dotfile_id.into(),
        }
    }
}

/// Mapping from absolute source files to logical target paths.
///
/// # Invariant
///
/// - Keys are unique absolute paths, so no two entries ever write the same
///   target through the same source.
/// - Iteration is ordered by source path.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ResolvedFileMap {
    files: BTreeMap<PathBuf, PathBuf>,
}

impl ResolvedFileMap {
    /// Construct new empty file map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map source file to logical target path.
    ///
    /// Returns the previous target if the source was already mapped.
    pub fn insert(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Option<PathBuf> {
        self.files.insert(source.into(), target.into())
    }

    /// Logical target of a source file.
    pub fn get(&self, source: impl AsRef<Path>) -> Option<&Path> {
        self.files.get(source.as_ref()).map(PathBuf::as_path)
    }

    /// Merge another file map into this one.
    pub fn extend(&mut self, other: ResolvedFileMap) {
        self.files.extend(other.files);
    }

    /// Iterate over `(source, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.files
            .iter()
            .map(|(source, target)| (source.as_path(), target.as_path()))
    }

    /// Number of mapped files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if no file is mapped.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl IntoIterator for ResolvedFileMap {
    type Item = (PathBuf, PathBuf);
    type IntoIter = btree_map::IntoIter<PathBuf, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<S, T> FromIterator<(S, T)> for ResolvedFileMap
where
    S: Into<PathBuf>,
    T: Into<PathBuf>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(source, target)| (source.into(), target.into()))
                .collect(),
        }
    }
}
