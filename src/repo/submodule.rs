// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Submodule materialization.
//!
//! A plain clone leaves every submodule of a creator repository as an empty
//! directory, or as a directory holding nothing but a `.git` link file. If a
//! dotfile lives inside one of those, path resolution finds nothing to deploy.
//! The [`Materializer`] reads the `.gitmodules` descriptor at a repository
//! root and clones each unpopulated submodule into place.
//!
//! # Anonymous Access
//!
//! Creators often register submodules with SSH URLs, which cannot be cloned
//! without keys. Each clone first tries the HTTPS form of the URL, then falls
//! back to the URL as written.
//!
//! # Partial Success
//!
//! A broken submodule should not sink the dotfiles that live elsewhere in the
//! repository. Materialization at a level fails only when that level had
//! entries and none of them resolved. Every entry's outcome is kept in a
//! [`MaterializeReport`], nested submodules included.

use crate::{fetch::Fetch, path::is_confined};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read, read_dir, read_to_string, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Name of submodule descriptor at repository root.
pub const GITMODULES: &str = ".gitmodules";

/// Default nesting depth for recursive materialization.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Single entry of a `.gitmodules` descriptor.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct SubmoduleConfig {
    /// Relative path of the submodule inside its parent repository.
    pub path: String,

    /// Remote URL as written in the descriptor.
    pub url: String,
}

impl SubmoduleConfig {
    /// Construct new submodule entry.
    pub fn new(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
        }
    }

    /// URLs to try in order when cloning this submodule.
    ///
    /// The HTTPS form comes first. The original URL follows only if it
    /// differs.
    pub fn candidate_urls(&self) -> Vec<String> {
        let https = https_url(&self.url);
        if https == self.url {
            vec![https]
        } else {
            vec![https, self.url.clone()]
        }
    }

    fn escapes_root(&self) -> bool {
        !is_confined(&self.path)
    }
}

/// Parsed `.gitmodules` descriptor.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Gitmodules {
    entries: Vec<SubmoduleConfig>,
}

impl Gitmodules {
    /// Read descriptor at root of repository.
    ///
    /// A missing descriptor is just an empty set of submodules.
    ///
    /// # Errors
    ///
    /// - Return [`SubmoduleError::ReadDescriptor`] if the descriptor exists
    ///   but cannot be read.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(GITMODULES);
        match read_to_string(&path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(SubmoduleError::ReadDescriptor { source: err, path }),
        }
    }

    /// Iterate over submodule entries in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = &SubmoduleConfig> {
        self.entries.iter()
    }

    /// Number of submodule entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if descriptor has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Gitmodules {
    type Err = SubmoduleError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        let mut current: Option<PartialEntry> = None;

        for line in data.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                if let Some(entry) = current.take() {
                    entries.extend(entry.finish());
                }
                current = line
                    .starts_with("[submodule")
                    .then(|| PartialEntry::named(line));
                continue;
            }

            let Some(entry) = current.as_mut() else {
                continue;
            };

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            let value = unquote(value.trim());
            match key.trim() {
                "path" => entry.path = Some(value.to_string()),
                "url" => entry.url = Some(value.to_string()),
                _ => (),
            }
        }

        if let Some(entry) = current.take() {
            entries.extend(entry.finish());
        }

        Ok(Self { entries })
    }
}

impl FromIterator<SubmoduleConfig> for Gitmodules {
    fn from_iter<I: IntoIterator<Item = SubmoduleConfig>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Default)]
struct PartialEntry {
    header: String,
    path: Option<String>,
    url: Option<String>,
}

impl PartialEntry {
    fn named(header: &str) -> Self {
        Self {
            header: header.to_string(),
            ..Default::default()
        }
    }

    fn finish(self) -> Option<SubmoduleConfig> {
        match (self.path, self.url) {
            (Some(path), Some(url)) if !path.is_empty() && !url.is_empty() => {
                Some(SubmoduleConfig { path, url })
            }
            _ => {
                warn!("dropping {} without both path and url", self.header);
                None
            }
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(value)
}

/// Convert SSH remote URL to its anonymous HTTPS form.
///
/// Handles scp-like `git@host:owner/repo.git` and `ssh://[user@]host[:port]/path`
/// URLs. The `.git` suffix is dropped from converted URLs. Anything else is
/// returned unchanged.
pub fn https_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map_or(rest, |(_, host)| host);
        let Some((authority, path)) = rest.split_once('/') else {
            return url.to_string();
        };
        let host = authority.split_once(':').map_or(authority, |(host, _)| host);
        return format!("https://{host}/{}", trim_git_suffix(path));
    }

    if url.contains("://") {
        return url.to_string();
    }

    let Some((user_host, path)) = url.split_once(':') else {
        return url.to_string();
    };
    let Some((_, host)) = user_host.split_once('@') else {
        return url.to_string();
    };

    format!("https://{host}/{}", trim_git_suffix(path))
}

fn trim_git_suffix(path: &str) -> &str {
    path.strip_suffix(".git").unwrap_or(path)
}

/// How a submodule came to be available.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ResolvedBy {
    /// Directory already had content.
    AlreadyPresent,

    /// Directory was cloned from `url`.
    Cloned { url: String },
}

/// Outcome of materializing one submodule entry.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum EntryOutcome {
    /// Submodule content is in place.
    Resolved(ResolvedBy),

    /// Entry was never attempted.
    Skipped(String),

    /// Every clone attempt failed.
    Failed(String),
}

impl EntryOutcome {
    /// Check if submodule content is in place.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl Display for EntryOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Resolved(ResolvedBy::AlreadyPresent) => fmt.write_str("already present"),
            Self::Resolved(ResolvedBy::Cloned { url }) => write!(fmt, "cloned from {url}"),
            Self::Skipped(reason) => write!(fmt, "skipped: {reason}"),
            Self::Failed(reason) => write!(fmt, "failed: {reason}"),
        }
    }
}

/// Materialization status of one submodule entry.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubmoduleStatus {
    /// Descriptor entry.
    pub config: SubmoduleConfig,

    /// What happened to it.
    pub outcome: EntryOutcome,

    /// Report for submodules nested inside this one.
    pub nested: Option<MaterializeReport>,
}

/// Per-entry statuses of one materialization level.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct MaterializeReport {
    pub entries: Vec<SubmoduleStatus>,
}

impl MaterializeReport {
    /// Number of entries at this level that resolved.
    pub fn resolved(&self) -> usize {
        self.entries
            .iter()
            .filter(|status| status.outcome.is_resolved())
            .count()
    }

    /// Number of entries that were cloned, nested levels included.
    pub fn cloned(&self) -> usize {
        self.entries
            .iter()
            .map(|status| {
                let here = matches!(status.outcome, EntryOutcome::Resolved(ResolvedBy::Cloned { .. }));
                usize::from(here) + status.nested.as_ref().map_or(0, MaterializeReport::cloned)
            })
            .sum()
    }

    /// Check if this level had no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clones unpopulated submodules into place.
#[derive(Debug, Clone)]
pub struct Materializer<F>
where
    F: Fetch,
{
    fetcher: F,
    max_depth: usize,
}

impl<F> Materializer<F>
where
    F: Fetch,
{
    /// Construct new materializer using [`DEFAULT_MAX_DEPTH`].
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set default nesting depth used by [`Materializer::materialize_default`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Default nesting depth.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Materialize submodules of `root` with the default nesting depth.
    ///
    /// # Errors
    ///
    /// - Return [`SubmoduleError`] for the same reasons as
    ///   [`Materializer::materialize`].
    pub fn materialize_default(&self, root: impl AsRef<Path>) -> Result<MaterializeReport> {
        self.materialize(root, self.max_depth)
    }

    /// Materialize submodules of `root`, recursing at most `max_depth` levels.
    ///
    /// A depth of zero does nothing. Entries that already have content are
    /// left alone, though their own submodules are still visited.
    ///
    /// # Errors
    ///
    /// - Return [`SubmoduleError::ReadDescriptor`] if `.gitmodules` exists
    ///   but cannot be read.
    /// - Return [`SubmoduleError::NoneResolved`] if the descriptor had
    ///   entries and none of them resolved.
    #[instrument(skip(self, root), level = "debug")]
    pub fn materialize(&self, root: impl AsRef<Path>, max_depth: usize) -> Result<MaterializeReport> {
        let root = root.as_ref();
        if max_depth == 0 {
            debug!("depth limit reached at {:?}", root.display());
            return Ok(MaterializeReport::default());
        }

        let gitmodules = Gitmodules::load(root)?;
        if gitmodules.is_empty() {
            return Ok(MaterializeReport::default());
        }

        info!(
            "resolve {} submodule(s) in {:?}",
            gitmodules.len(),
            root.display()
        );
        let report = MaterializeReport {
            entries: gitmodules
                .iter()
                .map(|config| self.materialize_entry(root, config, max_depth))
                .collect(),
        };

        if report.resolved() == 0 {
            return Err(SubmoduleError::NoneResolved {
                total: report.entries.len(),
                report,
            });
        }

        Ok(report)
    }

    fn materialize_entry(
        &self,
        root: &Path,
        config: &SubmoduleConfig,
        max_depth: usize,
    ) -> SubmoduleStatus {
        let outcome = if config.escapes_root() {
            warn!("submodule path {:?} escapes repository root", config.path);
            EntryOutcome::Skipped(format!("path {:?} escapes repository root", config.path))
        } else {
            let dir = root.join(&config.path);
            match prepare_slot(&dir) {
                Ok(Slot::Populated) => {
                    debug!("submodule {:?} already present", config.path);
                    EntryOutcome::Resolved(ResolvedBy::AlreadyPresent)
                }
                Ok(Slot::Empty { placeholder }) => self.clone_entry(config, &dir, placeholder),
                Err(reason) => {
                    warn!("skip submodule {:?}: {reason}", config.path);
                    EntryOutcome::Skipped(reason)
                }
            }
        };

        let nested = outcome
            .is_resolved()
            .then(|| self.materialize_nested(&root.join(&config.path), max_depth - 1))
            .flatten();

        SubmoduleStatus {
            config: config.clone(),
            outcome,
            nested,
        }
    }

    fn clone_entry(
        &self,
        config: &SubmoduleConfig,
        dir: &Path,
        placeholder: Option<Vec<u8>>,
    ) -> EntryOutcome {
        let mut failures = Vec::new();
        for url in config.candidate_urls() {
            match self.fetcher.clone_repo(&url, dir) {
                Ok(()) => {
                    info!("cloned submodule {:?} from {url}", config.path);
                    return EntryOutcome::Resolved(ResolvedBy::Cloned { url });
                }
                Err(error) => {
                    debug!("clone of {url} failed: {error}");
                    failures.push(format!("{url}: {error}"));
                }
            }
        }

        // INVARIANT: Leave the gitlink placeholder as it was found.
        if let Some(contents) = placeholder {
            if let Err(error) = write(dir.join(".git"), contents) {
                warn!("cannot restore placeholder in {:?}: {error}", dir.display());
            }
        }

        warn!("could not clone submodule {:?}", config.path);
        EntryOutcome::Failed(failures.join("; "))
    }

    fn materialize_nested(&self, dir: &Path, max_depth: usize) -> Option<MaterializeReport> {
        match self.materialize(dir, max_depth) {
            Ok(report) if report.is_empty() => None,
            Ok(report) => Some(report),
            Err(SubmoduleError::NoneResolved { report, .. }) => {
                warn!("no nested submodule of {:?} resolved", dir.display());
                Some(report)
            }
            Err(error) => {
                warn!("{error}");
                None
            }
        }
    }
}

enum Slot {
    Populated,
    Empty { placeholder: Option<Vec<u8>> },
}

/// Figure out whether a submodule directory needs a clone.
///
/// A lone `.git` link file is removed, because clones refuse non-empty
/// targets. Its contents are handed back for restoration.
fn prepare_slot(dir: &Path) -> std::result::Result<Slot, String> {
    if !dir.exists() {
        mkdirp::mkdirp(dir).map_err(|err| format!("cannot create {:?}: {err}", dir.display()))?;
        return Ok(Slot::Empty { placeholder: None });
    }

    if !dir.is_dir() {
        return Err(format!("{:?} is not a directory", dir.display()));
    }

    let entries = read_dir(dir)
        .map_err(|err| format!("cannot read {:?}: {err}", dir.display()))?
        .filter_map(std::result::Result::ok)
        .collect::<Vec<_>>();

    match entries.as_slice() {
        [] => Ok(Slot::Empty { placeholder: None }),
        [only] if only.file_name() == ".git" && only.path().is_file() => {
            let link = only.path();
            let contents =
                read(&link).map_err(|err| format!("cannot read {:?}: {err}", link.display()))?;
            remove_file(&link).map_err(|err| format!("cannot remove {:?}: {err}", link.display()))?;
            Ok(Slot::Empty {
                placeholder: Some(contents),
            })
        }
        _ => Ok(Slot::Populated),
    }
}

/// Submodule materialization error types.
#[derive(Debug, thiserror::Error)]
pub enum SubmoduleError {
    /// Submodule descriptor cannot be read.
    #[error("failed to read submodule descriptor at {:?}", path.display())]
    ReadDescriptor {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Not a single submodule entry could be resolved.
    #[error("none of {total} submodule(s) could be resolved")]
    NoneResolved {
        total: usize,
        report: MaterializeReport,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SubmoduleError> = std::result::Result<T, E>;
