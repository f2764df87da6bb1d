// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change previews.
//!
//! Before anything gets written, the user should see what will change. A
//! [`DiffResult`] compares a resolved source file against whatever currently
//! sits at its target, and renders a bounded description of the difference:
//!
//! ```text
//! - set -g mouse off
//! + set -g mouse on
//!   set -g history-limit 5000
//!   ...
//!   bind r source-file ~/.tmux.conf
//! ```
//!
//! Long unchanged runs collapse to their first and last two lines, and a
//! brand new file only shows its first few lines.

use crate::{deploy::target_path, model::ResolvedFileMap};

use serde::Serialize;
use similar::{Algorithm, ChangeTag, TextDiff};
use std::{
    borrow::Cow,
    fmt::{Display, Formatter, Result as FmtResult, Write},
    fs::read,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Default line cap for new-file previews.
pub const DEFAULT_PREVIEW_LINES: usize = 20;

/// Unchanged runs longer than this get collapsed.
const MAX_CONTEXT_RUN: usize = 6;

/// Lines kept at each end of a collapsed run.
const CONTEXT_EDGE: usize = 2;

/// How source and target relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Target does not exist yet.
    New,

    /// Target already holds the exact same bytes.
    Identical,

    /// Target exists with different content.
    Modified,
}

impl Display for DiffKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::New => fmt.write_str("new"),
            Self::Identical => fmt.write_str("identical"),
            Self::Modified => fmt.write_str("modified"),
        }
    }
}

/// Rendered comparison of a source file against its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: DiffKind,
    pub diff: String,
    pub additions: usize,
    pub deletions: usize,
}

/// Renders bounded diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffEngine {
    preview_lines: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self {
            preview_lines: DEFAULT_PREVIEW_LINES,
        }
    }
}

impl DiffEngine {
    /// Construct new diff engine with default line cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set line cap for new-file previews.
    pub fn with_preview_lines(mut self, preview_lines: usize) -> Self {
        self.preview_lines = preview_lines;
        self
    }

    /// Compare `source` against `target`.
    ///
    /// # Errors
    ///
    /// - Return [`DiffError::Read`] if source cannot be read, or target
    ///   exists but cannot be read.
    #[instrument(skip(self, source, target), level = "debug")]
    pub fn diff(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<DiffResult> {
        let source = source.as_ref();
        let target = target.as_ref();
        let new = read(source).map_err(|err| DiffError::Read {
            source: err,
            path: source.to_path_buf(),
        })?;

        let old = match read(target) {
            Ok(old) => Some(old),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(DiffError::Read {
                    source: err,
                    path: target.to_path_buf(),
                })
            }
        };

        let (kind, diff, additions, deletions) = match old {
            None => {
                let (diff, additions) = self.render_new(&String::from_utf8_lossy(&new));
                (DiffKind::New, diff, additions, 0)
            }
            Some(old) if old == new => (DiffKind::Identical, String::new(), 0, 0),
            Some(old) => {
                let (diff, additions, deletions) =
                    render_modified(&String::from_utf8_lossy(&old), &String::from_utf8_lossy(&new));
                (DiffKind::Modified, diff, additions, deletions)
            }
        };
        debug!("{kind} {:?}: +{additions} -{deletions}", target.display());

        Ok(DiffResult {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            kind,
            diff,
            additions,
            deletions,
        })
    }

    /// Diff every entry of `files` against its target under `home`.
    ///
    /// An entry that cannot be compared only spoils its own slot of the
    /// returned [`Preview`].
    pub fn preview(&self, files: &ResolvedFileMap, home: impl AsRef<Path>) -> Preview {
        let home = home.as_ref();
        let entries = files
            .iter()
            .map(|(source, logical)| PreviewEntry {
                source: source.to_path_buf(),
                logical: logical.to_path_buf(),
                result: self.diff(source, target_path(home, logical)),
            })
            .collect();

        Preview { entries }
    }

    fn render_new(&self, text: &str) -> (String, usize) {
        let total = text.lines().count();
        let mut diff = String::new();
        for line in text.lines().take(self.preview_lines) {
            let _ = writeln!(diff, "+ {line}");
        }

        if total > self.preview_lines {
            let _ = writeln!(diff, "... +{} more lines", total - self.preview_lines);
        }

        (diff, total)
    }
}

/// Compare `source` against `target` with the default line cap.
///
/// # Errors
///
/// - Return [`DiffError`] for the same reasons as [`DiffEngine::diff`].
pub fn diff(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<DiffResult> {
    DiffEngine::default().diff(source, target)
}

/// Diff every entry of `files` against `home` with the default line cap.
pub fn preview(files: &ResolvedFileMap, home: impl AsRef<Path>) -> Preview {
    DiffEngine::default().preview(files, home)
}

/// Comparison of a single file map entry.
#[derive(Debug)]
pub struct PreviewEntry {
    /// Resolved source file.
    pub source: PathBuf,

    /// Logical target, relative to home unless absolute.
    pub logical: PathBuf,

    /// Comparison, or why it could not be made.
    pub result: Result<DiffResult>,
}

/// Per-file comparisons of a whole [`ResolvedFileMap`].
#[derive(Debug, Default)]
pub struct Preview {
    entries: Vec<PreviewEntry>,
}

impl Preview {
    /// Every entry in file map order.
    pub fn entries(&self) -> &[PreviewEntry] {
        &self.entries
    }

    /// Comparisons that could be made.
    pub fn diffs(&self) -> impl Iterator<Item = &DiffResult> {
        self.entries
            .iter()
            .filter_map(|entry| entry.result.as_ref().ok())
    }

    /// Entries that could not be compared.
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &DiffError)> {
        self.entries.iter().filter_map(|entry| match &entry.result {
            Ok(_) => None,
            Err(error) => Some((entry.source.as_path(), error)),
        })
    }

    /// Number of comparable entries whose target would change.
    pub fn changes(&self) -> usize {
        self.diffs()
            .filter(|result| result.kind != DiffKind::Identical)
            .count()
    }

    /// File map holding only the entries that could be compared.
    pub fn readable(&self) -> ResolvedFileMap {
        self.entries
            .iter()
            .filter(|entry| entry.result.is_ok())
            .map(|entry| (entry.source.as_path(), entry.logical.as_path()))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the file map was empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One rendered line of an edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line<'a> {
    Equal(Cow<'a, str>),
    Delete(Cow<'a, str>),
    Insert(Cow<'a, str>),
}

fn render_modified(old: &str, new: &str) -> (String, usize, usize) {
    let script = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);

    let lines = script
        .iter_all_changes()
        .map(|change| {
            let value = Cow::Borrowed(trim_newline(change.value()));
            match change.tag() {
                ChangeTag::Equal => Line::Equal(value),
                ChangeTag::Delete => Line::Delete(value),
                ChangeTag::Insert => Line::Insert(value),
            }
        })
        .collect::<Vec<_>>();

    let lines = group_changes(lines);
    let additions = lines.iter().filter(|line| matches!(line, Line::Insert(_))).count();
    let deletions = lines.iter().filter(|line| matches!(line, Line::Delete(_))).count();

    (render(&lines), additions, deletions)
}

fn trim_newline(value: &str) -> &str {
    let value = value.strip_suffix('\n').unwrap_or(value);
    value.strip_suffix('\r').unwrap_or(value)
}

/// Put deletions before insertions inside every changed region.
fn group_changes(lines: Vec<Line<'_>>) -> Vec<Line<'_>> {
    let mut grouped = Vec::with_capacity(lines.len());
    let mut inserts = Vec::new();

    for line in lines {
        match line {
            Line::Delete(_) => grouped.push(line),
            Line::Insert(_) => inserts.push(line),
            Line::Equal(_) => {
                grouped.append(&mut inserts);
                grouped.push(line);
            }
        }
    }
    grouped.append(&mut inserts);

    grouped
}

fn render(lines: &[Line<'_>]) -> String {
    let mut diff = String::new();
    let mut index = 0;

    while index < lines.len() {
        let run = lines[index..]
            .iter()
            .take_while(|line| matches!(line, Line::Equal(_)))
            .count();

        if run == 0 {
            match &lines[index] {
                Line::Delete(value) => {
                    let _ = writeln!(diff, "- {value}");
                }
                Line::Insert(value) => {
                    let _ = writeln!(diff, "+ {value}");
                }
                Line::Equal(_) => (),
            }
            index += 1;
            continue;
        }

        let context = &lines[index..index + run];
        if run > MAX_CONTEXT_RUN {
            write_context(&mut diff, &context[..CONTEXT_EDGE]);
            diff.push_str("  ...\n");
            write_context(&mut diff, &context[run - CONTEXT_EDGE..]);
        } else {
            write_context(&mut diff, context);
        }
        index += run;
    }

    diff
}

fn write_context(diff: &mut String, lines: &[Line<'_>]) {
    for line in lines {
        if let Line::Equal(value) = line {
            let _ = writeln!(diff, "  {value}");
        }
    }
}

/// Diff engine error types.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// File cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DiffError> = std::result::Result<T, E>;
