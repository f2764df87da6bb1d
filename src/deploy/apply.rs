// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Writing dotfiles into place.
//!
//! The [`Applier`] deploys one file at a time, and every file walks the same
//! state machine:
//!
//! ```text
//! Pending -> BackedUp -> Written -> Succeeded
//!                     \-> WriteFailed -> RepairAttempted -> Failed
//! Pending -> Failed                      (backup failed, nothing written)
//! ```
//!
//! A source that already is its own target is refused before anything gets
//! backed up, since copying a file onto itself truncates it.
//!
//! A batch never stops at the first failure. Each file gets its own
//! [`ApplyOutcome`], collected into an [`ApplyReport`]. Callers that want the
//! whole batch to count as one success or failure can ask the report for that
//! through [`ApplyReport::into_result`].

use crate::{
    deploy::{
        backup::{BackupError, BackupManager},
        copy_file, is_same_file, target_path,
    },
    model::{Owner, ResolvedFileMap},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Progress of a single file through deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Pending,
    BackedUp,
    Written,
    WriteFailed,
    RepairAttempted,
    Succeeded,
    Failed,
}

impl ApplyState {
    /// Check if no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Result of deploying a single file.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// File that was deployed.
    pub source: PathBuf,

    /// Where it was deployed to.
    pub target: PathBuf,

    /// Backup taken of the previous target, if there was one.
    pub backup: Option<PathBuf>,

    /// Final state.
    pub state: ApplyState,

    /// What went wrong, if anything.
    pub error: Option<ApplyError>,

    /// Whether restoring the backup after a failed write worked.
    pub repaired: Option<bool>,
}

impl ApplyOutcome {
    fn pending(source: &Path, target: PathBuf) -> Self {
        Self {
            source: source.to_path_buf(),
            target,
            backup: None,
            state: ApplyState::Pending,
            error: None,
            repaired: None,
        }
    }

    fn transition(&mut self, state: ApplyState) {
        debug!(
            "{:?}: {:?} -> {:?}",
            self.target.display(),
            self.state,
            state
        );
        self.state = state;
    }

    fn fail(mut self, error: ApplyError) -> Self {
        self.error = Some(error);
        self.transition(ApplyState::Failed);
        self
    }

    /// Check if the file ended up deployed.
    pub fn is_success(&self) -> bool {
        self.state == ApplyState::Succeeded
    }
}

impl Display for ApplyOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.error {
            None => write!(fmt, "{}: ok", self.target.display()),
            Some(error) => write!(fmt, "{}: {error}", self.target.display()),
        }
    }
}

/// Outcomes of a batch of deployments.
#[derive(Debug, Default)]
pub struct ApplyReport {
    outcomes: Vec<ApplyOutcome>,
}

impl ApplyReport {
    /// Every outcome in deployment order.
    pub fn outcomes(&self) -> &[ApplyOutcome] {
        &self.outcomes
    }

    /// Outcomes that ended up deployed.
    pub fn succeeded(&self) -> impl Iterator<Item = &ApplyOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_success())
    }

    /// Outcomes that failed.
    pub fn failed(&self) -> impl Iterator<Item = &ApplyOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Number of outcomes.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Treat the batch as a single unit.
    ///
    /// # Errors
    ///
    /// - Return [`ApplyError::Aggregate`] if any file failed.
    pub fn into_result(self) -> Result<Vec<ApplyOutcome>> {
        let failed = self.failed().count();
        if failed > 0 {
            return Err(ApplyError::Aggregate {
                failed,
                total: self.outcomes.len(),
            });
        }

        Ok(self.outcomes)
    }

    /// Take outcomes out of the report.
    pub fn into_outcomes(self) -> Vec<ApplyOutcome> {
        self.outcomes
    }
}

/// Deploys files into home with backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applier {
    home: PathBuf,
    backups: BackupManager,
}

impl Applier {
    /// Construct new applier deploying into `home`.
    pub fn new(home: impl Into<PathBuf>, backups: BackupManager) -> Self {
        Self {
            home: home.into(),
            backups,
        }
    }

    /// Home directory targets are resolved against.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Backup manager in use.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Deploy `source` to logical `target` on behalf of `owner`.
    #[instrument(skip(self, source, target, owner), level = "debug")]
    pub fn apply(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        owner: &Owner,
    ) -> ApplyOutcome {
        let source = source.as_ref();
        let mut outcome = ApplyOutcome::pending(source, target_path(&self.home, target));

        if is_same_file(source, &outcome.target) {
            warn!("skip {:?}: source is the target itself", outcome.target.display());
            let path = outcome.target.clone();
            return outcome.fail(ApplyError::SameFile { path });
        }

        match self.backups.backup(&outcome.target, owner) {
            Ok(record) => outcome.backup = record.map(|record| record.backup_path),
            Err(error) => {
                warn!("skip {:?}: {error}", outcome.target.display());
                return outcome.fail(error.into());
            }
        }
        outcome.transition(ApplyState::BackedUp);

        match write_target(source, &outcome.target) {
            Ok(()) => {
                outcome.transition(ApplyState::Written);
                outcome.transition(ApplyState::Succeeded);
                info!("deployed {:?}", outcome.target.display());
                outcome
            }
            Err(error) => {
                outcome.transition(ApplyState::WriteFailed);
                warn!("failed to deploy {:?}: {error}", outcome.target.display());
                outcome.repaired = self.repair(&outcome);
                outcome.transition(ApplyState::RepairAttempted);
                outcome.fail(error)
            }
        }
    }

    /// Deploy every entry of `files`, continuing past failures.
    pub fn apply_multiple(&self, files: &ResolvedFileMap, owner: &Owner) -> ApplyReport {
        let outcomes = files
            .iter()
            .map(|(source, target)| self.apply(source, target, owner))
            .collect::<Vec<_>>();

        let report = ApplyReport { outcomes };
        info!(
            "deployed {} of {} file(s)",
            report.succeeded().count(),
            report.len()
        );

        report
    }

    /// Restore every backup taken by `outcomes`.
    ///
    /// Targets that had nothing to back up are left as they are.
    ///
    /// # Errors
    ///
    /// - Return [`RollbackError::Incomplete`] if any restore failed.
    #[instrument(skip(self, outcomes), level = "debug")]
    pub fn rollback<'a>(
        &self,
        outcomes: impl IntoIterator<Item = &'a ApplyOutcome>,
    ) -> Result<(), RollbackError> {
        let mut total = 0;
        let mut failed = 0;
        for outcome in outcomes {
            let Some(backup) = &outcome.backup else {
                continue;
            };

            total += 1;
            if let Err(error) = self.backups.restore(backup, &outcome.target) {
                warn!("cannot roll back {:?}: {error}", outcome.target.display());
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(RollbackError::Incomplete { failed, total });
        }

        info!("rolled back {total} file(s)");
        Ok(())
    }

    fn repair(&self, outcome: &ApplyOutcome) -> Option<bool> {
        let backup = outcome.backup.as_ref()?;
        match self.backups.restore(backup, &outcome.target) {
            Ok(()) => Some(true),
            Err(error) => {
                warn!("repair of {:?} failed: {error}", outcome.target.display());
                Some(false)
            }
        }
    }
}

fn write_target(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        // INVARIANT: mkdirp treats an existing non-directory as already created.
        let created = mkdirp::mkdirp(parent).map(drop).and_then(|()| {
            if parent.is_dir() {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::NotADirectory))
            }
        });
        created.map_err(|err| ApplyError::CreateParent {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    copy_file(source, target).map_err(|err| ApplyError::Write {
        source: err,
        from: source.to_path_buf(),
        to: target.to_path_buf(),
    })
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Target could not be backed up, so nothing was written.
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Source and target are one file on disk.
    #[error("refusing to copy {:?} onto itself", path.display())]
    SameFile { path: PathBuf },

    /// Parent directories of target cannot be created.
    #[error("failed to create parent directory {:?}", path.display())]
    CreateParent {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Source cannot be copied over target.
    #[error("failed to write {:?} to {:?}", from.display(), to.display())]
    Write {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Some files of a batch failed.
    #[error("{failed} of {total} file(s) failed to deploy")]
    Aggregate { failed: usize, total: usize },
}

/// Rollback error types.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// Some backups could not be restored.
    #[error("{failed} of {total} backup(s) could not be restored")]
    Incomplete { failed: usize, total: usize },
}

/// Friendly result alias :3
pub type Result<T, E = ApplyError> = std::result::Result<T, E>;
