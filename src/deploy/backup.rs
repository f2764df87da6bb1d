// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backups of overwritten files.
//!
//! Any file that deployment is about to overwrite gets copied into the backup
//! directory first. Backups mirror where the original lived relative to home,
//! so a backup of `~/.config/nvim/init.lua` lands at
//! `$backup_dir/.config/nvim/init.lua_20250101_120000_nvim.bak`.
//!
//! # Backup Index
//!
//! Every backup is recorded in `$backup_dir/backup_manifest.json`, a JSON array
//! that only ever grows. Dotpick never deletes backups or their records on its
//! own. The index assumes a single dotpick process at a time. There is no
//! locking.

use crate::{deploy::copy_file, model::Owner};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    fs::{metadata, read_to_string, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// File name of the backup index.
pub const BACKUP_INDEX: &str = "backup_manifest.json";

/// Metadata of a single backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Where the file lived.
    pub original_path: PathBuf,

    /// Where the copy lives.
    pub backup_path: PathBuf,

    /// When the copy was made.
    pub timestamp: DateTime<Local>,

    /// Creator whose deployment caused the backup.
    pub creator_id: String,

    /// Dotfile whose deployment caused the backup.
    pub dotfile_id: String,
}

/// Takes, indexes, and restores backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupManager {
    root: PathBuf,
    home: PathBuf,
}

impl BackupManager {
    /// Construct new backup manager storing backups under `root`.
    ///
    /// Backups of files under `home` keep their home-relative layout.
    pub fn new(root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
        }
    }

    /// Directory holding backups.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the backup index.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(BACKUP_INDEX)
    }

    /// Back up `original` on behalf of `owner`.
    ///
    /// Returns `None` if there is nothing to protect, because `original` does
    /// not exist.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::NotAFile`] if `original` is not a regular file.
    /// - Return [`BackupError::CreateDir`] if backup directory cannot be
    ///   created.
    /// - Return [`BackupError::Copy`] if the copy fails.
    /// - Return [`BackupError`] from index handling if the record cannot be
    ///   persisted.
    #[instrument(skip(self, original, owner), level = "debug")]
    pub fn backup(&self, original: impl AsRef<Path>, owner: &Owner) -> Result<Option<BackupRecord>> {
        let original = original.as_ref();
        match metadata(original) {
            Ok(meta) if meta.is_file() => (),
            Ok(_) => {
                return Err(BackupError::NotAFile {
                    path: original.to_path_buf(),
                })
            }
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                debug!("nothing to back up at {:?}", original.display());
                return Ok(None);
            }
            Err(err) => {
                return Err(BackupError::Stat {
                    source: err,
                    path: original.to_path_buf(),
                })
            }
        }

        let dir = self.backup_dir_for(original);
        mkdirp::mkdirp(&dir)
            .map(drop)
            .map_err(|err| BackupError::CreateDir {
                source: err,
                path: dir.clone(),
            })?;

        let timestamp = Local::now();
        let backup_path = unique_backup_path(&dir, original, &timestamp, &owner.dotfile_id);
        copy_file(original, &backup_path).map_err(|err| BackupError::Copy {
            source: err,
            from: original.to_path_buf(),
            to: backup_path.clone(),
        })?;

        let record = BackupRecord {
            original_path: original.to_path_buf(),
            backup_path,
            timestamp,
            creator_id: owner.creator_id.clone(),
            dotfile_id: owner.dotfile_id.clone(),
        };
        self.append(record.clone())?;
        info!(
            "backed up {:?} to {:?}",
            record.original_path.display(),
            record.backup_path.display()
        );

        Ok(Some(record))
    }

    /// List backups of `original`, oldest first.
    ///
    /// A missing or unreadable index yields no backups.
    pub fn list_backups(&self, original: impl AsRef<Path>) -> Vec<BackupRecord> {
        let original = original.as_ref();
        self.list_all()
            .into_iter()
            .filter(|record| record.original_path == original)
            .collect()
    }

    /// List every recorded backup, oldest first.
    ///
    /// A missing or unreadable index yields no backups.
    pub fn list_all(&self) -> Vec<BackupRecord> {
        match self.load_index() {
            Ok(records) => records,
            Err(error) => {
                warn!("ignoring backup index: {error}");
                Vec::new()
            }
        }
    }

    /// Copy `backup` back over `original`.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::MissingBackup`] if `backup` does not exist.
    /// - Return [`BackupError::CreateDir`] if parent directories of
    ///   `original` cannot be created.
    /// - Return [`BackupError::Copy`] if the copy fails.
    #[instrument(skip(self, backup, original), level = "debug")]
    pub fn restore(&self, backup: impl AsRef<Path>, original: impl AsRef<Path>) -> Result<()> {
        let backup = backup.as_ref();
        let original = original.as_ref();
        if !backup.is_file() {
            return Err(BackupError::MissingBackup {
                path: backup.to_path_buf(),
            });
        }

        if let Some(parent) = original.parent() {
            mkdirp::mkdirp(parent)
                .map(drop)
                .map_err(|err| BackupError::CreateDir {
                    source: err,
                    path: parent.to_path_buf(),
                })?;
        }

        copy_file(backup, original).map_err(|err| BackupError::Copy {
            source: err,
            from: backup.to_path_buf(),
            to: original.to_path_buf(),
        })?;
        info!(
            "restored {:?} from {:?}",
            original.display(),
            backup.display()
        );

        Ok(())
    }

    fn backup_dir_for(&self, original: &Path) -> PathBuf {
        original
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.home).ok())
            .map_or_else(|| self.root.clone(), |relative| self.root.join(relative))
    }

    fn load_index(&self) -> Result<Vec<BackupRecord>> {
        let path = self.index_path();
        let data = match read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackupError::ReadIndex { source: err, path }),
        };

        serde_json::from_str(&data).map_err(|err| BackupError::ParseIndex { source: err, path })
    }

    fn append(&self, record: BackupRecord) -> Result<()> {
        // INVARIANT: Never replace an index we failed to parse.
        let mut records = self.load_index()?;
        records.push(record);

        let path = self.index_path();
        let data = serde_json::to_string_pretty(&records)
            .map_err(|err| BackupError::EncodeIndex { source: err, path: path.clone() })?;

        let staging = path.with_extension("json.tmp");
        write(&staging, data)
            .and_then(|_| rename(&staging, &path))
            .map_err(|err| BackupError::WriteIndex { source: err, path })
    }
}

/// Build a backup path in `dir` that does not exist yet.
///
/// Collisions within the same second get a `_<n>` suffix before `.bak`.
fn unique_backup_path(
    dir: &Path,
    original: &Path,
    timestamp: &DateTime<Local>,
    dotfile_id: &str,
) -> PathBuf {
    let base = original
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".into());
    let stem = format!("{base}_{}_{dotfile_id}", timestamp.format("%Y%m%d_%H%M%S"));

    let mut path = dir.join(format!("{stem}.bak"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{counter}.bak"));
        counter += 1;
    }

    path
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Original is a directory or something else that is not a regular file.
    #[error("cannot back up {:?}, not a regular file", path.display())]
    NotAFile { path: PathBuf },

    /// Original cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Stat {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backup file to restore from does not exist.
    #[error("backup {:?} does not exist", path.display())]
    MissingBackup { path: PathBuf },

    /// Directory cannot be created.
    #[error("failed to create directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be copied.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Backup index cannot be read.
    #[error("failed to read backup index at {:?}", path.display())]
    ReadIndex {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backup index is not valid JSON.
    #[error("failed to parse backup index at {:?}", path.display())]
    ParseIndex {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Backup index cannot be encoded.
    #[error("failed to encode backup index for {:?}", path.display())]
    EncodeIndex {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Backup index cannot be written.
    #[error("failed to write backup index at {:?}", path.display())]
    WriteIndex {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
