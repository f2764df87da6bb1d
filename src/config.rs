// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of dotpick's configuration file to simplify the process
//! of serialization and deserialization. The configuration file is optional.
//! Every setting has a sane default, so a missing file simply means "use the
//! defaults".
//!
//! # General Layout
//!
//! ```toml
//! [settings]
//! cache_dir = "$XDG_DATA_HOME/dotpick/cache"
//! backup_dir = "~/.local/share/dotpick/backups"
//! submodule_depth = 3
//! preview_lines = 20
//! max_concurrent_fetches = 5
//! shallow_clone = true
//! ```
//!
//! Directory fields go through shell expansion, so environment variables and
//! a leading tilde are allowed.

use crate::path::{default_config_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Dotpick configuration file layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    pub settings: Settings,
}

impl Config {
    /// Construct configuration with default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if default directories cannot be
    ///   determined.
    pub fn try_default() -> Result<Self> {
        Ok(Self {
            settings: Settings::try_default()?,
        })
    }

    /// Load configuration from target path.
    ///
    /// Falls back to default settings if no configuration file exists at the
    /// target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if configuration file exists but cannot
    ///   be read.
    /// - Return [`ConfigError::Deserialize`] if configuration file is not
    ///   valid.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, using defaults", path.display());
                Self::try_default()
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on directory fields.
        config.settings.cache_dir = expand(&config.settings.cache_dir)?;
        config.settings.backup_dir = expand(&config.settings.backup_dir)?;

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// General configuration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Directory where creator repositories are checked out.
    pub cache_dir: PathBuf,

    /// Directory where backups and the backup index are kept.
    pub backup_dir: PathBuf,

    /// Maximum nesting depth for submodule materialization.
    #[serde(default = "default_submodule_depth")]
    pub submodule_depth: usize,

    /// Line cap for new-file previews.
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,

    /// Size of the worker pool used to fetch creator repositories.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Clone with a history depth of one.
    #[serde(default = "default_shallow_clone")]
    pub shallow_clone: bool,
}

impl Settings {
    /// Construct default settings rooted at dotpick's configuration directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if default directories cannot be
    ///   determined.
    pub fn try_default() -> Result<Self> {
        let base = default_config_dir()?;
        Ok(Self {
            cache_dir: base.join("cache"),
            backup_dir: base.join("backups"),
            submodule_depth: default_submodule_depth(),
            preview_lines: default_preview_lines(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            shallow_clone: default_shallow_clone(),
        })
    }
}

fn default_submodule_depth() -> usize {
    3
}

fn default_preview_lines() -> usize {
    20
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_shallow_clone() -> bool {
    true
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Failed to determine default directories.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("DOTPICK_ROOT", "/home/blah/dotpick")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            [settings]
            cache_dir = "$DOTPICK_ROOT/cache"
            backup_dir = "${DOTPICK_ROOT}/backups"
            submodule_depth = 2
            preview_lines = 40
            max_concurrent_fetches = 8
            shallow_clone = false
        "#
        .parse()?;

        let expect = Config {
            settings: Settings {
                cache_dir: "/home/blah/dotpick/cache".into(),
                backup_dir: "/home/blah/dotpick/backups".into(),
                submodule_depth: 2,
                preview_lines: 40,
                max_concurrent_fetches: 8,
                shallow_clone: false,
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_config_fills_defaults() -> anyhow::Result<()> {
        let result: Config = r#"
            [settings]
            cache_dir = "/srv/cache"
            backup_dir = "/srv/backups"
        "#
        .parse()?;

        assert_eq!(result.settings.submodule_depth, 3);
        assert_eq!(result.settings.preview_lines, 20);
        assert_eq!(result.settings.max_concurrent_fetches, 5);
        assert!(result.settings.shallow_clone);

        Ok(())
    }

    #[test]
    fn serialize_config() {
        let result = Config {
            settings: Settings {
                cache_dir: "/home/blah/dotpick/cache".into(),
                backup_dir: "/home/blah/dotpick/backups".into(),
                submodule_depth: 3,
                preview_lines: 20,
                max_concurrent_fetches: 5,
                shallow_clone: true,
            },
        }
        .to_string();

        let expect = indoc! {r#"
            [settings]
            cache_dir = "/home/blah/dotpick/cache"
            backup_dir = "/home/blah/dotpick/backups"
            submodule_depth = 3
            preview_lines = 20
            max_concurrent_fetches = 5
            shallow_clone = true
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn load_missing_config_uses_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = Config::load(dir.path().join("config.toml"))?;
        assert_eq!(result, Config::try_default()?);

        Ok(())
    }
}
