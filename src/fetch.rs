// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository acquisition.
//!
//! Dotpick keeps a local checkout of every creator repository it has touched
//! in the __repository cache__. Each creator gets its own directory named
//! after its identifier, so `$cache_dir/tjdevries` holds the checkout for
//! creator "tjdevries".
//!
//! # Fetching
//!
//! All network access goes through the [`Fetch`] trait. The default
//! implementation, [`Git2Fetcher`], clones and fast-forwards through libgit2.
//! Credentials come from the usual places (credential helpers, SSH agent,
//! default SSH keys), and can optionally be prompted for on the terminal.
//! Every transfer checks a [`CancellationToken`], so a caller can abort a
//! long clone from another task.
//!
//! # Concurrency
//!
//! Fetching many creators at once would hammer both the network and the host.
//! [`RepoCache::ensure_repos`] runs fetches on blocking tasks through a worker
//! pool of fixed size. A failure does not cancel the fetches that are already
//! running. Every error is logged, but only the first one is returned.

use crate::model::CreatorSpec;

use auth_git2::{GitAuthenticator, Prompter};
use futures::stream::{self, StreamExt};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, RemoteCallbacks, Repository,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    fs::{read_dir, remove_dir_all},
    path::{Path, PathBuf},
    sync::Arc,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default size of the fetch worker pool.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Layer of indirection for network access to repositories.
pub trait Fetch: Send + Sync {
    /// Clone repository at `url` into `into`.
    ///
    /// The target directory must either not exist, or be empty.
    fn clone_repo(&self, url: &str, into: &Path) -> Result<()>;

    /// Bring existing checkout at `repo` up to date with its origin.
    fn pull_repo(&self, repo: &Path) -> Result<()>;
}

impl<T> Fetch for &T
where
    T: Fetch + ?Sized,
{
    fn clone_repo(&self, url: &str, into: &Path) -> Result<()> {
        (**self).clone_repo(url, into)
    }

    fn pull_repo(&self, repo: &Path) -> Result<()> {
        (**self).pull_repo(repo)
    }
}

impl<T> Fetch for Arc<T>
where
    T: Fetch + ?Sized,
{
    fn clone_repo(&self, url: &str, into: &Path) -> Result<()> {
        (**self).clone_repo(url, into)
    }

    fn pull_repo(&self, repo: &Path) -> Result<()> {
        (**self).pull_repo(repo)
    }
}

/// Repository access through libgit2.
#[derive(Debug, Clone)]
pub struct Git2Fetcher {
    shallow: bool,
    interactive: bool,
    cancel: CancellationToken,
    progress: Option<MultiProgress>,
}

impl Default for Git2Fetcher {
    fn default() -> Self {
        Self {
            shallow: true,
            interactive: false,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

impl Git2Fetcher {
    /// Construct new non-interactive fetcher performing shallow clones.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle shallow clones with a history depth of one.
    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }

    /// Toggle prompting the user for credentials.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Abort transfers once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Display transfer progress through `progress`.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that aborts transfers of this fetcher.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn progress_bar(&self, message: &str) -> Result<ProgressBar> {
        let Some(progress) = &self.progress else {
            return Ok(ProgressBar::hidden());
        };

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        let bar = progress.add(ProgressBar::new(0));
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        Ok(bar)
    }

    fn authenticator(&self, bar: &ProgressBar, source: &str) -> GitAuthenticator {
        if self.interactive {
            GitAuthenticator::default().set_prompter(CredentialPrompter::new(bar.clone(), source))
        } else {
            GitAuthenticator::default()
                .try_password_prompt(0)
                .prompt_ssh_key_password(false)
        }
    }

    fn fetch_options<'cb>(
        &'cb self,
        bar: &'cb ProgressBar,
        config: &'cb Config,
        authenticator: &'cb GitAuthenticator,
    ) -> FetchOptions<'cb> {
        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(config));
        rc.transfer_progress(move |progress| {
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(progress.total_objects() as u64);
                bar.set_position(progress.received_objects() as u64);
            }

            // INVARIANT: Returning false aborts the transfer.
            !self.cancel.is_cancelled()
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        if self.shallow {
            fo.depth(1);
        }

        fo
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        Ok(())
    }
}

impl Fetch for Git2Fetcher {
    /// Clone repository through libgit2.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Cancelled`] if the cancellation token fired
    ///   before or during the transfer.
    /// - Return [`FetchError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, url, into), level = "debug")]
    fn clone_repo(&self, url: &str, into: &Path) -> Result<()> {
        self.check_cancelled()?;
        debug!("clone {url} into {:?}", into.display());

        let bar = self.progress_bar(url)?;
        let config = Config::open_default()?;
        let authenticator = self.authenticator(&bar, url);
        let fo = self.fetch_options(&bar, &config, &authenticator);
        let result = RepoBuilder::new().fetch_options(fo).clone(url, into);
        bar.finish_and_clear();

        match result {
            Ok(_) => Ok(()),
            Err(_) if self.cancel.is_cancelled() => Err(FetchError::Cancelled),
            Err(err) => Err(err.into()),
        }
    }

    /// Fast-forward checkout to match its origin.
    ///
    /// An already up to date checkout is left untouched.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Cancelled`] if the cancellation token fired.
    /// - Return [`FetchError::Diverged`] if a fast-forward is impossible.
    /// - Return [`FetchError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, repo), level = "debug")]
    fn pull_repo(&self, repo: &Path) -> Result<()> {
        self.check_cancelled()?;
        debug!("pull {:?}", repo.display());

        let repository = Repository::open(repo)?;
        let bar = self.progress_bar(&repo.display().to_string())?;
        let config = Config::open_default()?;
        let authenticator = self.authenticator(&bar, &repo.display().to_string());
        let mut fo = self.fetch_options(&bar, &config, &authenticator);
        let fetched = repository
            .find_remote("origin")
            .and_then(|mut remote| remote.fetch(&[] as &[&str], Some(&mut fo), None));
        bar.finish_and_clear();

        match fetched {
            Ok(()) => (),
            Err(_) if self.cancel.is_cancelled() => return Err(FetchError::Cancelled),
            Err(err) => return Err(err.into()),
        }

        let fetch_head = repository.find_reference("FETCH_HEAD")?;
        let incoming = repository.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repository.merge_analysis(&[&incoming])?;
        if analysis.is_up_to_date() {
            debug!("{:?} already up to date", repo.display());
            return Ok(());
        }

        if !analysis.is_fast_forward() {
            return Err(FetchError::Diverged {
                path: repo.to_path_buf(),
            });
        }

        let head = repository.head()?;
        let refname = head.name().unwrap_or("HEAD").to_string();
        let mut reference = repository.find_reference(&refname)?;
        reference.set_target(incoming.id(), "dotpick: fast-forward")?;
        repository.set_head(&refname)?;
        repository.checkout_head(Some(CheckoutBuilder::default().force()))?;

        Ok(())
    }
}

/// Asks for credentials of a creator repository while its progress bar is
/// suspended.
#[derive(Debug, Clone)]
pub struct CredentialPrompter {
    bar: ProgressBar,
    source: String,
}

impl CredentialPrompter {
    /// Construct new prompter for repository at `source`, drawing over `bar`.
    pub fn new(bar: ProgressBar, source: impl Into<String>) -> Self {
        Self {
            bar,
            source: source.into(),
        }
    }

    fn secret(&self, label: &str) -> Option<String> {
        self.bar.suspend(|| {
            Password::new(label)
                .with_help_message(&format!("needed to fetch {}", self.source))
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for CredentialPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("creator repository {url} wants a login");
        let username = self
            .bar
            .suspend(|| Text::new("git username:").prompt().ok())?;
        let password = self.secret(&format!("password for {username}:"))?;
        Some((username, password))
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("creator repository {url} wants a password for {username}");
        self.secret(&format!("password for {username}:"))
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("ssh key {:?} is locked", ssh_key_path.display());
        self.secret(&format!("passphrase for {}:", ssh_key_path.display()))
    }
}

/// Local checkouts of creator repositories.
pub struct RepoCache<F = Git2Fetcher>
where
    F: Fetch,
{
    root: PathBuf,
    fetcher: Arc<F>,
    max_concurrent: usize,
}

impl<F> Clone for RepoCache<F>
where
    F: Fetch,
{
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            fetcher: Arc::clone(&self.fetcher),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl<F> RepoCache<F>
where
    F: Fetch + 'static,
{
    /// Construct new repository cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, fetcher: F) -> Self {
        Self {
            root: root.into(),
            fetcher: Arc::new(fetcher),
            max_concurrent: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    /// Bound number of concurrent fetches in [`RepoCache::ensure_repos`].
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Fetcher used by this cache.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Path to checkout of creator.
    pub fn repo_path(&self, creator_id: impl AsRef<str>) -> PathBuf {
        self.root.join(creator_id.as_ref())
    }

    /// Check if creator has a checkout in the cache.
    pub fn is_cached(&self, creator_id: impl AsRef<str>) -> bool {
        Repository::open(self.repo_path(creator_id)).is_ok()
    }

    /// Make sure a checkout of creator's repository exists and is current.
    ///
    /// Clones if missing. Pulls otherwise, but a failed pull only gets
    /// logged, because the cached checkout is still usable.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::CreateCacheDir`] if cache directory cannot be
    ///   created.
    /// - Return [`FetchError`] from the fetcher if the clone fails.
    #[instrument(skip(self, creator), fields(creator = %creator.id), level = "debug")]
    pub fn ensure_repo(&self, creator: &CreatorSpec) -> Result<PathBuf> {
        let path = self.repo_path(&creator.id);
        if self.is_cached(&creator.id) {
            if let Err(error) = self.fetcher.pull_repo(&path) {
                warn!("using cached checkout of {}: {error}", creator.name);
            }
            return Ok(path);
        }

        mkdirp::mkdirp(&self.root)
            .map(drop)
            .map_err(|err| FetchError::CreateCacheDir {
                source: err,
                path: self.root.clone(),
            })?;

        info!("download dotfiles of {}", creator.name);
        self.fetcher.clone_repo(&creator.repo, &path)?;

        Ok(path)
    }

    /// Make sure checkouts exist for many creators at once.
    ///
    /// Runs at most `max_concurrent` fetches at a time. Every fetch runs to
    /// completion even if another one failed.
    ///
    /// # Errors
    ///
    /// - Return first [`FetchError`] encountered. Others are logged.
    pub async fn ensure_repos(&self, creators: &[CreatorSpec]) -> Result<Vec<PathBuf>> {
        let results = stream::iter(creators.iter().cloned())
            .map(|creator| {
                let cache = self.clone();
                tokio::task::spawn_blocking(move || cache.ensure_repo(&creator))
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut paths = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result.map_err(FetchError::from).and_then(|result| result) {
                Ok(path) => paths.push(path),
                Err(error) => {
                    warn!("fetch failed: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(paths),
        }
    }

    /// List identifiers of every cached creator.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::ReadCache`] if the cache directory exists, but
    ///   cannot be read.
    pub fn cached_creators(&self) -> Result<Vec<String>> {
        let entries = match read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(FetchError::ReadCache {
                    source: err,
                    path: self.root.clone(),
                })
            }
        };

        let mut creators = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        creators.sort();

        Ok(creators)
    }

    /// Remove checkout of creator from the cache.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::ClearCache`] if checkout cannot be removed.
    pub fn clear_creator(&self, creator_id: impl AsRef<str>) -> Result<()> {
        let path = self.repo_path(creator_id);
        if !path.exists() {
            return Ok(());
        }

        remove_dir_all(&path).map_err(|err| FetchError::ClearCache { source: err, path })
    }
}

/// Repository acquisition error types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transfer aborted through cancellation token.
    #[error("fetch cancelled")]
    Cancelled,

    /// Local checkout cannot be fast-forwarded to its origin.
    #[error("checkout at {:?} has diverged from origin", path.display())]
    Diverged { path: PathBuf },

    /// Cache directory cannot be created.
    #[error("failed to create cache directory at {:?}", path.display())]
    CreateCacheDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Cache directory cannot be read.
    #[error("failed to read cache directory at {:?}", path.display())]
    ReadCache {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Cached checkout cannot be removed.
    #[error("failed to remove cached checkout at {:?}", path.display())]
    ClearCache {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Blocking fetch task panicked or was aborted.
    #[error(transparent)]
    Task(#[from] tokio::task::JoinError),
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        fs::{create_dir_all, write},
        sync::Mutex,
    };

    /// Fetcher that pretends every URL containing "missing" is unreachable.
    #[derive(Debug, Default)]
    struct FakeFetcher {
        cloned: Mutex<Vec<String>>,
        pulled: Mutex<Vec<PathBuf>>,
    }

    impl Fetch for FakeFetcher {
        fn clone_repo(&self, url: &str, into: &Path) -> Result<()> {
            if url.contains("missing") {
                return Err(git2::Error::from_str("repository not found").into());
            }

            create_dir_all(into.join(".git")).unwrap();
            write(into.join("README.md"), url).unwrap();
            self.cloned.lock().unwrap().push(url.to_string());

            Ok(())
        }

        fn pull_repo(&self, repo: &Path) -> Result<()> {
            self.pulled.lock().unwrap().push(repo.to_path_buf());
            Err(git2::Error::from_str("network unreachable").into())
        }
    }

    fn creator(id: &str, repo: &str) -> CreatorSpec {
        CreatorSpec {
            id: id.into(),
            name: id.into(),
            repo: repo.into(),
        }
    }

    #[test]
    fn cached_creators_of_missing_cache_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = RepoCache::new(dir.path().join("cache"), FakeFetcher::default());
        assert_eq!(cache.cached_creators()?, Vec::<String>::new());

        Ok(())
    }

    #[test]
    fn ensure_repo_keeps_cached_checkout_when_pull_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = RepoCache::new(dir.path(), FakeFetcher::default());
        Repository::init(cache.repo_path("tj"))?;
        assert!(cache.is_cached("tj"));

        let result = cache.ensure_repo(&creator("tj", "https://example.com/tj"))?;
        assert_eq!(result, cache.repo_path("tj"));
        assert_eq!(*cache.fetcher().pulled.lock().unwrap(), vec![cache.repo_path("tj")]);
        assert!(cache.fetcher().cloned.lock().unwrap().is_empty());

        Ok(())
    }

    #[test]
    fn clear_creator_removes_checkout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = RepoCache::new(dir.path(), FakeFetcher::default());
        Repository::init(cache.repo_path("tj"))?;

        cache.clear_creator("tj")?;
        assert!(!cache.repo_path("tj").exists());
        cache.clear_creator("tj")?;

        Ok(())
    }

    #[tokio::test]
    async fn ensure_repos_surfaces_first_error_without_cancelling_others() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = RepoCache::new(dir.path(), FakeFetcher::default()).with_max_concurrent(2);
        let creators = vec![
            creator("alpha", "https://example.com/alpha"),
            creator("beta", "https://example.com/missing"),
            creator("gamma", "https://example.com/gamma"),
        ];

        let result = cache.ensure_repos(&creators).await;
        assert!(matches!(result, Err(FetchError::Git2(_))));

        let mut cloned = cache.fetcher().cloned.lock().unwrap().clone();
        cloned.sort();
        assert_eq!(
            cloned,
            vec![
                "https://example.com/alpha".to_string(),
                "https://example.com/gamma".to_string(),
            ]
        );
        assert_eq!(cache.cached_creators()?, vec!["alpha".to_string(), "gamma".to_string()]);

        Ok(())
    }
}
