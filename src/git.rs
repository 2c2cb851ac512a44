// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git repository collaborator.
//!
//! Manifest ingestion clones a GitOps repository, edits its working tree, and
//! pushes the result back. The [`Repository`] and [`RepositoryAccess`] traits
//! are the only surface the rest of the crate sees. [`Git2Access`] implements
//! both through libgit2.
//!
//! # Clone References
//!
//! A clone URL may name what to check out:
//!
//! - `url#branch` clones and checks out that branch.
//! - `url@tag` checks out that tag, as long as the `@` follows the last `/`
//!   of the URL. Thus `git@host:org/repo` keeps its user part.
//!
//! # Cancellation
//!
//! Transfers honor a shared [`CancelFlag`]. Raising the flag aborts a clone
//! at the next progress report, and refuses to start a push.

pub mod github;
pub mod provider;

use crate::app::TOOL_NAME;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, IndexAddOption, PushOptions as Git2PushOptions,
    RemoteCallbacks, Signature,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time,
};
use tracing::{debug, info, instrument, warn};

/// Basic credentials for remote access.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

impl Auth {
    /// Construct new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username to present, falling back to the tool name when empty.
    pub fn username(&self) -> &str {
        if self.username.is_empty() {
            return TOOL_NAME;
        }

        self.username.as_str()
    }
}

/// Options for cloning a repository.
#[derive(Default, Debug, Clone)]
pub struct CloneOptions {
    /// Clone URL, optionally suffixed with `#branch` or `@tag`.
    pub url: String,

    /// Directory to clone into.
    pub path: PathBuf,

    pub auth: Option<Auth>,

    /// Shallow clone depth, full history if unset.
    pub depth: Option<i32>,
}

/// Options for pushing a repository.
#[derive(Default, Debug, Clone)]
pub struct PushOptions {
    pub remote_name: String,
    pub auth: Option<Auth>,
}

/// Local repository with a working tree.
pub trait Repository {
    /// Stage every path of the working tree matching pattern.
    fn add(&self, pattern: &str) -> Result<()>;

    /// Register new remote.
    fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Commit staged changes on top of HEAD, returning the commit sha.
    fn commit(&self, message: &str) -> Result<String>;

    /// Push current branch.
    fn push(&self, opts: &PushOptions) -> Result<()>;

    /// Check if repository has no remotes yet.
    fn is_new_repo(&self) -> Result<bool>;

    /// Root of the working tree.
    fn root(&self) -> Result<PathBuf>;
}

/// Layer of indirection for repository access.
pub trait RepositoryAccess {
    type Repo: Repository;

    /// Clone remote repository.
    fn clone_repo(&self, opts: &CloneOptions) -> Result<Self::Repo>;

    /// Initialize new repository.
    fn init(&self, path: &Path) -> Result<Self::Repo>;
}

/// Shared flag to abort long running transfers.
#[derive(Default, Debug, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Construct new lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if flag was raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reference to check out after cloning.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CloneRef {
    Branch(String),
    Tag(String),
}

/// Split clone URL into the URL to fetch and the reference to check out.
pub fn parse_clone_url(url: &str) -> (&str, Option<CloneRef>) {
    if let Some((base, branch)) = url.split_once('#') {
        return (base, Some(CloneRef::Branch(branch.to_string())));
    }

    let tail = url.rfind('/').map_or(0, |idx| idx + 1);
    match url[tail..].rfind('@') {
        Some(idx) => {
            let at = tail + idx;
            (&url[..at], Some(CloneRef::Tag(url[at + 1..].to_string())))
        }
        None => (url, None),
    }
}

/// Repository access through libgit2.
#[derive(Debug, Clone)]
pub struct Git2Access {
    bar: ProgressBar,
    cancel: CancelFlag,
}

impl Git2Access {
    /// Construct new access reporting progress on bar.
    pub fn new(bar: ProgressBar, cancel: CancelFlag) -> Self {
        Self { bar, cancel }
    }
}

impl Default for Git2Access {
    fn default() -> Self {
        Self::new(ProgressBar::hidden(), CancelFlag::new())
    }
}

impl RepositoryAccess for Git2Access {
    type Repo = Git2Repository;

    /// Clone remote repository.
    ///
    /// Progress of the transfer is displayed through the progress bar. If
    /// credentials are needed and none were given, the user is prompted for
    /// them. The progress bar is suspended while prompting.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Validation`] if URL or path are empty.
    /// - Return [`GitError::Cancelled`] if the cancel flag was raised.
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, opts), fields(url = %opts.url), level = "debug")]
    fn clone_repo(&self, opts: &CloneOptions) -> Result<Self::Repo> {
        if opts.url.is_empty() {
            return Err(GitError::Validation("clone url must not be empty".into()));
        }
        if opts.path.as_os_str().is_empty() {
            return Err(GitError::Validation("clone path must not be empty".into()));
        }

        let (url, reference) = parse_clone_url(&opts.url);
        info!("clone {url} into {:?}", opts.path.display());

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        self.bar.set_style(style);
        self.bar.set_message(url.to_string());

        let prompter = IndicatifPrompter::new(self.bar.clone());
        let authenticator = authenticator(opts.auth.as_ref(), prompter);
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            if self.cancel.is_cancelled() {
                return false;
            }

            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                self.bar.set_length(progress.total_objects() as u64);
                self.bar.set_position(progress.received_objects() as u64);
            }
            true
        });
        rc.sideband_progress(|_| !self.cancel.is_cancelled());

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        if let Some(depth) = opts.depth {
            fo.depth(depth);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(CloneRef::Branch(branch)) = &reference {
            builder.branch(branch);
        }

        let repository = builder.clone(url, &opts.path).map_err(|err| {
            if self.cancel.is_cancelled() {
                GitError::Cancelled
            } else {
                GitError::Git2(err)
            }
        })?;
        self.bar.finish_and_clear();

        if let Some(CloneRef::Tag(tag)) = &reference {
            debug!("checkout tag {tag}");
            let object = repository.revparse_single(&format!("refs/tags/{tag}"))?;
            repository.checkout_tree(&object, Some(CheckoutBuilder::new().force()))?;
            repository.set_head_detached(object.peel_to_commit()?.id())?;
        }

        Ok(Git2Repository {
            repository,
            bar: self.bar.clone(),
            cancel: self.cancel.clone(),
        })
    }

    /// Initialize new repository.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    fn init(&self, path: &Path) -> Result<Self::Repo> {
        let path = if path.as_os_str().is_empty() {
            Path::new(".")
        } else {
            path
        };

        info!("initialize new repository: {:?}", path.display());
        Ok(Git2Repository {
            repository: git2::Repository::init(path)?,
            bar: self.bar.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

/// Repository backed by libgit2.
pub struct Git2Repository {
    repository: git2::Repository,
    bar: ProgressBar,
    cancel: CancelFlag,
}

impl Git2Repository {
    /// Open existing repository.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if no repository can be opened at path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            repository: git2::Repository::open(path.as_ref())?,
            bar: ProgressBar::hidden(),
            cancel: CancelFlag::new(),
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repository.signature() {
            Ok(signature) => Ok(signature),
            Err(_) => Ok(Signature::now(TOOL_NAME, &format!("{TOOL_NAME}@localhost"))?),
        }
    }
}

impl std::fmt::Debug for Git2Repository {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Git2Repository")
            .field("path", &self.repository.path())
            .finish()
    }
}

impl Repository for Git2Repository {
    #[instrument(skip(self), level = "debug")]
    fn add(&self, pattern: &str) -> Result<()> {
        let mut index = self.repository.index()?;
        index.add_all([pattern], IndexAddOption::DEFAULT, None)?;

        // INVARIANT: Deleted files get staged too.
        index.update_all([pattern], None)?;
        index.write()?;

        Ok(())
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        if name.is_empty() || url.is_empty() {
            return Err(GitError::Validation("remote name and url must not be empty".into()));
        }

        self.repository.remote(name, url)?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn commit(&self, message: &str) -> Result<String> {
        // INVARIANT: Always use new tree produced by index after staging.
        let mut index = self.repository.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repository.find_tree(tree_oid)?;

        // INVARIANT: Always append to HEAD if it exists.
        let signature = self.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repository.head().ok().and_then(|head| head.target()) {
            parents.push(self.repository.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("commit {oid}: {message}");

        Ok(oid.to_string())
    }

    /// Push current branch to remote.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Cancelled`] if the cancel flag was raised.
    /// - Return [`GitError::Detached`] if HEAD is not on a branch.
    /// - Return [`GitError::PushRejected`] if the remote refuses the update.
    /// - Return [`GitError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, opts), fields(remote = %opts.remote_name), level = "debug")]
    fn push(&self, opts: &PushOptions) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }

        let head = self.repository.head()?;
        if !head.is_branch() {
            return Err(GitError::Detached);
        }
        let refname = head.name().ok_or(GitError::Detached)?.to_string();

        let mut remote = self.repository.find_remote(&opts.remote_name)?;
        let prompter = IndicatifPrompter::new(self.bar.clone());
        let authenticator = authenticator(opts.auth.as_ref(), prompter);
        let config = self.repository.config()?;

        let rejected: RefCell<Option<(String, String)>> = RefCell::new(None);
        {
            let mut rc = RemoteCallbacks::new();
            rc.credentials(authenticator.credentials(&config));
            rc.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    *rejected.borrow_mut() = Some((reference.to_string(), message.to_string()));
                }
                Ok(())
            });

            let mut po = Git2PushOptions::new();
            po.remote_callbacks(rc);
            info!("push {refname} to {}", opts.remote_name);
            remote.push(&[format!("{refname}:{refname}")], Some(&mut po))?;
        }

        if let Some((reference, message)) = rejected.into_inner() {
            warn!("push of {reference} rejected: {message}");
            return Err(GitError::PushRejected { reference, message });
        }

        Ok(())
    }

    fn is_new_repo(&self) -> Result<bool> {
        Ok(self.repository.remotes()?.is_empty())
    }

    fn root(&self) -> Result<PathBuf> {
        self.repository
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::Bare {
                path: self.repository.path().to_path_buf(),
            })
    }
}

fn authenticator(auth: Option<&Auth>, prompter: IndicatifPrompter) -> GitAuthenticator {
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    match auth {
        Some(auth) => {
            authenticator.add_plaintext_credentials("*", auth.username(), auth.password.as_str())
        }
        None => authenticator,
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Git collaborator error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Caller supplied unusable options.
    #[error("invalid git options: {0}")]
    Validation(String),

    /// Transfer was aborted through the cancel flag.
    #[error("git operation cancelled")]
    Cancelled,

    /// Remote refused a pushed reference.
    #[error("remote rejected {reference}: {message}")]
    PushRejected { reference: String, message: String },

    /// HEAD does not point at a branch.
    #[error("HEAD is detached, nothing to push")]
    Detached,

    /// Repository has no working tree.
    #[error("repository {:?} has no working tree", path.display())]
    Bare { path: PathBuf },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;
