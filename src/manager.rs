// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest ingestion.
//!
//! The [`Manager`] adds a single raw manifest to one application of a remote
//! GitOps repository: clone, resolve the application tree, add the manifest,
//! commit, and push. Every call works in its own fresh clone below the clone
//! directory. Clones are left on disk afterwards.

use crate::{
    env::{EnvError, Environment},
    git::{Auth, CloneOptions, Git2Access, GitError, PushOptions, Repository, RepositoryAccess},
    path::unique_name,
    storage::Workspace,
};

use std::path::PathBuf;
use tracing::{info, instrument};

/// Remote every clone pushes back to.
pub const DEFAULT_REMOTE: &str = "origin";

/// Manifest ingestion manager.
#[derive(Debug)]
pub struct Manager<A = Git2Access>
where
    A: RepositoryAccess,
{
    access: A,
    clone_dir: PathBuf,
    auth: Option<Auth>,
    depth: Option<i32>,
}

impl<A> Manager<A>
where
    A: RepositoryAccess,
{
    /// Construct new manager cloning below target directory.
    pub fn new(access: A, clone_dir: impl Into<PathBuf>) -> Self {
        Self {
            access,
            clone_dir: clone_dir.into(),
            auth: None,
            depth: None,
        }
    }

    /// Use credentials for clone and push.
    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Use shallow clones of target depth.
    pub fn with_depth(mut self, depth: Option<i32>) -> Self {
        self.depth = depth;
        self
    }

    /// Add manifest to application of remote repository.
    ///
    /// The application named by `app_name` is looked up in the tree rooted at
    /// `root_app_path` of the clone. The manifest is committed with message
    /// `Added manifest for '<file>'` and pushed to `origin`. Returns the file
    /// name the manifest was stored under.
    ///
    /// # Errors
    ///
    /// - Return [`ManagerError::Validation`] if clone URL is empty.
    /// - Return [`ManagerError::Git`] if clone, commit, or push fail.
    /// - Return [`ManagerError::Env`] if the application cannot be found or
    ///   the manifest cannot be added.
    #[instrument(skip(self, manifest), level = "debug")]
    pub fn add_manifest(
        &self,
        clone_url: &str,
        root_app_path: &str,
        app_name: &str,
        manifest: &[u8],
    ) -> Result<String> {
        if clone_url.is_empty() {
            return Err(ManagerError::Validation("clone url must not be empty".into()));
        }

        let repo = self.access.clone_repo(&CloneOptions {
            url: clone_url.to_string(),
            path: self.clone_dir.join(unique_name("clone")),
            auth: self.auth.clone(),
            depth: self.depth,
        })?;

        let workspace = Workspace::on_disk(repo.root()?);
        let env = Environment::new(String::new(), root_app_path, String::new());
        let file_name = env.add_manifest(&workspace, app_name, manifest)?;

        repo.add(".")?;
        let sha = repo.commit(&format!("Added manifest for '{file_name}'"))?;
        repo.push(&PushOptions {
            remote_name: DEFAULT_REMOTE.into(),
            auth: self.auth.clone(),
        })?;
        info!("pushed {sha} adding {file_name} to {app_name}");

        Ok(file_name)
    }
}

/// Manager error types.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Caller supplied unusable input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Repository operation fails.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Application tree operation fails.
    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Friendly result alias :3
pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::tests::app_yaml,
        storage::{DiskStorage, Storage},
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::RefCell,
        path::{Path, PathBuf},
        rc::Rc,
    };

    /// Records every repository call in order.
    type Calls = Rc<RefCell<Vec<String>>>;

    struct FakeRepo {
        root: PathBuf,
        calls: Calls,
    }

    impl Repository for FakeRepo {
        fn add(&self, pattern: &str) -> crate::git::Result<()> {
            self.calls.borrow_mut().push(format!("add {pattern}"));
            Ok(())
        }

        fn add_remote(&self, name: &str, url: &str) -> crate::git::Result<()> {
            self.calls.borrow_mut().push(format!("remote {name} {url}"));
            Ok(())
        }

        fn commit(&self, message: &str) -> crate::git::Result<String> {
            self.calls.borrow_mut().push(format!("commit {message}"));
            Ok("f24fcad".into())
        }

        fn push(&self, opts: &PushOptions) -> crate::git::Result<()> {
            self.calls.borrow_mut().push(format!("push {}", opts.remote_name));
            Ok(())
        }

        fn is_new_repo(&self) -> crate::git::Result<bool> {
            Ok(false)
        }

        fn root(&self) -> crate::git::Result<PathBuf> {
            Ok(self.root.clone())
        }
    }

    /// Lays out a tiny GitOps tree instead of cloning.
    #[derive(Default)]
    struct FakeAccess {
        calls: Calls,
    }

    impl RepositoryAccess for FakeAccess {
        type Repo = FakeRepo;

        fn clone_repo(&self, opts: &CloneOptions) -> crate::git::Result<Self::Repo> {
            self.calls.borrow_mut().push(format!("clone {}", opts.url));
            let storage = DiskStorage::new();
            let files = [
                ("root.yaml", app_yaml("root", "root", false, "apps")),
                ("apps/foo.yaml", app_yaml("dev-foo", "foo", true, "apps/foo")),
                ("apps/foo/kustomization.yaml", "resources:\n- deployment.yaml\n".into()),
            ];
            for (path, content) in files {
                storage
                    .write(&opts.path.join(path), content.as_bytes())
                    .map_err(|err| GitError::Validation(err.to_string()))?;
            }

            Ok(FakeRepo {
                root: opts.path.clone(),
                calls: self.calls.clone(),
            })
        }

        fn init(&self, path: &Path) -> crate::git::Result<Self::Repo> {
            Ok(FakeRepo {
                root: path.to_path_buf(),
                calls: self.calls.clone(),
            })
        }
    }

    #[test]
    fn empty_clone_url_is_rejected() {
        let manager = Manager::new(FakeAccess::default(), "/tmp/argotree");
        let result = manager.add_manifest("", "root.yaml", "foo", b"metadata:\n  name: x\n");
        assert!(matches!(result, Err(ManagerError::Validation(_))));
    }

    #[sealed_test]
    fn add_manifest_commits_and_pushes() -> anyhow::Result<()> {
        let access = FakeAccess::default();
        let calls = access.calls.clone();
        let clone_dir = std::env::current_dir()?.join("clones");
        let manager = Manager::new(access, &clone_dir);

        let file = manager.add_manifest(
            "https://github.com/foo/bar",
            "root.yaml",
            "foo",
            b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )?;
        assert_eq!(file, "settings.yaml");
        assert_eq!(
            *calls.borrow(),
            vec![
                "clone https://github.com/foo/bar",
                "add .",
                "commit Added manifest for 'settings.yaml'",
                "push origin",
            ]
        );

        let clones = std::fs::read_dir(&clone_dir)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(clones.len(), 1);
        let kustomization = std::fs::read_to_string(clones[0].path().join("apps/foo/kustomization.yaml"))?;
        assert!(kustomization.contains("settings.yaml"));

        Ok(())
    }

    #[sealed_test]
    fn unknown_app_does_not_commit() -> anyhow::Result<()> {
        let access = FakeAccess::default();
        let calls = access.calls.clone();
        let manager = Manager::new(access, std::env::current_dir()?.join("clones"));

        let result = manager.add_manifest(
            "https://github.com/foo/bar",
            "root.yaml",
            "nope",
            b"metadata:\n  name: settings\n",
        );
        assert!(matches!(result, Err(ManagerError::Env(EnvError::AppNotFound(_)))));
        assert_eq!(*calls.borrow(), vec!["clone https://github.com/foo/bar"]);

        Ok(())
    }
}
