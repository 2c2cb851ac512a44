// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use anyhow::{anyhow, Result};
use argotree::app::{LABEL_MANAGED_BY, LABEL_NAME, TOOL_NAME};
use git2::{IndexEntry, IndexTime, ObjectType, Repository, RepositoryInitOptions};
use std::path::Path;

/// Git repository built up commit by commit for tests.
pub(crate) struct RepoFixture {
    repo: Repository,
}

impl RepoFixture {
    pub(crate) fn new(path: impl AsRef<Path>, kind: RepoKind) -> Result<Self> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        opts.bare(kind.is_bare());
        let repo = Repository::init_opts(path.as_ref(), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(Self { repo })
    }

    /// Path usable as clone URL.
    pub(crate) fn url(&self) -> String {
        self.repo.path().to_string_lossy().trim_end_matches('/').to_string()
    }

    pub(crate) fn stage_and_commit(
        &self,
        files: &[(&str, &str)],
        message: impl AsRef<str>,
    ) -> Result<()> {
        // INVARIANT: Always use new tree produced by index after staging new entries.
        let mut index = self.repo.index()?;
        for (filename, contents) in files {
            let entry = IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: contents.len() as u32,
                id: self.repo.blob(contents.as_bytes())?,
                flags: 0,
                flags_extended: 0,
                path: filename.as_bytes().to_vec(),
            };
            index.add_frombuffer(&entry, contents.as_bytes())?;
        }
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message.as_ref(),
            &tree,
            &parents,
        )?;

        Ok(())
    }

    /// Tag current HEAD.
    pub(crate) fn tag(&self, name: &str) -> Result<()> {
        let head = self.repo.head()?.peel(ObjectType::Commit)?;
        self.repo.tag_lightweight(name, &head, false)?;
        Ok(())
    }

    /// Create branch at current HEAD and make it the new HEAD.
    pub(crate) fn branch(&self, name: &str) -> Result<()> {
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &head, false)?;
        self.repo.set_head(&format!("refs/heads/{name}"))?;
        Ok(())
    }

    /// Content of file in tree of a branch tip.
    pub(crate) fn read_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let commit = self
            .repo
            .find_reference(&format!("refs/heads/{branch}"))?
            .peel_to_commit()?;
        let Ok(entry) = commit.tree()?.get_path(Path::new(path)) else {
            return Ok(None);
        };
        let blob = entry
            .to_object(&self.repo)?
            .into_blob()
            .map_err(|_| anyhow!("{path} is not a blob"))?;

        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }

    /// Summary line of a branch tip.
    pub(crate) fn tip_message(&self, branch: &str) -> Result<String> {
        let commit = self
            .repo
            .find_reference(&format!("refs/heads/{branch}"))?
            .peel_to_commit()?;

        Ok(commit.summary().unwrap_or_default().to_string())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) enum RepoKind {
    #[default]
    Bare,

    Normal,
}

impl RepoKind {
    pub(crate) fn is_bare(&self) -> bool {
        match self {
            Self::Bare => true,
            Self::Normal => false,
        }
    }
}

/// Render an Application manifest.
pub(crate) fn app_yaml(name: &str, label: &str, managed: bool, path: &str) -> String {
    let managed_by = if managed {
        format!("\n    {LABEL_MANAGED_BY}: {TOOL_NAME}")
    } else {
        String::new()
    };

    format!(
        "apiVersion: argoproj.io/v1alpha1\n\
         kind: Application\n\
         metadata:\n  \
           name: {name}\n  \
           labels:\n    \
             {LABEL_NAME}: {label}{managed_by}\n\
         spec:\n  \
           source:\n    \
             repoURL: https://github.com/foo/bar\n    \
             path: {path}\n  \
           destination:\n    \
             server: https://kubernetes.default.svc\n"
    )
}
