// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cluster and templating collaborators.
//!
//! Bootstrapping an environment needs two things from the outside world: a
//! way to expand the environment template's bootstrap directory into plain
//! manifests, and a way to apply or delete those manifests against a live
//! cluster. Both are modeled as traits so that the registry never cares how
//! either is done. The implementations shipped here drive the `kubectl`
//! binary.

use crate::manifest::split_documents;

use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, info, instrument};

/// Values substituted into templated manifests.
pub type TemplateValues = BTreeMap<String, String>;

/// Apply manifests to a live cluster.
pub trait ClusterApply {
    /// Apply manifests.
    fn apply(&self, manifests: &[String], dry_run: bool) -> Result<()>;

    /// Delete manifests.
    fn delete(&self, manifests: &[String], dry_run: bool) -> Result<()>;

    /// Create namespace.
    ///
    /// Must report an existing namespace as [`KubeError::AlreadyExists`].
    fn create_namespace(&self, name: &str, dry_run: bool) -> Result<()>;
}

/// Expand a template directory into manifests.
pub trait Templater {
    /// Build manifests out of template directory URL and values.
    fn build(&self, url: &str, values: &TemplateValues) -> Result<Vec<String>>;
}

/// Cluster access through the kubectl binary.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: PathBuf,
    context: Option<String>,
}

impl KubectlClient {
    /// Construct new kubectl client.
    pub fn new(binary: impl Into<PathBuf>, context: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            context,
        }
    }

    fn args<'a>(&self, args: impl IntoIterator<Item = &'a str>, dry_run: bool) -> Vec<OsString> {
        let mut out: Vec<OsString> = Vec::new();
        if let Some(context) = &self.context {
            out.push("--context".into());
            out.push(context.into());
        }
        out.extend(args.into_iter().map(OsString::from));
        if dry_run {
            out.push("--dry-run=client".into());
        }

        out
    }
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new("kubectl", None)
    }
}

impl ClusterApply for KubectlClient {
    #[instrument(skip(self, manifests), level = "debug")]
    fn apply(&self, manifests: &[String], dry_run: bool) -> Result<()> {
        info!("apply {} manifests", manifests.len());
        let output = syscall_with_input(
            &self.binary,
            self.args(["apply", "-f", "-"], dry_run),
            join_documents(manifests),
        )?;
        debug!("{output}");

        Ok(())
    }

    #[instrument(skip(self, manifests), level = "debug")]
    fn delete(&self, manifests: &[String], dry_run: bool) -> Result<()> {
        info!("delete {} manifests", manifests.len());
        let output = syscall_with_input(
            &self.binary,
            self.args(["delete", "--ignore-not-found", "-f", "-"], dry_run),
            join_documents(manifests),
        )?;
        debug!("{output}");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn create_namespace(&self, name: &str, dry_run: bool) -> Result<()> {
        match syscall_with_input(
            &self.binary,
            self.args(["create", "namespace", name], dry_run),
            String::new(),
        ) {
            Ok(output) => {
                debug!("{output}");
                Ok(())
            }
            Err(KubeError::Command { message, .. }) if message.contains("AlreadyExists") => {
                Err(KubeError::AlreadyExists(name.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

/// Template expansion through `kubectl kustomize`.
///
/// After kustomize has built the manifests, every `${key}` placeholder is
/// replaced by the matching template value.
#[derive(Debug, Clone)]
pub struct KustomizeBuilder {
    binary: PathBuf,
}

impl KustomizeBuilder {
    /// Construct new kustomize builder.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for KustomizeBuilder {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl Templater for KustomizeBuilder {
    #[instrument(skip(self, values), level = "debug")]
    fn build(&self, url: &str, values: &TemplateValues) -> Result<Vec<String>> {
        let output = syscall_with_input(&self.binary, ["kustomize", url], String::new())?;
        let rendered = substitute(&output, values);

        Ok(split_documents(&rendered)
            .into_iter()
            .map(|doc| doc.trim_start_matches('\n').to_string())
            .collect())
    }
}

/// Replace `${key}` placeholders with template values.
pub fn substitute(text: &str, values: &TemplateValues) -> String {
    values.iter().fold(text.to_string(), |acc, (key, value)| {
        acc.replace(&format!("${{{key}}}"), value)
    })
}

fn join_documents(manifests: &[String]) -> String {
    manifests.join("\n---\n")
}

fn syscall_with_input(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    input: String,
) -> Result<String> {
    let mut child = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| KubeError::Spawn {
            source: err,
            command: cmd.as_ref().to_string_lossy().into_owned(),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).map_err(|err| KubeError::Spawn {
            source: err,
            command: cmd.as_ref().to_string_lossy().into_owned(),
        })?;
    }

    let output = child.wait_with_output().map_err(|err| KubeError::Spawn {
        source: err,
        command: cmd.as_ref().to_string_lossy().into_owned(),
    })?;

    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    if !output.status.success() {
        return Err(KubeError::Command {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            message: String::from_utf8_lossy(output.stderr.as_slice())
                .trim_end()
                .to_string(),
        });
    }

    Ok(stdout)
}

/// Cluster collaborator error types.
#[derive(Debug, thiserror::Error)]
pub enum KubeError {
    /// Object to create already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// External command cannot be run.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// External command reports failure.
    #[error("command {command:?} failed:\n{message}")]
    Command { command: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = KubeError> = std::result::Result<T, E>;
