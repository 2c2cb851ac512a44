// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the user settings file that Argotree reads at
//! startup. Every section and field is optional, and missing ones fall back
//! to sensible defaults.
//!
//! # General Layout
//!
//! ```toml
//! [git]
//! username = "bot"
//! password = "$GIT_TOKEN"
//! clone_depth = 1
//!
//! [provider]
//! kind = "github"
//! host = "https://ghe.acme.io"
//!
//! [cluster]
//! kubectl = "kubectl"
//! context = "kind-dev"
//!
//! [workspace]
//! clone_dir = "~/.cache/argotree/clones"
//! ```
//!
//! The `password` and `clone_dir` fields undergo shell expansion, so tokens
//! can be kept in the environment rather than in the file itself.

use crate::{git::Auth, path::default_clone_dir};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// User settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub workspace: WorkspaceSettings,
}

impl Settings {
    /// Load settings file.
    ///
    /// A missing file yields default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return any error of parsing through [`FromStr`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no settings at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Directory to clone repositories into.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if no default can be determined.
    pub fn clone_dir(&self) -> Result<PathBuf> {
        match &self.workspace.clone_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(default_clone_dir()?),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on secret and path fields.
        if let Some(password) = &settings.git.password {
            settings.git.password = Some(expand(password)?);
        }
        if let Some(dir) = &settings.workspace.clone_dir {
            settings.workspace.clone_dir = Some(PathBuf::from(expand(&dir.to_string_lossy())?));
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Git transport settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitSettings {
    /// Username to authenticate with, tool name if unset.
    pub username: Option<String>,

    /// Password or access token to authenticate with.
    pub password: Option<String>,

    /// Shallow clone depth, full history if unset.
    pub clone_depth: Option<i32>,
}

impl GitSettings {
    /// Credentials to use, if a password was configured.
    pub fn auth(&self) -> Option<Auth> {
        self.password.as_ref().map(|password| {
            Auth::new(self.username.clone().unwrap_or_default(), password.clone())
        })
    }
}

/// Hosting provider settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    pub host: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            host: None,
        }
    }
}

/// Cluster access settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ClusterSettings {
    /// Path to kubectl binary.
    #[serde(default = "default_kubectl")]
    pub kubectl: PathBuf,

    /// Kubeconfig context, current context if unset.
    pub context: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            context: None,
        }
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WorkspaceSettings {
    pub clone_dir: Option<PathBuf>,
}

fn default_provider_kind() -> String {
    "github".into()
}

fn default_kubectl() -> PathBuf {
    PathBuf::from("kubectl")
}

fn expand(value: &str) -> Result<String> {
    Ok(shellexpand::full(value)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings {:?}", path.display())]
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

    /// Default locations cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] crate::path::NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
