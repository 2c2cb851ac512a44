// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git hosting provider collaborator.
//!
//! A provider hands out clone URLs for repositories hosted remotely, and can
//! create new ones. Only GitHub is supported for now.

use crate::git::{github::GitHub, Auth};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Hosting service of remote repositories.
pub trait Provider {
    /// Create repository, returning its clone URL.
    fn create_repository(&self, opts: &CreateRepoOptions) -> Result<String>;

    /// Lookup repository, returning its clone URL.
    fn get_repository(&self, opts: &GetRepoOptions) -> Result<String>;
}

/// Supported provider kinds.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProviderKind {
    #[default]
    GitHub,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "github" => Ok(Self::GitHub),
            other => Err(ProviderError::NotSupported(other.to_string())),
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::GitHub => fmt.write_str("github"),
        }
    }
}

/// Options for a new provider.
#[derive(Default, Debug, Clone)]
pub struct ProviderOptions {
    /// Provider kind, e.g., "github".
    pub kind: String,

    pub auth: Option<Auth>,

    /// Self-hosted instance, public service if unset.
    pub host: Option<String>,
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct CreateRepoOptions {
    pub owner: String,
    pub name: String,
    pub private: bool,
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct GetRepoOptions {
    pub owner: String,
    pub name: String,
}

/// Construct provider of the requested kind.
///
/// # Errors
///
/// - Return [`ProviderError::NotSupported`] if kind is unknown.
/// - Return [`ProviderError::Http`] if client cannot be built.
pub fn new_provider(opts: &ProviderOptions) -> Result<Box<dyn Provider>> {
    match opts.kind.parse()? {
        ProviderKind::GitHub => Ok(Box::new(GitHub::new(opts)?)),
    }
}

/// Provider error types.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider kind is unknown.
    #[error("git provider not supported: {0:?}")]
    NotSupported(String),

    /// Repository does not exist or is hidden from caller.
    #[error("git repository not found: {owner}/{name}")]
    NotFound { owner: String, name: String },

    /// Provider answers with an unexpected status.
    #[error("provider request {url} failed with status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    /// Request cannot be sent or answer cannot be decoded.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
