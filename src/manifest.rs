// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application manifest layout and parsing.
//!
//! A GitOps repository managed by argotree is a tree of Argo CD
//! __Application__ manifests. Each manifest points at a source path, and that
//! source path may in turn hold more Application manifests, which become the
//! children of the manifest that pointed at them.
//!
//! # Document Decoding
//!
//! Manifest files frequently carry more than one YAML document, and not every
//! document is an Application, e.g., an `AppProject` is often shipped next to
//! the Application that uses it. Thus, decoding happens in two phases. First,
//! each document is decoded generically to sniff out its `kind`. Only
//! documents whose kind is `Application` are decoded a second time into the
//! typed [`Application`] layout.
//!
//! The first Application document of a file wins. Any Application documents
//! that follow it in the same file are ignored.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Kind of document that forms the manifest tree.
pub const APPLICATION_KIND: &str = "Application";

/// Separator between documents in a multi-document file.
const DOCUMENT_SEPARATOR: &str = "\n---";

/// Argo CD application manifest.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub api_version: String,

    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: ApplicationSpec,

    /// Any other top-level field, e.g., `status`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Object metadata of a manifest.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Application specification.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    pub source: ApplicationSource,

    #[serde(default)]
    pub destination: ApplicationDestination,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Where the application content lives.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,

    /// Repository relative path holding the application content.
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_revision: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Cluster and namespace the application deploys into.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Generic envelope used to sniff the kind of a document.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    kind: String,
}

/// Generic envelope used to find the name of an arbitrary manifest.
#[derive(Debug, Deserialize)]
struct NamedEnvelope {
    #[serde(default)]
    metadata: Option<NamedMeta>,
}

#[derive(Debug, Deserialize)]
struct NamedMeta {
    #[serde(default)]
    name: Option<String>,
}

/// Split raw text into its non-empty YAML documents.
pub fn split_documents(text: &str) -> Vec<&str> {
    text.split(DOCUMENT_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
        .collect()
}

/// Parse the first Application document out of raw file content.
///
/// Returns `None` if the content holds no Application document.
///
/// # Errors
///
/// - Return [`ManifestError::Decode`] if ANY document fails to decode, even
///   one that is not an Application.
pub fn parse_application(path: &Path, data: &[u8]) -> Result<Option<Application>> {
    let text = String::from_utf8_lossy(data);
    for segment in split_documents(&text) {
        let value: serde_yaml::Value =
            serde_yaml::from_str(segment).map_err(|err| decode_error(path, err))?;

        // INVARIANT: Comment-only documents decode to null, skip them.
        if value.is_null() {
            continue;
        }

        let envelope: Envelope =
            serde_yaml::from_value(value.clone()).map_err(|err| decode_error(path, err))?;
        if envelope.kind != APPLICATION_KIND {
            continue;
        }

        let application: Application =
            serde_yaml::from_value(value).map_err(|err| decode_error(path, err))?;
        return Ok(Some(application));
    }

    Ok(None)
}

/// Extract `metadata.name` of an arbitrary manifest.
///
/// The name is taken from the first document that is not empty. It must be a
/// valid Kubernetes object name, i.e., a DNS-1123 subdomain, so it can never
/// name a file outside of the directory it gets written into.
///
/// # Errors
///
/// - Return [`ManifestError::Decode`] if manifest cannot be decoded.
/// - Return [`ManifestError::MissingName`] if manifest has no name.
/// - Return [`ManifestError::InvalidName`] if name is not a valid object
///   name.
pub fn manifest_name(path: &Path, data: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(data);
    let mut envelope = None;
    for segment in split_documents(&text) {
        let value: serde_yaml::Value =
            serde_yaml::from_str(segment).map_err(|err| decode_error(path, err))?;
        if value.is_null() {
            continue;
        }

        let named: NamedEnvelope =
            serde_yaml::from_value(value).map_err(|err| decode_error(path, err))?;
        envelope = Some(named);
        break;
    }

    let name = envelope
        .and_then(|envelope| envelope.metadata)
        .and_then(|meta| meta.name)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ManifestError::MissingName {
            path: path.to_path_buf(),
        })?;

    if !is_object_name(&name) {
        return Err(ManifestError::InvalidName {
            path: path.to_path_buf(),
            name,
        });
    }

    Ok(name)
}

/// Check name against the DNS-1123 subdomain rules of Kubernetes.
///
/// At most 253 characters of dot separated labels. Each label is non-empty,
/// made of lowercase alphanumerics or '-', and starts and ends with an
/// alphanumeric.
pub fn is_object_name(name: &str) -> bool {
    const MAX_LEN: usize = 253;

    if name.is_empty() || name.len() > MAX_LEN {
        return false;
    }

    name.split('.').all(|label| {
        let bytes = label.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                is_lower_alnum(*first)
                    && is_lower_alnum(*last)
                    && bytes.iter().all(|b| is_lower_alnum(*b) || *b == b'-')
            }
            _ => false,
        }
    })
}

fn is_lower_alnum(byte: u8) -> bool {
    byte.is_ascii_lowercase() || byte.is_ascii_digit()
}

/// Serialize an application back into YAML.
///
/// # Errors
///
/// - Return [`ManifestError::Encode`] if serialization fails.
pub fn to_yaml(path: &Path, application: &Application) -> Result<String> {
    serde_yaml::to_string(application).map_err(|err| ManifestError::Encode {
        source: err,
        path: path.to_path_buf(),
    })
}

fn decode_error(path: &Path, source: serde_yaml::Error) -> ManifestError {
    ManifestError::Decode {
        source,
        path: path.to_path_buf(),
    }
}

/// Manifest parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Document cannot be decoded.
    #[error("failed to unmarshal object in {:?}", path.display())]
    Decode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Document cannot be encoded.
    #[error("failed to marshal object for {:?}", path.display())]
    Encode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Manifest lacks `metadata.name`.
    #[error("manifest {:?} has no metadata.name", path.display())]
    MissingName { path: PathBuf },

    /// Manifest name is not a valid object name.
    #[error("manifest {:?} has invalid metadata.name {name:?}", path.display())]
    InvalidName { path: PathBuf, name: String },
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
