// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Kustomization resource list handling.
//!
//! Every application source directory carries a `kustomization.yaml` file.
//! Its `resources` list names the files that kustomize assembles into the
//! final set of manifests for the application. The first entry of that list
//! is the __base__ of the application, i.e., the shared configuration that
//! per-environment overlays are layered on top of.
//!
//! Only the resource list is interpreted. Every other field of the file is
//! carried through a read-modify-write cycle untouched.

use crate::storage::{Storage, StorageError};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::debug;

/// File name of the kustomization colocated with an application.
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Kustomization file layout.
#[derive(Default, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Ordered listing of resource file names.
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Kustomization {
    /// Append resource to the end of the resource list.
    ///
    /// No de-duplication is performed, appending the same name twice lists
    /// it twice.
    pub fn push_resource(&mut self, name: impl Into<String>) {
        self.resources.push(name.into());
    }
}

/// Read kustomization file.
///
/// # Errors
///
/// - Return [`KustomizeError::NotFound`] if file does not exist.
/// - Return [`KustomizeError::Decode`] if file is malformed.
/// - Return [`KustomizeError::Storage`] if file cannot be read.
pub fn read<S>(storage: &S, path: &Path) -> Result<Kustomization>
where
    S: Storage + ?Sized,
{
    let data = storage.read(path).map_err(|err| match err {
        StorageError::NotFound { .. } => KustomizeError::NotFound {
            path: path.to_path_buf(),
        },
        other => KustomizeError::Storage(other),
    })?;

    serde_yaml::from_slice(&data).map_err(|err| KustomizeError::Decode {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Write kustomization file.
///
/// # Errors
///
/// - Return [`KustomizeError::Encode`] if serialization fails.
/// - Return [`KustomizeError::Storage`] if file cannot be written.
pub fn write<S>(storage: &S, path: &Path, kustomization: &Kustomization) -> Result<()>
where
    S: Storage + ?Sized,
{
    let data = serde_yaml::to_string(kustomization).map_err(|err| KustomizeError::Encode {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(storage.write(path, data.as_bytes())?)
}

/// Edit kustomization file.
///
/// Read current file into a [`Kustomization`], let the editor change it,
/// then write the result back.
///
/// # Errors
///
/// - Return any error of [`read`] or [`write`].
pub fn edit<S, E>(storage: &S, path: &Path, editor: E) -> Result<()>
where
    S: Storage + ?Sized,
    E: FnOnce(&mut Kustomization),
{
    let mut kustomization = read(storage, path)?;
    editor(&mut kustomization);
    write(storage, path, &kustomization)
}

/// Append resource name to kustomization file.
///
/// # Errors
///
/// - Return any error of [`edit`].
pub fn append_resource<S>(storage: &S, path: &Path, name: &str) -> Result<()>
where
    S: Storage + ?Sized,
{
    debug!("append {name} to {}", path.display());
    edit(storage, path, |kustomization| kustomization.push_resource(name))
}

/// Read first resource of kustomization file.
///
/// # Errors
///
/// - Return [`KustomizeError::EmptyResources`] if resource list is empty.
/// - Return any error of [`read`].
pub fn base_resource<S>(storage: &S, path: &Path) -> Result<String>
where
    S: Storage + ?Sized,
{
    read(storage, path)?
        .resources
        .into_iter()
        .next()
        .ok_or_else(|| KustomizeError::EmptyResources {
            path: path.to_path_buf(),
        })
}

/// Kustomization error types.
#[derive(Debug, thiserror::Error)]
pub enum KustomizeError {
    /// Kustomization file does not exist.
    #[error("kustomization {:?} does not exist", path.display())]
    NotFound { path: PathBuf },

    /// Kustomization file is malformed.
    #[error("failed to decode kustomization {:?}", path.display())]
    Decode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Kustomization cannot be serialized.
    #[error("failed to encode kustomization {:?}", path.display())]
    Encode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Kustomization lists no resources to derive a base from.
    #[error("kustomization {:?} lists no resources", path.display())]
    EmptyResources { path: PathBuf },

    /// Storage access fails.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Friendly result alias :3
pub type Result<T, E = KustomizeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const PATH: &str = "/repo/apps/foo/overlays/dev/kustomization.yaml";

    fn storage() -> MemoryStorage {
        MemoryStorage::with_files([(
            PATH,
            indoc! {r#"
                apiVersion: kustomize.config.k8s.io/v1beta1
                kind: Kustomization
                namePrefix: dev-
                resources:
                - ../../base
            "#},
        )])
    }

    #[test]
    fn append_keeps_other_fields() -> anyhow::Result<()> {
        let storage = storage();
        append_resource(&storage, Path::new(PATH), "foo.yaml")?;

        let result = read(&storage, Path::new(PATH))?;
        assert_eq!(result.resources, vec!["../../base", "foo.yaml"]);
        assert_eq!(result.kind.as_deref(), Some("Kustomization"));
        assert_eq!(
            result.extra.get("namePrefix"),
            Some(&serde_yaml::Value::from("dev-"))
        );

        Ok(())
    }

    #[test]
    fn append_twice_duplicates() -> anyhow::Result<()> {
        let storage = storage();
        append_resource(&storage, Path::new(PATH), "foo.yaml")?;
        append_resource(&storage, Path::new(PATH), "foo.yaml")?;

        let result = read(&storage, Path::new(PATH))?;
        assert_eq!(result.resources, vec!["../../base", "foo.yaml", "foo.yaml"]);

        Ok(())
    }

    #[test]
    fn base_resource_is_first_entry() -> anyhow::Result<()> {
        let storage = storage();
        append_resource(&storage, Path::new(PATH), "extra.yaml")?;
        assert_eq!(base_resource(&storage, Path::new(PATH))?, "../../base");

        let empty = MemoryStorage::with_files([(PATH, "resources: []\n")]);
        let result = base_resource(&empty, Path::new(PATH));
        assert!(matches!(result, Err(KustomizeError::EmptyResources { .. })));

        Ok(())
    }

    #[test]
    fn read_missing_and_malformed() {
        let storage = MemoryStorage::with_files([(PATH, "resources: [unterminated")]);

        let result = read(&storage, Path::new("/repo/nope/kustomization.yaml"));
        assert!(matches!(result, Err(KustomizeError::NotFound { .. })));

        let result = read(&storage, Path::new(PATH));
        assert!(matches!(result, Err(KustomizeError::Decode { .. })));
    }
}
