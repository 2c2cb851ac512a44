// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application tree nodes.
//!
//! An [`AppNode`] is one parsed Application manifest together with the file
//! it was read from and the name of the environment it belongs to. Nodes are
//! never cached. They are produced fresh from storage by every resolution,
//! and only live as long as the call that resolved them.
//!
//! # Tree Shape
//!
//! The children of a node are the Application manifests that live directly
//! inside the node's source directory. A node with no children is a
//! __leaf__. Nodes carrying the `app.kubernetes.io/managed-by: argotree`
//! label are __managed__, and only managed nodes are ever uninstalled.

use crate::{
    kustomize::{self, KustomizeError, KUSTOMIZATION_FILE},
    manifest::{self, Application, ManifestError},
    path::clean,
    storage::{is_manifest_file, Storage, StorageError, Workspace},
};

use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Identifier used for the managed-by label and other tool defaults.
pub const TOOL_NAME: &str = "argotree";

/// Label asserting which tool owns an application.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label naming an application across environments.
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// One node of the application tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AppNode {
    document: Application,
    path: PathBuf,
    env: String,
}

impl AppNode {
    /// Construct new node from a parsed document.
    pub fn new(document: Application, path: impl Into<PathBuf>, env: impl Into<String>) -> Self {
        Self {
            document,
            path: path.into(),
            env: env.into(),
        }
    }

    /// Read node from a manifest file.
    ///
    /// Returns `None` if the file holds no Application document.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Storage`] if file cannot be read.
    /// - Return [`AppError::Manifest`] if file cannot be decoded.
    pub fn from_file<S>(storage: &S, path: &Path, env: &str) -> Result<Option<Self>>
    where
        S: Storage + ?Sized,
    {
        let data = storage.read(path)?;
        let document = manifest::parse_application(path, &data)?;

        Ok(document.map(|document| Self::new(document, path, env)))
    }

    /// Parsed Application document.
    pub fn document(&self) -> &Application {
        &self.document
    }

    /// Value of `metadata.name`.
    pub fn name(&self) -> &str {
        self.document.metadata.name.as_str()
    }

    /// File the node was read from.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Name of the environment the node was resolved for.
    pub fn env(&self) -> &str {
        self.env.as_str()
    }

    /// Check if node is owned by argotree.
    pub fn is_managed(&self) -> bool {
        self.label_value(LABEL_MANAGED_BY) == TOOL_NAME
    }

    /// Name label of node.
    ///
    /// Differs from `metadata.name`. The name label identifies the same
    /// application across environments no matter which file it lives in.
    pub fn label_name(&self) -> &str {
        self.label_value(LABEL_NAME)
    }

    /// Repository relative source path of node.
    pub fn source_path(&self) -> &str {
        self.document.spec.source.path.as_str()
    }

    /// Point node at a new source path.
    ///
    /// Only changes the in-memory document, call [`AppNode::save`] to keep
    /// the manifest file in sync.
    pub fn set_source_path(&mut self, path: impl Into<String>) {
        self.document.spec.source.path = path.into();
    }

    /// Absolute path of the kustomization colocated with node.
    pub fn kustomization_path<S>(&self, workspace: &Workspace<S>) -> PathBuf
    where
        S: Storage,
    {
        workspace.resolve(self.source_path()).join(KUSTOMIZATION_FILE)
    }

    /// Repository relative location of the base configuration of node.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Kustomize`] if kustomization cannot be read or
    ///   lists no resources.
    pub fn base_location<S>(&self, workspace: &Workspace<S>) -> Result<PathBuf>
    where
        S: Storage,
    {
        let base = kustomize::base_resource(workspace.storage(), &self.kustomization_path(workspace))?;
        Ok(clean(Path::new(self.source_path()).join(base)))
    }

    /// List child application nodes.
    ///
    /// Files that fail to parse, or hold no Application, are skipped. So is
    /// a node's own manifest if it lives inside its own source directory.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Storage`] if the source directory cannot be
    ///   listed.
    pub fn children<S>(&self, workspace: &Workspace<S>) -> Result<Vec<AppNode>>
    where
        S: Storage,
    {
        self.children_within(workspace, &[])
    }

    /// List child application nodes that do not lead back into `ancestors`.
    ///
    /// A child whose manifest is the node itself or one of its ancestors
    /// would make the tree infinite, so it is logged and skipped.
    pub(crate) fn children_within<S>(
        &self,
        workspace: &Workspace<S>,
        ancestors: &[PathBuf],
    ) -> Result<Vec<AppNode>>
    where
        S: Storage,
    {
        let dir = workspace.resolve(self.source_path());
        let mut children = Vec::new();
        for file in workspace.storage().list_files(&dir)? {
            if !is_manifest_file(&file) {
                continue;
            }

            if file == self.path || ancestors.contains(&file) {
                warn!(
                    "skip {} of {}, it refers back to its ancestors",
                    file.display(),
                    self.path.display()
                );
                continue;
            }

            match Self::from_file(workspace.storage(), &file, &self.env) {
                Ok(Some(child)) => children.push(child),
                Ok(None) => debug!("{} holds no application", file.display()),
                Err(err) => warn!("file is not an application manifest {}: {err}", file.display()),
            }
        }

        Ok(children)
    }

    /// List leaf nodes of the subtree rooted at node.
    ///
    /// A node without children is its own single leaf.
    ///
    /// # Errors
    ///
    /// - Return any error of [`AppNode::children`].
    pub fn leaves<S>(&self, workspace: &Workspace<S>) -> Result<Vec<AppNode>>
    where
        S: Storage,
    {
        self.leaves_within(workspace, &mut Vec::new())
    }

    fn leaves_within<S>(
        &self,
        workspace: &Workspace<S>,
        ancestors: &mut Vec<PathBuf>,
    ) -> Result<Vec<AppNode>>
    where
        S: Storage,
    {
        let children = self.children_within(workspace, ancestors)?;
        if children.is_empty() {
            return Ok(vec![self.clone()]);
        }

        ancestors.push(self.path.clone());
        let mut leaves = Vec::new();
        for child in children {
            leaves.extend(child.leaves_within(workspace, ancestors)?);
        }
        ancestors.pop();

        Ok(leaves)
    }

    /// Uninstall every managed child of node.
    ///
    /// A child is removed, i.e., its manifest file is deleted, only after its
    /// own uninstall reports that it was fully uninstalled. Returns `true`
    /// only if every child was removed, which is trivially the case for a
    /// node without children.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Storage`] if a manifest file cannot be removed.
    /// - Return any error of [`AppNode::children`].
    #[instrument(skip(self, workspace), fields(app = self.name()), level = "debug")]
    pub fn uninstall<S>(&self, workspace: &Workspace<S>) -> Result<bool>
    where
        S: Storage,
    {
        self.uninstall_within(workspace, &mut Vec::new())
    }

    fn uninstall_within<S>(
        &self,
        workspace: &Workspace<S>,
        ancestors: &mut Vec<PathBuf>,
    ) -> Result<bool>
    where
        S: Storage,
    {
        let children = self.children_within(workspace, ancestors)?;
        ancestors.push(self.path.clone());
        let mut removed = 0;
        for child in &children {
            if !child.is_managed() {
                debug!("keep unmanaged application {}", child.name());
                continue;
            }

            if child.uninstall_within(workspace, ancestors)? {
                info!("remove application {}", child.path().display());
                workspace.storage().remove_file(child.path())?;
                removed += 1;
            }
        }
        ancestors.pop();

        Ok(children.len() == removed)
    }

    /// Add manifest to node's source directory and register it.
    ///
    /// The manifest is written as `<metadata.name>.yaml`, and the file name
    /// appended to the colocated kustomization. Returns the file name.
    ///
    /// A failure to update the kustomization leaves the written manifest
    /// behind unregistered.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Manifest`] if manifest has no usable name.
    /// - Return [`AppError::Storage`] if manifest cannot be written.
    /// - Return [`AppError::Kustomize`] if kustomization cannot be updated.
    #[instrument(skip(self, workspace, manifest), fields(app = self.name()), level = "debug")]
    pub fn add_manifest<S>(&self, workspace: &Workspace<S>, manifest: &[u8]) -> Result<String>
    where
        S: Storage,
    {
        let name = manifest::manifest_name(Path::new("<manifest>"), manifest)?;
        let file_name = format!("{name}.yaml");
        let target = workspace.resolve(self.source_path()).join(&file_name);

        info!("add manifest {}", target.display());
        workspace.storage().write(&target, manifest)?;
        kustomize::append_resource(
            workspace.storage(),
            &self.kustomization_path(workspace),
            &file_name,
        )?;

        Ok(file_name)
    }

    /// Write node back to the file it was read from.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Manifest`] if node cannot be serialized.
    /// - Return [`AppError::Storage`] if file cannot be written.
    pub fn save<S>(&self, workspace: &Workspace<S>) -> Result<()>
    where
        S: Storage,
    {
        let data = manifest::to_yaml(&self.path, &self.document)?;
        Ok(workspace.storage().write(&self.path, data.as_bytes())?)
    }

    fn label_value(&self, label: &str) -> &str {
        self.document
            .metadata
            .labels
            .get(label)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Application node error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Manifest decoding or encoding fails.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Kustomization manipulation fails.
    #[error(transparent)]
    Kustomize(#[from] KustomizeError),

    /// Storage access fails.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Friendly result alias :3
pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    /// Render an Application manifest for test fixtures.
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

    fn root(workspace: &Workspace<MemoryStorage>) -> AppNode {
        AppNode::from_file(workspace.storage(), &workspace.resolve("root.yaml"), "dev")
            .expect("root readable")
            .expect("root is application")
    }

    fn names(nodes: &[AppNode]) -> Vec<&str> {
        nodes.iter().map(AppNode::name).collect()
    }

    #[test]
    fn leaves_of_childless_root_is_root() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([("/repo/root.yaml", app_yaml("root", "root", false, "apps"))]),
        );

        let root = root(&workspace);
        assert_eq!(root.leaves(&workspace)?, vec![root.clone()]);

        Ok(())
    }

    #[test]
    fn children_skip_broken_and_foreign_files() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", false, "apps")),
                ("/repo/apps/app1.yaml", app_yaml("leaf", "leaf", true, "apps/leaf")),
                ("/repo/apps/broken.yaml", "foo".to_string()),
                ("/repo/apps/kustomization.yaml", "resources:\n- app1.yaml\n".to_string()),
                ("/repo/apps/README.md", "# not yaml".to_string()),
            ]),
        );

        let children = root(&workspace).children(&workspace)?;
        assert_eq!(names(&children), vec!["leaf"]);
        assert_eq!(children[0].path(), Path::new("/repo/apps/app1.yaml"));
        assert_eq!(children[0].env(), "dev");

        Ok(())
    }

    #[test]
    fn leaves_of_two_level_tree() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", false, "apps")),
                ("/repo/apps/app1.yaml", app_yaml("child1", "child1", false, "apps/third")),
                ("/repo/apps/app2.yaml", app_yaml("leaf2", "leaf2", true, "apps/leaf2")),
                ("/repo/apps/third/app3.yaml", app_yaml("leaf1", "leaf1", true, "apps/leaf1")),
            ]),
        );

        let root = root(&workspace);
        assert_eq!(names(&root.children(&workspace)?), vec!["child1", "leaf2"]);
        assert_eq!(names(&root.leaves(&workspace)?), vec!["leaf1", "leaf2"]);

        Ok(())
    }

    #[test]
    fn uninstall_removes_managed_children() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", false, "apps")),
                ("/repo/apps/app1.yaml", app_yaml("a", "a", true, "apps/a")),
                ("/repo/apps/app2.yaml", app_yaml("b", "b", true, "apps/b")),
            ]),
        );

        assert!(root(&workspace).uninstall(&workspace)?);
        assert_eq!(workspace.storage().paths(), vec![PathBuf::from("/repo/root.yaml")]);

        Ok(())
    }

    #[test]
    fn uninstall_keeps_unmanaged_children() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", false, "apps")),
                ("/repo/apps/app1.yaml", app_yaml("a", "a", true, "apps/a")),
                ("/repo/apps/app2.yaml", app_yaml("b", "b", false, "apps/b")),
            ]),
        );

        assert!(!root(&workspace).uninstall(&workspace)?);
        assert_eq!(
            workspace.storage().paths(),
            vec![PathBuf::from("/repo/apps/app2.yaml"), PathBuf::from("/repo/root.yaml")]
        );

        Ok(())
    }

    #[test]
    fn add_manifest_writes_and_registers() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", true, "apps/foo/overlays/dev")),
                (
                    "/repo/apps/foo/overlays/dev/kustomization.yaml",
                    "resources:\n- ../../base\n".to_string(),
                ),
            ]),
        );
        let manifest = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: foo\n";

        let root = root(&workspace);
        assert_eq!(root.add_manifest(&workspace, manifest)?, "foo.yaml");
        assert_eq!(root.add_manifest(&workspace, manifest)?, "foo.yaml");

        let written = workspace
            .storage()
            .read(Path::new("/repo/apps/foo/overlays/dev/foo.yaml"))?;
        assert_eq!(written, manifest.to_vec());

        let kustomization = kustomize::read(workspace.storage(), &root.kustomization_path(&workspace))?;
        assert_eq!(kustomization.resources, vec!["../../base", "foo.yaml", "foo.yaml"]);

        Ok(())
    }

    #[test]
    fn add_manifest_without_kustomization_leaves_file_behind() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([("/repo/root.yaml", app_yaml("root", "root", true, "apps"))]),
        );

        let result = root(&workspace).add_manifest(&workspace, b"metadata:\n  name: foo\n");
        assert!(matches!(
            result,
            Err(AppError::Kustomize(KustomizeError::NotFound { .. }))
        ));
        assert!(workspace.storage().exists(Path::new("/repo/apps/foo.yaml")));

        Ok(())
    }

    #[test]
    fn save_after_source_path_change() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([("/repo/root.yaml", app_yaml("root", "root", true, "apps"))]),
        );

        let mut root = root(&workspace);
        root.set_source_path("apps/foo/overlays/prod");
        root.save(&workspace)?;

        let reread = AppNode::from_file(workspace.storage(), root.path(), "dev")?;
        assert_eq!(reread.map(|node| node.source_path().to_string()).as_deref(), Some("apps/foo/overlays/prod"));

        Ok(())
    }

    #[test]
    fn add_manifest_rejects_escaping_name() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", true, "apps/foo")),
                ("/repo/apps/foo/kustomization.yaml", "resources:\n- base.yaml\n".to_string()),
            ]),
        );
        let before = workspace.storage().paths();

        let result = root(&workspace).add_manifest(
            &workspace,
            b"kind: ConfigMap\nmetadata:\n  name: ../../../argotree\n",
        );
        assert!(matches!(
            result,
            Err(AppError::Manifest(ManifestError::InvalidName { .. }))
        ));
        assert_eq!(workspace.storage().paths(), before);

        let kustomization =
            kustomize::read(workspace.storage(), Path::new("/repo/apps/foo/kustomization.yaml"))?;
        assert_eq!(kustomization.resources, vec!["base.yaml"]);

        Ok(())
    }

    #[test]
    fn add_manifest_names_file_after_first_document() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", true, "apps")),
                ("/repo/apps/kustomization.yaml", "resources: []\n".to_string()),
            ]),
        );
        let manifest = b"metadata:\n  name: first\n---\nmetadata:\n  name: second\n";

        assert_eq!(root(&workspace).add_manifest(&workspace, manifest)?, "first.yaml");
        assert!(workspace.storage().exists(Path::new("/repo/apps/first.yaml")));

        Ok(())
    }

    #[test]
    fn self_referencing_node_is_a_leaf() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([("/repo/apps/root.yaml", app_yaml("root", "root", false, "apps"))]),
        );

        let root = AppNode::from_file(workspace.storage(), Path::new("/repo/apps/root.yaml"), "dev")?
            .expect("root is application");
        assert!(root.children(&workspace)?.is_empty());
        assert_eq!(root.leaves(&workspace)?, vec![root.clone()]);
        assert!(root.uninstall(&workspace)?);
        assert_eq!(workspace.storage().paths(), vec![PathBuf::from("/repo/apps/root.yaml")]);

        Ok(())
    }

    #[test]
    fn cycle_between_nodes_terminates() -> anyhow::Result<()> {
        let workspace = Workspace::new(
            "/repo",
            MemoryStorage::with_files([
                ("/repo/root.yaml", app_yaml("root", "root", false, "a")),
                ("/repo/a/a.yaml", app_yaml("a", "a", true, "b")),
                ("/repo/b/b.yaml", app_yaml("b", "b", true, "a")),
            ]),
        );

        let root = root(&workspace);
        assert_eq!(names(&root.leaves(&workspace)?), vec!["b"]);
        assert!(root.uninstall(&workspace)?);
        assert_eq!(workspace.storage().paths(), vec![PathBuf::from("/repo/root.yaml")]);

        Ok(())
    }
}
