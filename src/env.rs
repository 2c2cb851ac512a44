// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment application trees.
//!
//! An __environment__ names one root Application manifest inside a GitOps
//! repository, plus a reference to the bootstrap template the environment was
//! created from. Resolving the environment walks the application tree that
//! hangs off that root.
//!
//! # Name Lookup
//!
//! Applications are looked up by their name label. The search is depth
//! first: a node is checked before its children, and children are visited in
//! file name order. The walk descends through managed and unmanaged nodes
//! alike, so an unmanaged chain of applications at the top of the tree never
//! hides the managed applications below it.

use crate::{
    app::{AppError, AppNode},
    path::clean,
    registry::Registry,
    storage::{copy_tree, Storage, StorageError, Workspace},
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Sub-path of a template holding its bootstrap manifests.
pub const BOOTSTRAP_DIR: &str = "bootstrap";

/// Marker file keeping an emptied environment directory tracked by Git.
pub const PLACEHOLDER_FILE: &str = "DUMMY";

/// Directory holding per-environment overlays next to an application base.
const OVERLAYS_DIR: &str = "overlays";

/// Named environment of a GitOps repository.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Environment {
    /// Name of the environment, i.e., its key in the registry.
    #[serde(skip)]
    pub(crate) name: String,

    /// Repository relative path to the root application manifest.
    #[serde(rename = "rootAppPath")]
    pub root_app_path: PathBuf,

    /// Bootstrap template reference in `url[#branch|@tag]` form.
    #[serde(rename = "templateRef")]
    pub template_ref: String,
}

impl Environment {
    /// Construct new environment.
    pub fn new(
        name: impl Into<String>,
        root_app_path: impl Into<PathBuf>,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            root_app_path: root_app_path.into(),
            template_ref: template_ref.into(),
        }
    }

    /// Name of the environment.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Resolve the root application of the environment.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::NotAnApplication`] if the root file holds no
    ///   Application document.
    /// - Return [`EnvError::App`] if the root file cannot be read or decoded.
    pub fn root_application<S>(&self, workspace: &Workspace<S>) -> Result<AppNode>
    where
        S: Storage,
    {
        let path = workspace.resolve(&self.root_app_path);
        AppNode::from_file(workspace.storage(), &path, &self.name)?
            .ok_or(EnvError::NotAnApplication { path })
    }

    /// Find application by name label.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::AppNotFound`] if no application carries the name.
    /// - Return any error of [`Environment::root_application`].
    pub fn get_app<S>(&self, workspace: &Workspace<S>, name: &str) -> Result<AppNode>
    where
        S: Storage,
    {
        let root = self.root_application(workspace)?;
        find_app(workspace, root, name, &mut Vec::new())?
            .ok_or_else(|| EnvError::AppNotFound(name.to_string()))
    }

    /// List leaf applications of the environment.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Environment::root_application`].
    pub fn leaf_applications<S>(&self, workspace: &Workspace<S>) -> Result<Vec<AppNode>>
    where
        S: Storage,
    {
        Ok(self.root_application(workspace)?.leaves(workspace)?)
    }

    /// Location of the bootstrap manifests of the environment template.
    ///
    /// A `#branch` or `@tag` suffix of the template reference becomes a `ref`
    /// query parameter.
    pub fn bootstrap_url(&self) -> String {
        let (base, reference) = split_template_ref(&self.template_ref);
        let url = format!("{base}/{BOOTSTRAP_DIR}");
        match reference {
            Some(reference) => format!("{url}?ref={reference}"),
            None => url,
        }
    }

    /// Remove every managed application of the environment.
    ///
    /// Leaves a placeholder file behind in the root source directory when
    /// everything was uninstalled. Returns whether that was the case.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::Storage`] if the placeholder cannot be written.
    /// - Return any error of [`AppNode::uninstall`].
    #[instrument(skip(self, workspace), fields(env = self.name()), level = "debug")]
    pub fn uninstall<S>(&self, workspace: &Workspace<S>) -> Result<bool>
    where
        S: Storage,
    {
        let root = self.root_application(workspace)?;
        if !root.uninstall(workspace)? {
            info!("environment {} still has applications", self.name);
            return Ok(false);
        }

        let placeholder = workspace.resolve(root.source_path()).join(PLACEHOLDER_FILE);
        workspace.storage().write(&placeholder, b"")?;

        Ok(true)
    }

    /// Add manifest to an application of the environment.
    ///
    /// Returns the file name the manifest was stored under.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Environment::get_app`] or
    ///   [`AppNode::add_manifest`].
    pub fn add_manifest<S>(
        &self,
        workspace: &Workspace<S>,
        app_name: &str,
        manifest: &[u8],
    ) -> Result<String>
    where
        S: Storage,
    {
        let app = self.get_app(workspace, app_name)?;
        Ok(app.add_manifest(workspace, manifest)?)
    }

    /// Tear down the environment's files.
    ///
    /// Nothing is removed from storage yet, but the root application must
    /// still resolve.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Environment::root_application`].
    pub fn cleanup<S>(&self, workspace: &Workspace<S>) -> Result<()>
    where
        S: Storage,
    {
        let root = self.root_application(workspace)?;
        debug!("cleanup of {} keeps {}", self.name, root.path().display());

        Ok(())
    }

    /// Install a managed application from a template into this environment.
    ///
    /// If an application with the same name label already exists anywhere
    /// in the registry, the template's application directory is copied into
    /// an `overlays/<env>` directory next to the existing application's base,
    /// and the template's manifest is pointed at that overlay. Otherwise the
    /// whole application family, i.e., the grandparent directory of the
    /// application's source path, is copied over verbatim.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::Storage`] if copying fails.
    /// - Return [`EnvError::App`] if the base location cannot be determined
    ///   or the manifest cannot be saved.
    /// - Return any error of [`Registry::get_app`] other than
    ///   [`EnvError::AppNotFound`].
    #[instrument(skip(self, registry, source, app), fields(env = self.name(), app = app.name()), level = "debug")]
    pub fn install_application<R, T>(
        &self,
        registry: &Registry<R>,
        source: &Workspace<T>,
        app: &mut AppNode,
    ) -> Result<()>
    where
        R: Storage,
        T: Storage,
    {
        let existing = match registry.get_app(app.label_name()) {
            Ok(existing) => existing,
            Err(EnvError::AppNotFound(_)) => return install_new_app(registry.workspace(), source, app),
            Err(err) => return Err(err),
        };

        let base = existing.base_location(registry.workspace())?;
        let overlay = clean(base.join("..").join(OVERLAYS_DIR).join(&self.name));
        info!(
            "install {} as overlay {}",
            app.label_name(),
            overlay.display()
        );

        copy_tree(
            source.storage(),
            &source.resolve(app.source_path()),
            registry.workspace().storage(),
            &registry.workspace().resolve(&overlay),
        )?;

        app.set_source_path(overlay.to_string_lossy().into_owned());
        Ok(app.save(source)?)
    }
}

/// Split template reference into base URL and optional ref.
///
/// A `#` always separates a branch. Otherwise an `@` after the last `/`
/// separates a tag, so `git@host:org/repo` style URLs keep their user part.
pub(crate) fn split_template_ref(template_ref: &str) -> (&str, Option<&str>) {
    if let Some((base, reference)) = template_ref.split_once('#') {
        return (base, Some(reference));
    }

    let tail = template_ref.rfind('/').map_or(0, |idx| idx + 1);
    match template_ref[tail..].rfind('@') {
        Some(idx) => {
            let at = tail + idx;
            (&template_ref[..at], Some(&template_ref[at + 1..]))
        }
        None => (template_ref, None),
    }
}

fn install_new_app<R, T>(target: &Workspace<R>, source: &Workspace<T>, app: &AppNode) -> Result<()>
where
    R: Storage,
    T: Storage,
{
    let family = clean(Path::new(app.source_path()).join("..").join(".."));
    info!("install new application family {}", family.display());

    Ok(copy_tree(
        source.storage(),
        &source.resolve(&family),
        target.storage(),
        &target.resolve(&family),
    )?)
}

fn find_app<S>(
    workspace: &Workspace<S>,
    node: AppNode,
    name: &str,
    ancestors: &mut Vec<PathBuf>,
) -> Result<Option<AppNode>>
where
    S: Storage,
{
    if node.label_name() == name {
        return Ok(Some(node));
    }

    let children = node.children_within(workspace, ancestors)?;
    ancestors.push(node.path().to_path_buf());
    for child in children {
        if let Some(found) = find_app(workspace, child, name, ancestors)? {
            return Ok(Some(found));
        }
    }
    ancestors.pop();

    Ok(None)
}

/// Environment error types.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// No application carries the requested name label.
    #[error("app not found: {0}")]
    AppNotFound(String),

    /// Root manifest of environment holds no Application document.
    #[error("root manifest {:?} is not an application", path.display())]
    NotAnApplication { path: PathBuf },

    /// Application node operation fails.
    #[error(transparent)]
    App(#[from] AppError),

    /// Storage access fails.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Friendly result alias :3
pub type Result<T, E = EnvError> = std::result::Result<T, E>;
