// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment registry management.
//!
//! Argotree groups the environments of a GitOps repository together into one
//! place called the __registry__. The registry is a single YAML file named
//! `argotree.yaml` at the top-level of the repository.
//!
//! # Registry Layout
//!
//! ```yaml
//! version: "1.0"
//! environments:
//!   dev:
//!     rootAppPath: argocd-apps/dev.yaml
//!     templateRef: https://github.com/foo/template#main
//! ```
//!
//! Environment names are unique keys. The order in which environments were
//! added is kept, and the first environment anchors where the bootstrap
//! applications of every later environment are placed.
//!
//! # Mutation
//!
//! Adding or deleting an environment persists the registry as the last step
//! that touches the repository. Cluster side effects come after the persist,
//! thus a cluster failure leaves the registry updated while the cluster is
//! not. Nothing is retried.

use crate::{
    app::{AppNode, TOOL_NAME},
    env::{EnvError, Environment},
    kube::{ClusterApply, KubeError, TemplateValues, Templater},
    storage::{copy_tree, Storage, StorageError, Workspace},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Current registry format version.
pub const REGISTRY_VERSION: &str = "1.0";

/// Name of registry file at repository top-level.
pub fn registry_file_name() -> String {
    format!("{TOOL_NAME}.yaml")
}

/// Registry file layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RegistryDocument {
    pub version: String,

    #[serde(default)]
    pub environments: IndexMap<String, Environment>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.into(),
            environments: IndexMap::new(),
        }
    }
}

/// Environment registry of a repository.
#[derive(Debug)]
pub struct Registry<S = crate::storage::DiskStorage>
where
    S: Storage,
{
    workspace: Workspace<S>,
    document: RegistryDocument,
}

impl<S> Registry<S>
where
    S: Storage,
{
    /// Construct new empty registry for workspace.
    ///
    /// Nothing is written until [`Registry::persist`] is called.
    pub fn create(workspace: Workspace<S>) -> Self {
        Self {
            workspace,
            document: RegistryDocument::default(),
        }
    }

    /// Load registry of workspace.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::ConfigNotFound`] if registry file is missing.
    /// - Return [`RegistryError::Decode`] if registry file is malformed.
    /// - Return [`RegistryError::Storage`] if registry file cannot be read.
    #[instrument(skip(workspace), fields(root = %workspace.root().display()), level = "debug")]
    pub fn load(workspace: Workspace<S>) -> Result<Self> {
        let path = workspace.resolve(registry_file_name());
        let data = workspace.storage().read(&path).map_err(|err| match err {
            StorageError::NotFound { path } => RegistryError::ConfigNotFound { path },
            other => RegistryError::Storage(other),
        })?;

        let mut document: RegistryDocument =
            serde_yaml::from_slice(&data).map_err(|err| RegistryError::Decode {
                source: err,
                path: path.clone(),
            })?;

        // INVARIANT: Environment names always match their registry key.
        for (name, env) in document.environments.iter_mut() {
            env.name = name.clone();
        }

        debug!("loaded {} environments", document.environments.len());
        Ok(Self {
            workspace,
            document,
        })
    }

    /// Write registry to its file.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::Encode`] if serialization fails.
    /// - Return [`RegistryError::Storage`] if registry file cannot be written.
    pub fn persist(&self) -> Result<()> {
        let path = self.path();
        let data = serde_yaml::to_string(&self.document).map_err(|err| RegistryError::Encode {
            source: err,
            path: path.clone(),
        })?;

        Ok(self.workspace.storage().write(&path, data.as_bytes())?)
    }

    /// Absolute path of registry file.
    pub fn path(&self) -> PathBuf {
        self.workspace.resolve(registry_file_name())
    }

    /// Workspace the registry manages.
    pub fn workspace(&self) -> &Workspace<S> {
        &self.workspace
    }

    /// Registry format version.
    pub fn version(&self) -> &str {
        self.document.version.as_str()
    }

    /// Lookup environment by name.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::NotExist`] if no environment has the name.
    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.document
            .environments
            .get(name)
            .ok_or_else(|| RegistryError::NotExist(name.to_string()))
    }

    /// Iterate environments in the order they were added.
    pub fn environments(&self) -> impl Iterator<Item = &Environment> {
        self.document.environments.values()
    }

    /// Find application by name label across every environment.
    ///
    /// Environments are searched in the order they were added, and the
    /// first match wins.
    ///
    /// # Errors
    ///
    /// - Return [`EnvError::AppNotFound`] if no environment has the app.
    /// - Return any other error of [`Environment::get_app`] right away.
    pub fn get_app(&self, name: &str) -> Result<AppNode, EnvError> {
        for env in self.environments() {
            match env.get_app(&self.workspace, name) {
                Ok(app) => return Ok(app),
                Err(EnvError::AppNotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(EnvError::AppNotFound(name.to_string()))
    }

    /// Add environment built from a template repository.
    ///
    /// Installs every managed leaf application of the template environment,
    /// copies the template's bootstrap application directory into place,
    /// persists the registry, then creates the environment's control
    /// namespace and applies its bootstrap manifests.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::AlreadyExists`] if name is taken.
    /// - Return [`RegistryError::Env`] if template resolution or
    ///   installation fails.
    /// - Return [`RegistryError::Storage`] if copying fails.
    /// - Return [`RegistryError::Kube`] if templating or applying fails.
    /// - Return any error of [`Registry::persist`].
    #[instrument(skip(self, env, template, values, cluster, templater), fields(env = env.name()), level = "debug")]
    pub fn add_environment<T, C, B>(
        &mut self,
        env: Environment,
        template: &Workspace<T>,
        values: &TemplateValues,
        dry_run: bool,
        cluster: &C,
        templater: &B,
    ) -> Result<()>
    where
        T: Storage,
        C: ClusterApply + ?Sized,
        B: Templater + ?Sized,
    {
        if self.document.environments.contains_key(env.name()) {
            return Err(RegistryError::AlreadyExists(env.name().to_string()));
        }

        let new_env = self.install_environment(&env, template)?;
        self.document
            .environments
            .insert(new_env.name().to_string(), new_env.clone());

        // INVARIANT: A failed persist leaves the in-memory registry untouched.
        if let Err(err) = self.persist() {
            self.document.environments.shift_remove(new_env.name());
            return Err(err);
        }
        info!("registered environment {}", new_env.name());

        let namespace = control_namespace(new_env.name());
        match cluster.create_namespace(&namespace, dry_run) {
            Ok(()) => info!("created namespace {namespace}"),
            Err(KubeError::AlreadyExists(_)) => debug!("namespace {namespace} already exists"),
            Err(err) => return Err(err.into()),
        }

        let manifests = templater.build(&new_env.bootstrap_url(), values)?;
        Ok(cluster.apply(&manifests, dry_run)?)
    }

    /// Delete environment.
    ///
    /// Cleans up the environment, persists the registry without it, then
    /// deletes its bootstrap manifests from the cluster.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::NotExist`] if no environment has the name.
    /// - Return [`RegistryError::Env`] if cleanup fails.
    /// - Return [`RegistryError::Kube`] if templating or deleting fails.
    /// - Return any error of [`Registry::persist`].
    #[instrument(skip(self, values, cluster, templater), level = "debug")]
    pub fn delete_environment<C, B>(
        &mut self,
        name: &str,
        values: &TemplateValues,
        dry_run: bool,
        cluster: &C,
        templater: &B,
    ) -> Result<()>
    where
        C: ClusterApply + ?Sized,
        B: Templater + ?Sized,
    {
        let env = self.environment(name)?.clone();
        env.cleanup(&self.workspace)?;

        let Some((index, key, removed)) = self.document.environments.shift_remove_full(name) else {
            return Err(RegistryError::NotExist(name.to_string()));
        };

        // INVARIANT: A failed persist leaves the in-memory registry untouched.
        if let Err(err) = self.persist() {
            self.document.environments.shift_insert(index, key, removed);
            return Err(err);
        }
        info!("removed environment {name}");

        let manifests = templater.build(&env.bootstrap_url(), values)?;
        Ok(cluster.delete(&manifests, dry_run)?)
    }

    fn install_environment<T>(&self, env: &Environment, template: &Workspace<T>) -> Result<Environment>
    where
        T: Storage,
    {
        let leaves = env.leaf_applications(template)?;
        let new_env = Environment::new(env.name(), &env.root_app_path, &env.template_ref);

        for mut leaf in leaves {
            if !leaf.is_managed() {
                debug!("skip unmanaged leaf {}", leaf.name());
                continue;
            }

            new_env.install_application(self, template, &mut leaf)?;
        }

        // INVARIANT: Bootstrap applications of all environments share the
        // directory chosen by the first environment.
        let anchor = match self.document.environments.first() {
            Some((_, first)) => first.root_app_path.clone(),
            None => env.root_app_path.clone(),
        };
        if anchor != env.root_app_path {
            warn!(
                "placing bootstrap applications next to {} instead of {}",
                anchor.display(),
                env.root_app_path.display()
            );
        }

        let src = template.resolve(parent_dir(&env.root_app_path));
        let dst = self.workspace.resolve(parent_dir(&anchor));
        copy_tree(template.storage(), &src, self.workspace.storage(), &dst)?;

        Ok(new_env)
    }
}

/// Namespace that hosts the control plane of an environment.
pub fn control_namespace(env: &str) -> String {
    format!("{env}-argocd")
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Environment name is already registered.
    #[error("environment already exists: {0}")]
    AlreadyExists(String),

    /// Environment name is not registered.
    #[error("environment does not exist: {0}")]
    NotExist(String),

    /// Registry file is missing.
    #[error("config file does not exist: {:?}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// Registry file is malformed.
    #[error("failed to decode registry {:?}", path.display())]
    Decode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Registry cannot be serialized.
    #[error("failed to encode registry {:?}", path.display())]
    Encode {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Environment resolution fails.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Cluster or templating collaborator fails.
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// Storage access fails.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Friendly result alias :3
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
