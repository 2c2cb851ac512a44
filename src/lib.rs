// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resolve and mutate GitOps application trees.
//!
//! A GitOps repository lays out Argo CD style `Application` manifests as a
//! tree: a root application points at a directory of child application
//! manifests, which point at further directories, down to the leaf
//! applications that deploy real workloads. Argotree reads that tree from
//! storage, classifies its nodes, and mutates it, e.g., registering a new
//! manifest with an application, replicating an application into a
//! per-environment overlay, or uninstalling every application it manages.
//!
//! Environments of a repository are tracked in a registry file at the
//! repository top-level. Git transport, the hosting provider, template
//! expansion and cluster access are collaborators behind traits.

pub mod app;
pub mod config;
pub mod env;
pub mod git;
pub mod kube;
pub mod kustomize;
pub mod manager;
pub mod manifest;
pub mod path;
pub mod registry;
pub mod storage;

pub use app::AppNode;
pub use env::Environment;
pub use manager::Manager;
pub use registry::Registry;
pub use storage::{DiskStorage, MemoryStorage, Storage, Workspace};
