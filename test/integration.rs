// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{app_yaml, RepoFixture, RepoKind};

use anyhow::Result;
use argotree::{
    env::Environment,
    git::{CloneOptions, Git2Access, Repository, RepositoryAccess},
    kube::{ClusterApply, TemplateValues, Templater},
    registry::{registry_file_name, Registry, RegistryError},
    storage::Workspace,
    Manager,
};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{cell::RefCell, env::current_dir, fs, path::Path};

fn gitops_remote(path: impl AsRef<Path>) -> Result<RepoFixture> {
    let remote = RepoFixture::new(path, RepoKind::Bare)?;
    remote.stage_and_commit(
        &[
            ("root.yaml", &app_yaml("root", "root", false, "apps")),
            ("apps/foo.yaml", &app_yaml("dev-foo", "foo", true, "apps/foo")),
            ("apps/foo/deployment.yaml", "kind: Deployment\n"),
            ("apps/foo/kustomization.yaml", "resources:\n- deployment.yaml\n"),
        ],
        "initial commit",
    )?;

    Ok(remote)
}

#[sealed_test]
fn manager_pushes_manifest_to_remote() -> Result<()> {
    let remote = gitops_remote(current_dir()?.join("remote.git"))?;
    let manager = Manager::new(Git2Access::default(), current_dir()?.join("clones"));

    let file = manager.add_manifest(
        &remote.url(),
        "root.yaml",
        "foo",
        b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  level: debug\n",
    )?;
    assert_eq!(file, "settings.yaml");

    assert_eq!(remote.tip_message("main")?, "Added manifest for 'settings.yaml'");
    let stored = remote.read_file("main", "apps/foo/settings.yaml")?.unwrap_or_default();
    assert!(stored.contains("name: settings"));
    let kustomization = remote
        .read_file("main", "apps/foo/kustomization.yaml")?
        .unwrap_or_default();
    assert!(kustomization.contains("- deployment.yaml"));
    assert!(kustomization.contains("- settings.yaml"));

    Ok(())
}

#[sealed_test]
fn manager_leaves_remote_alone_for_unknown_app() -> Result<()> {
    let remote = gitops_remote(current_dir()?.join("remote.git"))?;
    let manager = Manager::new(Git2Access::default(), current_dir()?.join("clones"));

    let result = manager.add_manifest(&remote.url(), "root.yaml", "bar", b"metadata:\n  name: x\n");
    assert!(result.is_err());
    assert_eq!(remote.tip_message("main")?, "initial commit");

    Ok(())
}

#[sealed_test]
fn clone_checks_out_branch_and_tag() -> Result<()> {
    let remote = RepoFixture::new(current_dir()?.join("remote.git"), RepoKind::Bare)?;
    remote.stage_and_commit(&[("first.txt", "one\n")], "first")?;
    remote.tag("v1")?;
    remote.stage_and_commit(&[("second.txt", "two\n")], "second")?;
    remote.branch("dev")?;
    remote.stage_and_commit(&[("third.txt", "three\n")], "third")?;

    let access = Git2Access::default();

    let repo = access.clone_repo(&CloneOptions {
        url: format!("{}#dev", remote.url()),
        path: current_dir()?.join("on-branch"),
        auth: None,
        depth: None,
    })?;
    let root = repo.root()?;
    assert!(root.join("third.txt").exists());

    let repo = access.clone_repo(&CloneOptions {
        url: format!("{}@v1", remote.url()),
        path: current_dir()?.join("on-tag"),
        auth: None,
        depth: None,
    })?;
    let root = repo.root()?;
    assert!(root.join("first.txt").exists());
    assert!(!root.join("second.txt").exists());

    Ok(())
}

#[derive(Debug, Default)]
struct RecordingCluster {
    calls: RefCell<Vec<String>>,
}

impl ClusterApply for RecordingCluster {
    fn apply(&self, manifests: &[String], dry_run: bool) -> argotree::kube::Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("apply {} dry_run={dry_run}", manifests.len()));
        Ok(())
    }

    fn delete(&self, manifests: &[String], dry_run: bool) -> argotree::kube::Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("delete {} dry_run={dry_run}", manifests.len()));
        Ok(())
    }

    fn create_namespace(&self, name: &str, _dry_run: bool) -> argotree::kube::Result<()> {
        self.calls.borrow_mut().push(format!("namespace {name}"));
        Ok(())
    }
}

struct StaticTemplater;

impl Templater for StaticTemplater {
    fn build(&self, _url: &str, values: &TemplateValues) -> argotree::kube::Result<Vec<String>> {
        let env = values.get("env").cloned().unwrap_or_default();
        Ok(vec![format!("kind: Namespace\nmetadata:\n  name: {env}-argocd\n")])
    }
}

fn write_tree(root: &Path, files: &[(&str, String)]) -> Result<()> {
    for (path, content) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }

    Ok(())
}

#[sealed_test]
fn registry_lifecycle_on_disk() -> Result<()> {
    let template_root = current_dir()?.join("template");
    write_tree(
        &template_root,
        &[
            ("argocd-apps/root.yaml", app_yaml("root", "root", false, "argocd-apps/envs")),
            ("argocd-apps/envs/foo.yaml", app_yaml("foo", "foo", true, "apps/foo/overlays/tpl")),
            ("apps/foo/base/kustomization.yaml", "resources: []\n".into()),
            ("apps/foo/overlays/tpl/kustomization.yaml", "resources:\n- ../../base\n".into()),
        ],
    )?;
    let repo_root = current_dir()?.join("repo");
    fs::create_dir_all(&repo_root)?;

    let cluster = RecordingCluster::default();
    let values = TemplateValues::from([("env".to_string(), "prod".to_string())]);

    let mut registry = Registry::create(Workspace::on_disk(&repo_root));
    registry.add_environment(
        Environment::new("prod", "argocd-apps/root.yaml", "https://github.com/foo/template@v1.0.0"),
        &Workspace::on_disk(&template_root),
        &values,
        false,
        &cluster,
        &StaticTemplater,
    )?;
    assert!(repo_root.join(registry_file_name()).exists());
    assert!(repo_root.join("apps/foo/overlays/tpl/kustomization.yaml").exists());
    assert!(repo_root.join("argocd-apps/envs/foo.yaml").exists());

    let mut registry = Registry::load(Workspace::on_disk(&repo_root))?;
    assert_eq!(registry.get_app("foo")?.env(), "prod");
    assert_eq!(
        registry.environment("prod")?.bootstrap_url(),
        "https://github.com/foo/template/bootstrap?ref=v1.0.0"
    );

    registry.delete_environment("prod", &values, true, &cluster, &StaticTemplater)?;
    let registry = Registry::load(Workspace::on_disk(&repo_root))?;
    assert_eq!(registry.environments().count(), 0);
    assert!(matches!(
        registry.environment("prod"),
        Err(RegistryError::NotExist(_))
    ));

    assert_eq!(
        *cluster.calls.borrow(),
        vec!["namespace prod-argocd", "apply 1 dry_run=false", "delete 1 dry_run=true"]
    );

    Ok(())
}
