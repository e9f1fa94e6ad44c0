//! Idempotent kind cluster lifecycle.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::exec::{Executor, Invocation};

pub struct ClusterProvisioner<'a, E: ?Sized> {
    executor: &'a E,
    kind: String,
    config_file: &'a Path,
    kubeconfig: &'a Path,
}

impl<'a, E: Executor + ?Sized> ClusterProvisioner<'a, E> {
    pub fn new(executor: &'a E, kind: &Path, config_file: &'a Path, kubeconfig: &'a Path) -> Self {
        Self {
            executor,
            kind: kind.display().to_string(),
            config_file,
            kubeconfig,
        }
    }

    /// Names of the clusters kind currently knows about.
    pub fn clusters(&self) -> Result<Vec<String>> {
        let output = self
            .executor
            .capture(&self.kind_command(["get", "clusters"]))?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Make sure the cluster `name` exists and return the path of its kubeconfig.
    ///
    /// An existing cluster is reused as is, without checking its health, unless
    /// `recreate` is set, in which case it is deleted and created again. The
    /// kubeconfig path is shared between cluster names, so a reused cluster
    /// always gets its credentials exported again.
    pub fn ensure(&self, name: &str, recreate: bool) -> Result<PathBuf> {
        let exists = self.clusters()?.iter().any(|cluster| cluster == name);

        if exists && !recreate {
            info!("Reusing kind cluster {name}");
            self.export_kubeconfig(name)?;
            return Ok(self.kubeconfig.to_path_buf());
        }

        if exists {
            waiting!("Deleting kind cluster {name}");
            self.executor
                .capture(&self.kind_command(["delete", "cluster", "--name", name]))?;
        }

        waiting!("Creating kind cluster {name}");
        self.prepare_kubeconfig_dir()?;
        let create = self
            .kind_command(["create", "cluster", "--config"])
            .arg(self.config_file.display().to_string())
            .args(["--name", name, "--kubeconfig"])
            .arg(self.kubeconfig.display().to_string());
        self.executor.capture(&create)?;
        success!("Created kind cluster {name}");

        Ok(self.kubeconfig.to_path_buf())
    }

    fn export_kubeconfig(&self, name: &str) -> Result<()> {
        self.prepare_kubeconfig_dir()?;
        let export = self
            .kind_command(["export", "kubeconfig", "--name", name, "--kubeconfig"])
            .arg(self.kubeconfig.display().to_string());
        self.executor.capture(&export)?;
        Ok(())
    }

    fn prepare_kubeconfig_dir(&self) -> Result<()> {
        match self.kubeconfig.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display())),
            _ => Ok(()),
        }
    }

    fn kind_command<'s>(&self, args: impl IntoIterator<Item = &'s str>) -> Invocation {
        Invocation::new(self.kind.as_str()).args(args)
    }
}
