use std::path::Path;

use anyhow::Result;

use crate::exec::{Executor, Invocation};

/// The kuttl suite run against the deployed cluster.
pub struct TestSuite<'a, E: ?Sized> {
    executor: &'a E,
    kuttl: &'a Path,
    config_file: &'a Path,
}

impl<'a, E: Executor + ?Sized> TestSuite<'a, E> {
    pub fn new(executor: &'a E, kuttl: &'a Path, config_file: &'a Path) -> Self {
        Self {
            executor,
            kuttl,
            config_file,
        }
    }

    pub fn command(&self, kubeconfig: &Path) -> Invocation {
        Invocation::new(self.kuttl.display().to_string())
            .args(["test", "--config"])
            .arg(self.config_file.display().to_string())
            .env("KUBECONFIG", kubeconfig.display().to_string())
    }

    /// Output streams live; the exit status is the verdict.
    pub fn run(&self, kubeconfig: &Path) -> Result<()> {
        waiting!("Running e2e test cases");
        self.executor.stream(&self.command(kubeconfig))?;
        success!("All e2e test cases passed");
        Ok(())
    }
}
