use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::images::Image;
use crate::tools::Tool;

/// Everything the pipeline needs to know about the repository and the pinned
/// toolchain. Defaults describe the virtink e2e setup; a YAML file may override
/// any subset of fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub tools_dir: PathBuf,
    pub tools: Vec<Tool>,
    pub images: Vec<Image>,
    pub build_context: PathBuf,
    pub kind_config: PathBuf,
    pub kubeconfig: PathBuf,
    pub rendered_manifest: PathBuf,
    pub suite_config: PathBuf,
    pub rook_nfs_dir: PathBuf,
    /// Replaces the unbounded readiness waits with this many seconds.
    pub readiness_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools_dir: "bin".into(),
            tools: vec![
                Tool::new(
                    "kind",
                    "v0.14.0",
                    "https://kind.sigs.k8s.io/dl/$(version)/kind-$(os)-$(arch)",
                ),
                Tool::new(
                    "skaffold",
                    "v2.0.0",
                    "https://storage.googleapis.com/skaffold/releases/$(version)/skaffold-$(os)-$(arch)",
                ),
                Tool::new(
                    "kuttl",
                    "0.12.1",
                    "https://github.com/kudobuilder/kuttl/releases/download/v$(version)/kubectl-kuttl_$(version)_$(os)_$(machine)",
                ),
                Tool::new(
                    "kubectl",
                    "v1.24.0",
                    "https://dl.k8s.io/release/$(version)/bin/$(os)/$(arch)/kubectl",
                )
                .with_version_args(&["version", "--client"]),
            ],
            images: vec![
                Image::new("virt-controller:e2e", "build/virt-controller/Dockerfile")
                    .with_build_arg("PRERUNNER_IMAGE=virt-prerunner:e2e"),
                Image::new("virt-daemon:e2e", "build/virt-daemon/Dockerfile"),
                Image::new("virt-prerunner:e2e", "build/virt-prerunner/Dockerfile")
                    .not_rendered(),
            ],
            build_context: ".".into(),
            kind_config: "test/e2e/config/kind/config.yaml".into(),
            kubeconfig: "./tmp/virtink-e2e-cluster.kubeconfig".into(),
            rendered_manifest: "/tmp/virtink-e2e.yaml".into(),
            suite_config: "test/e2e/kuttl-test.yaml".into(),
            rook_nfs_dir: "test/e2e/config/rook-nfs".into(),
            readiness_timeout: None,
        }
    }
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context("invalid e2e configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Path of a provisioned tool binary.
    pub fn tool_path(&self, name: &str) -> PathBuf {
        self.tools_dir.join(name)
    }
}
