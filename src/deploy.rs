//! Ordered deployment of the cluster add-ons and of virtink itself.
//!
//! Every step applies one manifest and optionally blocks on a readiness
//! condition through `kubectl wait`. Steps run strictly in order and nothing is
//! rolled back when one of them fails.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::config::Config;
use crate::exec::{Executor, Invocation};

const CALICO_MANIFEST: &str =
    "https://projectcalico.docs.tigera.io/archive/v3.23/manifests/calico.yaml";
const CERT_MANAGER_MANIFEST: &str =
    "https://github.com/cert-manager/cert-manager/releases/download/v1.8.2/cert-manager.yaml";
const CDI_OPERATOR_MANIFEST: &str =
    "https://github.com/kubevirt/containerized-data-importer/releases/download/v1.53.0/cdi-operator.yaml";
const CDI_CR_MANIFEST: &str =
    "https://github.com/kubevirt/containerized-data-importer/releases/download/v1.53.0/cdi-cr.yaml";
const CALICO_READY_TIMEOUT_SECS: u64 = 60;

/// What a step hands to `kubectl apply -f`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Manifest {
    Url(String),
    Path(PathBuf),
    /// Rendered offline by skaffold with the given image tags, then applied from `output`.
    Rendered { images: Vec<String>, output: PathBuf },
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Path(path) | Self::Rendered { output: path, .. } => {
                write!(f, "{}", path.display())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Whatever `kubectl wait` defaults to.
    Default,
    Seconds(u64),
    /// Block until the condition is met, however long it takes.
    Unbounded,
}

impl WaitTimeout {
    fn as_arg(self) -> Option<String> {
        match self {
            Self::Default => None,
            Self::Seconds(secs) => Some(format!("{secs}s")),
            Self::Unbounded => Some("-1s".to_string()),
        }
    }
}

/// A condition `kubectl wait` blocks on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
    pub condition: String,
    pub timeout: WaitTimeout,
    /// Capture the output and only surface it when the wait fails.
    pub quiet: bool,
}

impl Readiness {
    pub fn new(kind: &str, name: &str, condition: &str, timeout: WaitTimeout) -> Self {
        Self {
            namespace: None,
            kind: kind.to_string(),
            name: name.to_string(),
            condition: condition.to_string(),
            timeout,
            quiet: false,
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub manifest: Manifest,
    pub readiness: Option<Readiness>,
}

impl Step {
    fn new(name: &'static str, manifest: Manifest) -> Self {
        Self {
            name,
            manifest,
            readiness: None,
        }
    }

    #[must_use]
    fn wait_for(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }
}

/// The fixed deployment sequence: networking, certificates, data import,
/// NFS storage and finally virtink.
pub fn plan(config: &Config) -> Vec<Step> {
    let unbounded = config
        .readiness_timeout
        .map_or(WaitTimeout::Unbounded, WaitTimeout::Seconds);
    let rook_nfs = config.rook_nfs_dir.as_path();

    vec![
        Step::new("calico", Manifest::Url(CALICO_MANIFEST.into())).wait_for(
            Readiness::new(
                "deployment",
                "calico-kube-controllers",
                "Available",
                WaitTimeout::Seconds(CALICO_READY_TIMEOUT_SECS),
            )
            .in_namespace("kube-system")
            .quiet(),
        ),
        // TODO: wait for the cert-manager webhook once virtink's certificates depend on it being up.
        Step::new("cert-manager", Manifest::Url(CERT_MANAGER_MANIFEST.into())),
        Step::new("cdi-operator", Manifest::Url(CDI_OPERATOR_MANIFEST.into())).wait_for(
            Readiness::new("deployment", "cdi-operator", "Available", unbounded).in_namespace("cdi"),
        ),
        Step::new("cdi", Manifest::Url(CDI_CR_MANIFEST.into())).wait_for(Readiness::new(
            "cdi.cdi.kubevirt.io",
            "cdi",
            "Available",
            unbounded,
        )),
        Step::new("rook-nfs-crds", Manifest::Path(rook_nfs.join("crds.yaml"))).wait_for(
            Readiness::new(
                "crd",
                "nfsservers.nfs.rook.io",
                "Established",
                WaitTimeout::Default,
            ),
        ),
        Step::new("rook-nfs", Manifest::Path(rook_nfs.to_path_buf())),
        Step::new(
            "virtink",
            Manifest::Rendered {
                images: config
                    .images
                    .iter()
                    .filter(|image| image.render)
                    .map(|image| image.tag.clone())
                    .collect(),
                output: config.rendered_manifest.clone(),
            },
        )
        .wait_for(
            Readiness::new("deployment", "virt-controller", "Available", unbounded)
                .in_namespace("virtink-system"),
        ),
    ]
}

pub struct Deployer<'a, E: ?Sized> {
    executor: &'a E,
    tools_dir: &'a Path,
    kubeconfig: &'a Path,
}

impl<'a, E: Executor + ?Sized> Deployer<'a, E> {
    pub fn new(executor: &'a E, tools_dir: &'a Path, kubeconfig: &'a Path) -> Self {
        Self {
            executor,
            tools_dir,
            kubeconfig,
        }
    }

    pub fn deploy(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            waiting!("Deploying {}", step.name);
            self.run_step(step)
                .with_context(|| format!("deploy {}", step.name))?;
        }
        success!("All components are deployed");
        Ok(())
    }

    fn run_step(&self, step: &Step) -> Result<()> {
        if let Manifest::Rendered { images, output } = &step.manifest {
            self.render(images, output)?;
        }

        let apply = self
            .kubectl()
            .args(["apply", "-f"])
            .arg(step.manifest.to_string());
        self.executor.stream(&apply)?;

        if let Some(readiness) = &step.readiness {
            self.wait(readiness)?;
        }
        Ok(())
    }

    fn render(&self, images: &[String], output: &Path) -> Result<()> {
        if let Some(dir) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        let render = Invocation::new(self.tool("skaffold"))
            .args([
                "render",
                "--offline=true",
                "--default-repo=",
                "--digest-source=tag",
                "--images",
            ])
            .arg(images.join(","))
            .arg("--output")
            .arg(output.display().to_string())
            .env("PATH", self.search_path()?);
        self.executor.capture(&render)?;
        Ok(())
    }

    fn wait(&self, readiness: &Readiness) -> Result<()> {
        let mut wait = self.kubectl().arg("wait");
        if let Some(namespace) = &readiness.namespace {
            wait = wait.args(["-n", namespace.as_str()]);
        }
        wait = wait
            .args([&readiness.kind, &readiness.name])
            .arg("--for")
            .arg(format!("condition={}", readiness.condition));
        if let Some(timeout) = readiness.timeout.as_arg() {
            wait = wait.arg("--timeout").arg(timeout);
        }

        if readiness.quiet {
            self.executor.capture(&wait)?;
        } else {
            self.executor.stream(&wait)?;
        }
        Ok(())
    }

    fn kubectl(&self) -> Invocation {
        Invocation::new(self.tool("kubectl"))
            .env("KUBECONFIG", self.kubeconfig.display().to_string())
    }

    fn tool(&self, name: &str) -> String {
        self.tools_dir.join(name).display().to_string()
    }

    /// `PATH` with the tools directory in front, so the renderer finds the pinned binaries.
    fn search_path(&self) -> Result<String> {
        let tools_dir = std::path::absolute(self.tools_dir)
            .with_context(|| format!("could not resolve {}", self.tools_dir.display()))?;
        let inherited = env::var_os("PATH").unwrap_or_default();
        let joined = env::join_paths(std::iter::once(tools_dir).chain(env::split_paths(&inherited)))
            .context("could not build PATH for the renderer")?;
        Ok(joined.to_string_lossy().into_owned())
    }
}
