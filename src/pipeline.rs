//! The end-to-end pipeline: tools, images, cluster, deployment, tests.
//!
//! Stages run strictly one after the other and the first failure ends the run.

use std::fmt;
use std::path::PathBuf;

use snafu::Snafu;

use crate::cluster::ClusterProvisioner;
use crate::config::Config;
use crate::deploy::{self, Deployer};
use crate::exec::Executor;
use crate::images::ImageBuilder;
use crate::suite::TestSuite;
use crate::tools::{Platform, ToolProvisioner};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    InstallTools,
    BuildImages,
    EnsureCluster,
    DeployComponents,
    RunTests,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstallTools => "install tools",
            Self::BuildImages => "build images",
            Self::EnsureCluster => "create kind cluster",
            Self::DeployComponents => "deploy components",
            Self::RunTests => "kuttl test",
        })
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("{stage}: {error:#}"))]
pub struct PipelineError {
    stage: Stage,
    error: anyhow::Error,
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

/// Per-run choices taken from the command line.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub cluster_name: String,
    /// Use this cluster instead of provisioning one.
    pub kubeconfig: Option<PathBuf>,
    pub force_create_cluster: bool,
}

pub struct Pipeline<'a, E: ?Sized> {
    executor: &'a E,
    config: &'a Config,
    platform: &'a Platform,
    container_tool: &'a str,
}

impl<'a, E: Executor + ?Sized> Pipeline<'a, E> {
    pub fn new(
        executor: &'a E,
        config: &'a Config,
        platform: &'a Platform,
        container_tool: &'a str,
    ) -> Self {
        Self {
            executor,
            config,
            platform,
            container_tool,
        }
    }

    pub fn run(&self, options: &Options) -> Result<(), PipelineError> {
        let config = self.config;

        stage(Stage::InstallTools, || {
            ToolProvisioner::new(self.executor, &config.tools_dir, self.platform)
                .ensure_all(&config.tools)
        })?;

        stage(Stage::BuildImages, || {
            ImageBuilder::new(self.executor, self.container_tool, &config.build_context)
                .build_all(&config.images)
        })?;

        let kubeconfig = match &options.kubeconfig {
            Some(kubeconfig) => {
                info!("Using existing cluster from {}", kubeconfig.display());
                kubeconfig.clone()
            }
            None => stage(Stage::EnsureCluster, || {
                ClusterProvisioner::new(
                    self.executor,
                    &config.tool_path("kind"),
                    &config.kind_config,
                    &config.kubeconfig,
                )
                .ensure(&options.cluster_name, options.force_create_cluster)
            })?,
        };

        stage(Stage::DeployComponents, || {
            Deployer::new(self.executor, &config.tools_dir, &kubeconfig)
                .deploy(&deploy::plan(config))
        })?;

        stage(Stage::RunTests, || {
            TestSuite::new(self.executor, &config.tool_path("kuttl"), &config.suite_config)
                .run(&kubeconfig)
        })
    }
}

fn stage<T>(
    stage: Stage,
    op: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, PipelineError> {
    display!("==> {stage}");
    op().map_err(|error| PipelineSnafu { stage, error }.build())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::exec::CommandError;
    use crate::exec::testing::FakeExecutor;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        platform: Platform,
    }

    impl Fixture {
        /// Every pinned tool is already in place and reports its version.
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = Config {
                tools_dir: dir.path().join("bin"),
                kubeconfig: dir.path().join("tmp").join("virtink-e2e-cluster.kubeconfig"),
                rendered_manifest: dir.path().join("virtink-e2e.yaml"),
                ..Config::default()
            };
            fs::create_dir_all(&config.tools_dir).unwrap();
            for tool in &config.tools {
                fs::write(config.tool_path(&tool.name), "").unwrap();
            }

            Self {
                _dir: dir,
                config,
                platform: Platform::new("linux", "amd64"),
            }
        }

        fn tool(&self, name: &str) -> String {
            self.config.tool_path(name).display().to_string()
        }

        /// Answers version probes and `kind get clusters`; everything else succeeds.
        fn executor(&self, clusters: &str) -> FakeExecutor {
            let mut executor = FakeExecutor::new();
            for tool in &self.config.tools {
                let probe = format!("{} {}", self.tool(&tool.name), tool.version_args.join(" "));
                executor = executor.output(probe, &format!("{} version {}", tool.name, tool.version));
            }
            executor.output(format!("{} get clusters", self.tool("kind")), clusters)
        }

        fn options(&self) -> Options {
            Options {
                cluster_name: "e2e-test".into(),
                kubeconfig: None,
                force_create_cluster: false,
            }
        }

        fn run(&self, executor: &FakeExecutor, options: &Options) -> Result<(), PipelineError> {
            Pipeline::new(executor, &self.config, &self.platform, "docker").run(options)
        }
    }

    fn position(lines: &[String], prefix: &str) -> usize {
        lines
            .iter()
            .position(|line| line.starts_with(prefix))
            .unwrap_or_else(|| panic!("{prefix:?} was not run"))
    }

    #[test]
    fn fresh_cluster_runs_every_stage() {
        let fixture = Fixture::new();
        let executor = fixture.executor("kind\n");

        fixture.run(&executor, &fixture.options()).unwrap();

        let lines = executor.command_lines();
        assert!(!executor.ran("curl"));
        assert_eq!(
            lines
                .iter()
                .filter(|line| line.starts_with("docker buildx build"))
                .count(),
            3
        );
        let create = format!(
            "{} create cluster --config test/e2e/config/kind/config.yaml --name e2e-test --kubeconfig {}",
            fixture.tool("kind"),
            fixture.config.kubeconfig.display()
        );
        assert_eq!(lines.iter().filter(|line| **line == create).count(), 1);

        let build = position(&lines, "docker buildx build");
        let create = position(&lines, &create);
        let calico = position(&lines, &format!("{} apply", fixture.tool("kubectl")));
        let wait = position(
            &lines,
            &format!("{} wait -n virtink-system", fixture.tool("kubectl")),
        );
        let kuttl = position(&lines, &format!("{} test", fixture.tool("kuttl")));
        assert!(build < create && create < calico && calico < wait && wait < kuttl);
        assert_eq!(kuttl, lines.len() - 1);

        let (_, test) = executor.calls().pop().unwrap();
        let kubeconfig = fixture.config.kubeconfig.display().to_string();
        assert_eq!(test.get_env("KUBECONFIG"), Some(kubeconfig.as_str()));
    }

    #[test]
    fn existing_cluster_is_not_created() {
        let fixture = Fixture::new();
        let kubeconfig = &fixture.config.kubeconfig;
        fs::create_dir_all(kubeconfig.parent().unwrap()).unwrap();
        fs::write(kubeconfig, "").unwrap();
        let executor = fixture.executor("e2e-test\n");

        fixture.run(&executor, &fixture.options()).unwrap();

        assert!(!executor.ran(&format!("{} create", fixture.tool("kind"))));
        assert!(executor.ran(&format!(
            "{} export kubeconfig --name e2e-test",
            fixture.tool("kind")
        )));
        let kubeconfig = kubeconfig.display().to_string();
        for (_, invocation) in executor.calls() {
            if invocation.program() == fixture.tool("kubectl")
                && invocation.get_args()[0] != "version"
            {
                assert_eq!(invocation.get_env("KUBECONFIG"), Some(kubeconfig.as_str()));
            }
        }
        assert!(executor.ran(&format!("{} test", fixture.tool("kuttl"))));
    }

    #[test]
    fn supplied_kubeconfig_skips_cluster_provisioning() {
        let fixture = Fixture::new();
        let executor = fixture.executor("");
        let options = Options {
            kubeconfig: Some("/etc/e2e/kubeconfig".into()),
            ..fixture.options()
        };

        fixture.run(&executor, &options).unwrap();

        let kind = fixture.tool("kind");
        assert!(!executor.ran(&format!("{kind} get")));
        assert!(!executor.ran(&format!("{kind} create")));
        let (_, test) = executor.calls().pop().unwrap();
        assert_eq!(test.get_env("KUBECONFIG"), Some("/etc/e2e/kubeconfig"));
    }

    #[test]
    fn calico_timeout_aborts_before_cert_manager() {
        let fixture = Fixture::new();
        let wait = format!(
            "{} wait -n kube-system deployment calico-kube-controllers",
            fixture.tool("kubectl")
        );
        let executor = fixture
            .executor("")
            .fail(wait.clone(), "error: timed out waiting for the condition");

        let error = fixture.run(&executor, &fixture.options()).unwrap_err();

        assert_eq!(error.stage(), Stage::DeployComponents);
        let message = error.to_string();
        assert!(message.starts_with("deploy components: deploy calico"), "{message}");
        assert!(message.contains(&wait), "{message}");
        assert!(message.contains("timed out waiting for the condition"), "{message}");
        assert!(error.error().downcast_ref::<CommandError>().is_some());

        assert!(!executor.ran(&format!(
            "{} apply -f https://github.com/cert-manager",
            fixture.tool("kubectl")
        )));
        assert!(!executor.ran(&format!("{} test", fixture.tool("kuttl"))));
    }

    #[test]
    fn failing_tests_fail_the_run() {
        let fixture = Fixture::new();
        let executor = fixture
            .executor("")
            .fail(format!("{} test", fixture.tool("kuttl")), "");

        let error = fixture.run(&executor, &fixture.options()).unwrap_err();

        assert_eq!(error.stage(), Stage::RunTests);
        assert!(error.to_string().starts_with("kuttl test: run command"));
    }

    #[test]
    fn tool_failure_stops_before_images() {
        let fixture = Fixture::new();
        fs::remove_file(Path::new(&fixture.tool("kind"))).unwrap();
        let executor = fixture.executor("").fail("curl", "curl: (6) Could not resolve host");

        let error = fixture.run(&executor, &fixture.options()).unwrap_err();

        assert_eq!(error.stage(), Stage::InstallTools);
        assert!(error.to_string().starts_with("install tools: install kind v0.14.0"));
        assert!(!executor.ran("docker"));
    }

    #[test]
    fn failed_build_stops_before_cluster() {
        let fixture = Fixture::new();
        let executor = fixture.executor("").fail("docker buildx build", "");

        let error = fixture.run(&executor, &fixture.options()).unwrap_err();

        assert_eq!(error.stage(), Stage::BuildImages);
        assert!(!executor.ran(&format!("{} get clusters", fixture.tool("kind"))));
        assert_eq!(
            executor
                .command_lines()
                .iter()
                .filter(|line| line.starts_with("docker"))
                .count(),
            1
        );
    }
}
