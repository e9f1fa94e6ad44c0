use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::app;
use crate::config::Config;
use crate::exec::SystemExecutor;
use crate::pipeline::{Options, Pipeline};
use crate::tools::{self, Platform};

/// Run the virtink end-to-end tests against a kind cluster
///
/// Installs the pinned tools, builds the images under test, makes sure the kind
/// cluster exists, deploys virtink with its dependencies and runs the kuttl suite.
#[derive(Parser, Debug)]
#[command(name = "virtink-e2e", version, about, long_about)]
pub struct Cli {
    /// KinD cluster name for running E2E tests
    #[arg(long, env = "E2E_CLUSTER_NAME", default_value = "virtink-e2e")]
    cluster_name: String,

    /// Kubeconfig of an existing cluster; skips cluster provisioning
    #[arg(long, env = "E2E_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Delete and recreate the kind cluster if it already exists
    #[arg(long, env = "E2E_FORCE_CREATE_CLUSTER")]
    force_create_cluster: bool,

    /// YAML file overriding the built-in tools, images and paths
    #[arg(long, env = "E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Operating system used in tool download URLs
    #[arg(long, env = "GOOS", default_value = tools::host_os())]
    target_os: String,

    /// Architecture used in tool download URLs
    #[arg(long, env = "GOARCH", default_value = tools::host_arch())]
    target_arch: String,

    /// Bound every otherwise unbounded readiness wait to this many seconds
    #[arg(long, env = "E2E_READINESS_TIMEOUT", value_name = "SECS")]
    readiness_timeout: Option<u64>,

    /// Container tool used to build the images
    #[arg(long, env = "CONTAINER_TOOL", default_value = "docker")]
    container_tool: String,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

/// Parse the command line and run the pipeline, reporting the failing stage.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    app::set_global_verbosity(cli.verbose.log_level_filter());

    match cli.exec() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            critical!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        let config = self.load_config()?;
        let platform = Platform::new(self.target_os, self.target_arch);
        let options = Options {
            cluster_name: self.cluster_name,
            kubeconfig: self.kubeconfig,
            force_create_cluster: self.force_create_cluster,
        };

        Pipeline::new(&SystemExecutor, &config, &platform, &self.container_tool).run(&options)?;
        success!("E2E tests passed");
        Ok(())
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if self.readiness_timeout.is_some() {
            config.readiness_timeout = self.readiness_timeout;
        }
        Ok(config)
    }
}
