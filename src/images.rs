use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::exec::{Executor, Invocation};

/// A container image built from a Dockerfile in the repository.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub tag: String,
    pub dockerfile: String,
    /// `KEY=VALUE` pairs passed as `--build-arg`.
    #[serde(default)]
    pub build_args: Vec<String>,
    /// Whether the manifest renderer should substitute this tag.
    #[serde(default = "default_render")]
    pub render: bool,
}

fn default_render() -> bool {
    true
}

impl Image {
    pub fn new(tag: &str, dockerfile: &str) -> Self {
        Self {
            tag: tag.to_string(),
            dockerfile: dockerfile.to_string(),
            build_args: Vec::new(),
            render: true,
        }
    }

    #[must_use]
    pub fn with_build_arg(mut self, arg: &str) -> Self {
        self.build_args.push(arg.to_string());
        self
    }

    #[must_use]
    pub fn not_rendered(mut self) -> Self {
        self.render = false;
        self
    }
}

/// Builds images with `buildx` and loads them into the local image store.
pub struct ImageBuilder<'a, E: ?Sized> {
    executor: &'a E,
    container_tool: &'a str,
    context: &'a Path,
}

impl<'a, E: Executor + ?Sized> ImageBuilder<'a, E> {
    pub fn new(executor: &'a E, container_tool: &'a str, context: &'a Path) -> Self {
        Self {
            executor,
            container_tool,
            context,
        }
    }

    /// Construct (but do not run) the build command for `image`.
    pub fn build_command(&self, image: &Image) -> Invocation {
        let mut invocation = Invocation::new(self.container_tool).args([
            "buildx",
            "build",
            "-t",
            image.tag.as_str(),
            "-f",
            image.dockerfile.as_str(),
            "--load",
        ]);
        for arg in &image.build_args {
            invocation = invocation.args(["--build-arg", arg.as_str()]);
        }
        invocation.arg(self.context.display().to_string())
    }

    /// Images are built in order; the first failure stops the rest.
    pub fn build_all(&self, images: &[Image]) -> Result<()> {
        for image in images {
            waiting!("Building image {}", image.tag);
            self.executor
                .stream(&self.build_command(image))
                .with_context(|| format!("build image {}", image.tag))?;
        }
        Ok(())
    }
}
