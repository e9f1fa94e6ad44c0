//! Pinned external binaries, fetched on demand into the tools directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;

use crate::exec::{Executor, Invocation};

/// An external binary pinned to a version. `url` may contain the placeholders
/// `$(version)`, `$(os)`, `$(arch)` and `$(machine)`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Tool {
    pub name: String,
    pub version: String,
    pub url: String,
    /// Arguments that make the binary print its version.
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
}

fn default_version_args() -> Vec<String> {
    vec!["version".to_string()]
}

impl Tool {
    pub fn new(name: &str, version: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            version_args: default_version_args(),
        }
    }

    #[must_use]
    pub fn with_version_args(mut self, args: &[&str]) -> Self {
        self.version_args = args.iter().map(ToString::to_string).collect();
        self
    }

    pub fn download_url(&self, platform: &Platform) -> String {
        self.url
            .replace("$(version)", &self.version)
            .replace("$(os)", &platform.os)
            .replace("$(arch)", &platform.arch)
            .replace("$(machine)", platform.machine())
    }
}

/// Target operating system and architecture, using Go-style identifiers
/// (`linux`, `amd64`) as release artifacts are named that way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn host() -> Self {
        Self::new(host_os(), host_arch())
    }

    /// The uname-style architecture name.
    pub fn machine(&self) -> &str {
        match self.arch.as_str() {
            "amd64" => "x86_64",
            "386" => "i386",
            arch => arch,
        }
    }
}

pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        arch => arch,
    }
}

/// Makes sure every pinned tool exists in `tools_dir` and reports its version.
pub struct ToolProvisioner<'a, E: ?Sized> {
    executor: &'a E,
    tools_dir: &'a Path,
    platform: &'a Platform,
}

impl<'a, E: Executor + ?Sized> ToolProvisioner<'a, E> {
    pub fn new(executor: &'a E, tools_dir: &'a Path, platform: &'a Platform) -> Self {
        Self {
            executor,
            tools_dir,
            platform,
        }
    }

    pub fn binary_path(&self, tool: &Tool) -> PathBuf {
        self.tools_dir.join(&tool.name)
    }

    pub fn ensure_all(&self, tools: &[Tool]) -> Result<()> {
        for tool in tools {
            self.ensure(tool)
                .with_context(|| format!("install {} {}", tool.name, tool.version))?;
        }
        Ok(())
    }

    /// Returns whether the tool had to be downloaded.
    pub fn ensure(&self, tool: &Tool) -> Result<bool> {
        if self.is_installed(tool)? {
            debug!("{} {} is already installed", tool.name, tool.version);
            return Ok(false);
        }

        waiting!("Installing {} {}", tool.name, tool.version);
        self.install(tool)?;

        if !self.is_installed(tool)? {
            bail!(
                "downloaded {} does not report version {}",
                self.binary_path(tool).display(),
                tool.version
            );
        }
        success!("Installed {} {}", tool.name, tool.version);
        Ok(true)
    }

    fn is_installed(&self, tool: &Tool) -> Result<bool> {
        let path = self.binary_path(tool);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => (),
            Ok(_) => return Ok(false),
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
            Err(error) => {
                return Err(error).with_context(|| format!("could not stat {}", path.display()));
            }
        }

        let probe = Invocation::new(path.display().to_string()).args(tool.version_args.clone());
        match self.executor.capture(&probe) {
            Ok(output) => Ok(output.contains(&tool.version)),
            Err(error) => {
                debug!("version probe failed: {error}");
                Ok(false)
            }
        }
    }

    fn install(&self, tool: &Tool) -> Result<()> {
        fs::create_dir_all(self.tools_dir)
            .with_context(|| format!("failed to create directory {}", self.tools_dir.display()))?;

        let path = self.binary_path(tool);
        remove_stale(&path)?;

        let url = tool.download_url(self.platform);
        let download = Invocation::new("curl")
            .args(["--fail", "--silent", "--show-error", "--location", "--output"])
            .arg(path.display().to_string())
            .arg(url);
        self.executor.capture(&download)?;

        make_executable(&path)
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
        Err(error) => Err(error),
    };
    result.with_context(|| format!("failed to remove {}", path.display()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let mut permissions = fs::metadata(path)
        .with_context(|| format!("could not stat {}", path.display()))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
