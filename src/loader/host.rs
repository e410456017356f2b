//! Locating and launching the designer host process.

use super::output::OutputSink;
use super::LoaderError;
use crate::config::HostConfig;
use crate::constants::{
    DEFAULT_LAUNCHER, FRAMEWORK_PACKAGE, HOST_APP_FILE_NAME, HOST_TOOLS_DIR, LAUNCHER_ENV, LOOPBACK,
    PACKAGES_ENV,
};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Per-user package cache, honoring the environment override.
pub fn package_directory() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(PACKAGES_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".nuget").join("packages"))
}

/// Installed framework versions under a package cache, oldest first.
pub fn framework_versions(package_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(package_dir.join(FRAMEWORK_PACKAGE)) else {
        return Vec::new();
    };
    let mut versions: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    versions.sort_by(|a, b| version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b)));
    versions
}

fn version_key(version: &str) -> Vec<u64> {
    let release = version.split('-').next().unwrap_or(version);
    release
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// Finds the host app for `version` beneath its `tools` directory.
pub fn find_host_app(package_dir: &Path, version: &str) -> Option<PathBuf> {
    let tools = package_dir
        .join(FRAMEWORK_PACKAGE)
        .join(version)
        .join(HOST_TOOLS_DIR);
    if !tools.is_dir() {
        return None;
    }
    let mut matches: Vec<PathBuf> = jwalk::WalkDir::new(&tools)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.eq_ignore_ascii_case(HOST_APP_FILE_NAME))
        })
        .map(|e| e.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Runtime launcher: explicit override, then environment, then `dotnet`.
pub fn resolve_launcher(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    std::env::var_os(LAUNCHER_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LAUNCHER))
}

/// Everything needed to start one host instance.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInvocation {
    pub runtime_config: PathBuf,
    pub deps_file: PathBuf,
    pub host_app: PathBuf,
    pub port: u16,
    pub app_assembly: PathBuf,
}

impl HostInvocation {
    pub fn transport_uri(&self) -> String {
        format!("tcp-bson://{}:{}/", LOOPBACK, self.port)
    }

    pub fn args(&self) -> Vec<OsString> {
        vec![
            "exec".into(),
            "--runtimeconfig".into(),
            self.runtime_config.clone().into(),
            "--depsfile".into(),
            self.deps_file.clone().into(),
            self.host_app.clone().into(),
            "--transport".into(),
            self.transport_uri().into(),
            self.app_assembly.clone().into(),
        ]
    }
}

/// A running host process.
pub trait HostProcess: Send {
    /// Best-effort termination; never fails.
    fn kill(&mut self);

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Starts host processes. The loader only talks to hosts through this seam.
#[async_trait]
pub trait HostLauncher: Send + Sync {
    /// Path of the host app for the requested framework version.
    fn locate(&self, version: Option<&str>) -> Result<PathBuf, LoaderError>;

    /// Spawns the host; its stdout and stderr go to `output`.
    async fn launch(
        &self,
        invocation: &HostInvocation,
        output: OutputSink,
    ) -> Result<Box<dyn HostProcess>, LoaderError>;
}

/// Launches the host through the .NET runtime launcher.
#[derive(Debug, Clone)]
pub struct DotnetLauncher {
    launcher: PathBuf,
    package_dir: Option<PathBuf>,
}

impl DotnetLauncher {
    pub fn new(launcher: Option<&Path>, package_dir: Option<PathBuf>) -> Self {
        Self {
            launcher: resolve_launcher(launcher),
            package_dir: package_dir.or_else(package_directory),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.launcher.as_deref(), config.package_dir.clone())
    }
}

#[async_trait]
impl HostLauncher for DotnetLauncher {
    fn locate(&self, version: Option<&str>) -> Result<PathBuf, LoaderError> {
        let dir = self
            .package_dir
            .as_deref()
            .ok_or_else(|| {
                LoaderError::NotFound("package directory could not be resolved".into())
            })?;
        let version = match version {
            Some(v) => v.to_string(),
            None => framework_versions(dir).pop().ok_or_else(|| {
                let message = format!("no {} versions in {}", FRAMEWORK_PACKAGE, dir.display());
                LoaderError::NotFound(message)
            })?,
        };
        find_host_app(dir, &version).ok_or_else(|| {
            LoaderError::NotFound(format!("{} for version {}", HOST_APP_FILE_NAME, version))
        })
    }

    async fn launch(
        &self,
        invocation: &HostInvocation,
        output: OutputSink,
    ) -> Result<Box<dyn HostProcess>, LoaderError> {
        tracing::info!(
            "Starting preview host {:?} on {}",
            invocation.host_app,
            invocation.transport_uri()
        );
        let mut child = Command::new(&self.launcher)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LoaderError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, output));
        }
        Ok(Box::new(ChildProcess { child }))
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, sink: OutputSink) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.line(line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading host output: {}", e);
                break;
            }
        }
    }
}

struct ChildProcess {
    child: Child,
}

impl HostProcess for ChildProcess {
    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Failed to kill preview host: {}", e);
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
