//! Command-line interface definitions.

use anyhow::Context;
use axaml_preview::{Application, DisplayOptions, LoadPayload, PreviewerConfig, Project};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Render Avalonia markup through the designer host
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Markup, image or text file to preview
    #[arg(value_hint = clap::ValueHint::FilePath, required_unless_present = "list_versions")]
    pub file: Option<PathBuf>,

    /// Application assembly loaded by the host
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub app: Option<PathBuf>,

    /// Runtime config (default: next to the assembly)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub runtimeconfig: Option<PathBuf>,

    /// Dependency manifest (default: next to the assembly)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub depsfile: Option<PathBuf>,

    /// Project directory (default: the file's directory)
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    /// Project output assembly, if different from the application
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub project_assembly: Option<PathBuf>,

    /// Display options applied on top of the configured ones
    #[arg(long, value_enum, value_delimiter = ',')]
    pub options: Vec<DisplayFlag>,

    /// Directory receiving preview.png
    #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    pub out: PathBuf,

    /// Render scale
    #[arg(long)]
    pub scale: Option<f64>,

    /// Framework version whose designer host is used
    #[arg(long)]
    pub framework_version: Option<String>,

    /// Extra markup registry (TOML)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub registry: Option<PathBuf>,

    /// Config file (default: per-user config)
    #[arg(short = 'C', long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Keep running and refresh on file edits or rebuilds
    #[arg(short, long)]
    pub watch: bool,

    /// Print installed framework versions and exit
    #[arg(long)]
    pub list_versions: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFlag {
    GridLines,
    GridCells,
    NoEvents,
    PrefetchAssets,
}

impl From<DisplayFlag> for DisplayOptions {
    fn from(flag: DisplayFlag) -> Self {
        match flag {
            DisplayFlag::GridLines => DisplayOptions::SHOW_GRID_LINES,
            DisplayFlag::GridCells => DisplayOptions::COLOR_GRID_CELLS,
            DisplayFlag::NoEvents => DisplayOptions::DISABLE_EVENTS,
            DisplayFlag::PrefetchAssets => DisplayOptions::PREFETCH_ASSETS,
        }
    }
}

impl Cli {
    pub fn load_config(&self) -> anyhow::Result<PreviewerConfig> {
        let mut config = match &self.config {
            Some(path) => PreviewerConfig::from_file(path)?,
            None => PreviewerConfig::load(),
        };
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(version) = &self.framework_version {
            config.host.framework_version = Some(version.clone());
        }
        Ok(config)
    }

    pub fn project(&self, file: &Path, config: &PreviewerConfig) -> Project {
        let directory = self
            .project_dir
            .clone()
            .or_else(|| file.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut project = Project::new(name, directory);
        project.assembly_path = self.project_assembly.clone();
        project.assembly_override = self.app.clone();
        project.recursion_depth = config.recursion_depth;
        project
    }

    pub fn load_payload(
        &self,
        file: &Path,
        config: &PreviewerConfig,
    ) -> anyhow::Result<LoadPayload> {
        let file = std::fs::canonicalize(file)
            .with_context(|| format!("Cannot open {}", file.display()))?;
        let options = self
            .options
            .iter()
            .fold(config.display_options(), |acc, flag| acc | (*flag).into());

        let mut builder = LoadPayload::builder()
            .file(&file)
            .project(self.project(&file, config))
            .options(options);
        if let Some(app) = &self.app {
            builder = builder.application(application(
                app,
                self.runtimeconfig.as_deref(),
                self.depsfile.as_deref(),
            ));
        }
        Ok(builder.build())
    }
}

/// Companion files default to the assembly's siblings.
fn application(assembly: &Path, runtime_config: Option<&Path>, deps: Option<&Path>) -> Application {
    Application {
        assembly_path: assembly.to_path_buf(),
        runtime_config_path: runtime_config
            .map(Path::to_path_buf)
            .unwrap_or_else(|| assembly.with_extension("runtimeconfig.json")),
        deps_path: deps
            .map(Path::to_path_buf)
            .unwrap_or_else(|| assembly.with_extension("deps.json")),
    }
}
