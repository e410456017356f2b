//! Selection snapshots handed to the preview factory and the remote loader.

use crate::assets::{AssetLocator, DirectoryAssetLocator};
use crate::constants::DEFAULT_RECURSION_DEPTH;
use crate::payload::PayloadError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Display flags that change how markup is rewritten before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DisplayOptions(u8);

impl DisplayOptions {
    pub const NONE: Self = Self(0);
    pub const SHOW_GRID_LINES: Self = Self(1);
    pub const COLOR_GRID_CELLS: Self = Self(1 << 1);
    pub const DISABLE_EVENTS: Self = Self(1 << 2);
    pub const PREFETCH_ASSETS: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DisplayOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DisplayOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    None,
    Xaml,
    Image,
    Text,
    Directory,
}

impl ItemKind {
    /// Classifies a path by extension. Unknown files are treated as text.
    pub fn from_path(path: &Path) -> Self {
        if path.is_dir() {
            return ItemKind::Directory;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "axaml" | "xaml" | "paml" => ItemKind::Xaml,
            "png" | "jpg" | "jpeg" | "bmp" | "gif" | "ico" | "webp" => ItemKind::Image,
            _ => ItemKind::Text,
        }
    }
}

/// The project owning the selected item.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    pub directory: PathBuf,
    /// The project's own output assembly.
    pub assembly_path: Option<PathBuf>,
    /// User-supplied assembly location, absolute or relative to `directory`.
    pub assembly_override: Option<PathBuf>,
    pub recursion_depth: usize,
}

impl Project {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            assembly_path: None,
            assembly_override: None,
            recursion_depth: DEFAULT_RECURSION_DEPTH,
        }
    }

    /// Directory whose build artefacts signal a rebuild.
    pub fn watch_directory(&self) -> PathBuf {
        match &self.assembly_override {
            Some(custom) if custom.is_absolute() => custom
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.directory.clone()),
            Some(custom) => {
                let resolved = self.directory.join(custom);
                resolved
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.directory.clone())
            }
            None => self.directory.clone(),
        }
    }
}

/// The application whose assembly the host loads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Application {
    pub assembly_path: PathBuf,
    pub runtime_config_path: PathBuf,
    pub deps_path: PathBuf,
}

/// The item being previewed.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub path: PathBuf,
    pub kind: ItemKind,
}

impl Item {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = ItemKind::from_path(&path);
        Self { name, path, kind }
    }
}

/// Immutable snapshot of everything needed to preview one selection.
#[derive(Clone)]
pub struct LoadPayload {
    pub item: Option<Item>,
    pub project: Option<Project>,
    pub application: Option<Application>,
    pub error: Option<PayloadError>,
    pub options: DisplayOptions,
    pub is_header: bool,
    pub assets: Arc<dyn AssetLocator>,
    app_hash: u64,
}

impl std::fmt::Debug for LoadPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPayload")
            .field("item", &self.item)
            .field("options", &self.options)
            .field("error", &self.error)
            .field("app_hash", &self.app_hash)
            .finish()
    }
}

impl LoadPayload {
    pub fn builder() -> LoadPayloadBuilder {
        LoadPayloadBuilder::default()
    }

    /// Hash of the application assembly path; `0` when there is none.
    pub fn app_hash(&self) -> u64 {
        self.app_hash
    }

    pub fn kind(&self) -> ItemKind {
        self.item.as_ref().map_or(ItemKind::None, |i| i.kind)
    }

    pub fn name(&self) -> String {
        self.item.as_ref().map(|i| i.name.clone()).unwrap_or_default()
    }

    /// Path of the item relative to its project directory, with `/` separators.
    pub fn project_relative_path(&self) -> Option<String> {
        let item = self.item.as_ref()?;
        let project = self.project.as_ref()?;
        let relative = item.path.strip_prefix(&project.directory).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", parts.join("/")))
    }

    /// Assembly the host should resolve `avares://` and code-behind against.
    pub fn assembly_path(&self) -> Option<&Path> {
        self.project
            .as_ref()
            .and_then(|p| p.assembly_path.as_deref())
            .or_else(|| self.application.as_ref().map(|a| a.assembly_path.as_path()))
    }
}

#[derive(Default)]
pub struct LoadPayloadBuilder {
    item: Option<Item>,
    project: Option<Project>,
    application: Option<Application>,
    error: Option<PayloadError>,
    options: DisplayOptions,
    is_header: bool,
    assets: Option<Arc<dyn AssetLocator>>,
}

impl LoadPayloadBuilder {
    pub fn item(mut self, item: Item) -> Self {
        self.item = Some(item);
        self
    }

    pub fn file(self, path: impl Into<PathBuf>) -> Self {
        self.item(Item::from_path(path))
    }

    pub fn project(mut self, project: Project) -> Self {
        self.project = Some(project);
        self
    }

    pub fn application(mut self, application: Application) -> Self {
        self.application = Some(application);
        self
    }

    pub fn error(mut self, error: PayloadError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn options(mut self, options: DisplayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn header(mut self, is_header: bool) -> Self {
        self.is_header = is_header;
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetLocator>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn build(self) -> LoadPayload {
        let app_hash = self
            .application
            .as_ref()
            .map(|a| {
                let mut hasher = DefaultHasher::new();
                a.assembly_path.hash(&mut hasher);
                hasher.finish()
            })
            .unwrap_or(0);

        let assets = self.assets.unwrap_or_else(|| {
            let item_dir = self
                .item
                .as_ref()
                .and_then(|i| i.path.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            let project_dir = self.project.as_ref().map(|p| p.directory.clone());
            Arc::new(DirectoryAssetLocator::new(item_dir, project_dir))
        });

        LoadPayload {
            item: self.item,
            project: self.project,
            application: self.application,
            error: self.error,
            options: self.options,
            is_header: self.is_header,
            assets,
            app_hash,
        }
    }
}
