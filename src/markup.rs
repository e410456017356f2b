//! Registry of framework elements used when rewriting markup.
//!
//! Built once at startup and handed to the preview factory; there is no
//! global cache. A schema file lists the event and asset-typed attributes of
//! each element:
//!
//! ```toml
//! [elements.Button]
//! events = ["Click"]
//!
//! [elements.Image]
//! assets = ["Source"]
//! ```

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read markup schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid markup schema: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Element {0} declares attribute {1} as both event and asset")]
    Conflict(String, String),
}

/// Structural information about one element type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    pub events: HashSet<String>,
    pub assets: HashSet<String>,
}

impl ElementInfo {
    pub fn is_event(&self, attribute: &str) -> bool {
        self.events.contains(attribute)
    }

    pub fn is_asset(&self, attribute: &str) -> bool {
        self.assets.contains(attribute)
    }
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    elements: HashMap<String, ElementInfo>,
}

/// Read-only map from element local name to [`ElementInfo`].
#[derive(Debug, Clone, Default)]
pub struct MarkupRegistry {
    elements: HashMap<String, ElementInfo>,
}

/// Routed events every input element exposes.
const INPUT_EVENTS: &[&str] = &[
    "PointerPressed",
    "PointerReleased",
    "PointerMoved",
    "PointerEntered",
    "PointerExited",
    "PointerWheelChanged",
    "KeyDown",
    "KeyUp",
    "GotFocus",
    "LostFocus",
    "Tapped",
    "DoubleTapped",
    "TextInput",
    "Loaded",
    "Unloaded",
    "AttachedToVisualTree",
    "DetachedFromVisualTree",
];

const BUILTIN: &[(&str, &[&str], &[&str])] = &[
    ("Window", &["Opened", "Closing", "Closed", "Activated", "Deactivated"], &["Icon"]),
    ("UserControl", &[], &[]),
    ("Border", &[], &[]),
    ("Panel", &[], &[]),
    ("Grid", &[], &[]),
    ("StackPanel", &[], &[]),
    ("DockPanel", &[], &[]),
    ("Canvas", &[], &[]),
    ("WrapPanel", &[], &[]),
    ("ScrollViewer", &["ScrollChanged"], &[]),
    ("TextBlock", &[], &[]),
    ("TextBox", &["TextChanged", "TextChanging"], &[]),
    ("Button", &["Click"], &[]),
    ("RepeatButton", &["Click"], &[]),
    ("ToggleButton", &["Click", "IsCheckedChanged"], &[]),
    ("CheckBox", &["Click", "IsCheckedChanged"], &[]),
    ("RadioButton", &["Click", "IsCheckedChanged"], &[]),
    ("ComboBox", &["SelectionChanged", "DropDownOpened", "DropDownClosed"], &[]),
    ("ListBox", &["SelectionChanged"], &[]),
    ("TabControl", &["SelectionChanged"], &[]),
    ("Slider", &["ValueChanged"], &[]),
    ("MenuItem", &["Click", "SubmenuOpened"], &["Icon"]),
    ("Image", &[], &["Source"]),
    ("ImageBrush", &[], &["Source"]),
    ("WindowIcon", &[], &[]),
];

impl MarkupRegistry {
    /// Registry covering the common built-in controls.
    pub fn builtin() -> Self {
        let elements = BUILTIN
            .iter()
            .map(|(name, events, assets)| {
                let mut info = ElementInfo::default();
                info.events.extend(INPUT_EVENTS.iter().map(|e| e.to_string()));
                info.events.extend(events.iter().map(|e| e.to_string()));
                info.assets.extend(assets.iter().map(|a| a.to_string()));
                (name.to_string(), info)
            })
            .collect();
        Self { elements }
    }

    /// Parses a TOML schema.
    pub fn from_toml(text: &str) -> Result<Self, RegistryError> {
        let schema: Schema = toml::from_str(text)?;
        for (name, info) in &schema.elements {
            if let Some(attr) = info.events.intersection(&info.assets).next() {
                return Err(RegistryError::Conflict(name.clone(), attr.clone()));
            }
        }
        Ok(Self {
            elements: schema.elements,
        })
    }

    /// Loads a TOML schema file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Adds the entries of `other`, merging attribute sets for shared elements.
    pub fn extend(&mut self, other: MarkupRegistry) {
        for (name, info) in other.elements {
            let entry = self.elements.entry(name).or_default();
            entry.events.extend(info.events);
            entry.assets.extend(info.assets);
        }
    }

    pub fn lookup(&self, element: &str) -> Option<&ElementInfo> {
        self.elements.get(element)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
