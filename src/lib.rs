//! Design-time previewer core for Avalonia markup.
//!
//! A [`RemoteLoader`] launches the designer host for an application
//! assembly, streams markup to it over the `tcp-bson` transport and delivers
//! rendered frames as [`PreviewPayload`]s. Files that need no host (images,
//! plain text, markup with errors) are answered immediately.

pub mod assets;
pub mod config;
pub mod constants;
pub mod factory;
pub mod fsnode;
pub mod loader;
pub mod markup;
pub mod payload;
pub mod project;
pub mod protocol;
pub mod utils;
pub mod watcher;

pub use config::PreviewerConfig;
pub use loader::{LoaderError, LoaderSettings, PreviewEvent, RemoteLoader};
pub use markup::MarkupRegistry;
pub use payload::{PayloadError, PreviewPayload};
pub use project::{Application, DisplayOptions, Item, ItemKind, LoadPayload, Project};
pub use watcher::BuildWatcher;
