//! Application-wide constants for axaml-preview.
//!
//! Centralizes timeouts, protocol numbers and well-known file names so the
//! loader, watcher and factory agree on them.

use std::time::Duration;

// ============================================================================
// Application Identity
// ============================================================================

/// Directory name used under the user's config directory.
pub const APP_NAME: &str = "axaml-preview";

// ============================================================================
// Remote Host
// ============================================================================

/// Default time the loader waits for the host to connect back.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of host output lines kept for error reports.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 100;

/// Base DPI; the negotiated DPI is this times the render scale.
pub const BASE_DPI: f64 = 96.0;

/// Loopback address the host connects to.
pub const LOOPBACK: &str = "127.0.0.1";

/// File name of the designer host inside the framework package.
pub const HOST_APP_FILE_NAME: &str = "Avalonia.Designer.HostApp.dll";

/// Package id of the rendering framework in the package cache.
pub const FRAMEWORK_PACKAGE: &str = "avalonia";

/// Sub-directory of a framework version holding the host.
pub const HOST_TOOLS_DIR: &str = "tools";

/// Overrides the per-user package cache location.
pub const PACKAGES_ENV: &str = "NUGET_PACKAGES";

/// Overrides the runtime launcher used to start the host.
pub const LAUNCHER_ENV: &str = "DOTNET_HOST_PATH";

/// Launcher command used when [`LAUNCHER_ENV`] is unset.
pub const DEFAULT_LAUNCHER: &str = "dotnet";

// ============================================================================
// Transport
// ============================================================================

/// Size of the frame header: body length (4) + message type GUID (16).
pub const FRAME_HEADER_SIZE: usize = 20;

/// Largest message body accepted from the host (256 MiB).
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024 * 1024;

// ============================================================================
// Build Watcher
// ============================================================================

/// Poll interval of the build watcher. Debug builds poll slower.
#[cfg(debug_assertions)]
pub const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(5000);
#[cfg(not(debug_assertions))]
pub const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Build artefact extensions whose change means a rebuild is in progress.
pub const BUILD_ARTIFACT_EXTENSIONS: &[&str] = &["cache", "pdb", "dll", "exe"];

/// Default recursion depth when scanning build outputs.
pub const DEFAULT_RECURSION_DEPTH: usize = 4;

// ============================================================================
// Markup Rewriting
// ============================================================================

/// Local name of the root element that turns a preview into a window.
pub const WINDOW_ELEMENT: &str = "Window";

/// Local name of the application root, which cannot be previewed.
pub const APPLICATION_ELEMENT: &str = "Application";

/// Local name of the grid element that receives grid-line decorations.
pub const GRID_ELEMENT: &str = "Grid";

/// Background colors cycled through when coloring grid cells.
pub const GRID_PALETTE: &[&str] = &["#40FF0000", "#4000FF00", "#400000FF", "#40FFFF00"];
