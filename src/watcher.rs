//! Polls a project's build output so previews can restart after a rebuild.

use crate::constants::{BUILD_ARTIFACT_EXTENSIONS, WATCHER_POLL_INTERVAL};
use crate::fsnode::{DirectorySnapshot, PathNode};
use crate::project::Project;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct WatchState {
    changed: AtomicBool,
    disposed: AtomicBool,
    last_change: Mutex<Option<Instant>>,
}

impl WatchState {
    fn mark_changed(&self) {
        *self.last_change.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.changed.store(true, Ordering::Release);
    }
}

/// Background poller for `*.cache`, `*.pdb`, `*.dll` and `*.exe` files.
pub struct BuildWatcher {
    directory: PathBuf,
    state: Arc<WatchState>,
    wake: Mutex<Option<mpsc::Sender<()>>>,
}

impl BuildWatcher {
    pub fn new<F>(project: &Project, callback: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        Self::with_interval(project, WATCHER_POLL_INTERVAL, callback)
    }

    pub fn with_interval<F>(
        project: &Project,
        interval: Duration,
        callback: F,
    ) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let directory = project.watch_directory();
        let depth = project.recursion_depth;
        let state = Arc::new(WatchState::default());
        let (wake, sleeper) = mpsc::channel();

        let root = PathNode::dir(&directory);
        let initial = DirectorySnapshot::capture(&root, BUILD_ARTIFACT_EXTENSIONS, depth);
        let thread_state = state.clone();
        std::thread::Builder::new()
            .name("build-watcher".into())
            .spawn(move || poll(root, depth, interval, initial, thread_state, sleeper, callback))?;

        tracing::debug!("Watching {:?} for build output", directory);
        Ok(Self {
            directory,
            state,
            wake: Mutex::new(Some(wake)),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Time since the last detected change, `Duration::MAX` if none yet.
    pub fn elapsed(&self) -> Duration {
        self.state
            .last_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map_or(Duration::MAX, |at| at.elapsed())
    }

    /// Returns whether a change was seen since the last call, and resets it.
    pub fn is_changed(&self) -> bool {
        self.state.changed.swap(false, Ordering::AcqRel)
    }

    pub fn dispose(&self) {
        self.state.disposed.store(true, Ordering::Release);
        // dropping the sender wakes the poller
        self.wake.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Drop for BuildWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn poll<F: Fn()>(
    root: PathNode,
    depth: usize,
    interval: Duration,
    mut snapshot: DirectorySnapshot,
    state: Arc<WatchState>,
    sleeper: mpsc::Receiver<()>,
    callback: F,
) {
    loop {
        match sleeper.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if state.disposed.load(Ordering::Acquire) {
            break;
        }

        let changed = catch_unwind(AssertUnwindSafe(|| {
            let current = DirectorySnapshot::capture(&root, BUILD_ARTIFACT_EXTENSIONS, depth);
            let changed = current != snapshot;
            snapshot = current;
            changed
        }));
        match changed {
            Ok(true) => {
                tracing::info!("Build output changed in {:?}", root.path());
                state.mark_changed();
                if catch_unwind(AssertUnwindSafe(&callback)).is_err() {
                    tracing::warn!("Build watcher callback panicked");
                }
            }
            Ok(false) => {}
            Err(_) => tracing::warn!("Polling {:?} failed", root.path()),
        }
    }
    tracing::debug!("Build watcher for {:?} stopped", root.path());
}
