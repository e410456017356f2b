//! Remote preview loader.
//!
//! A single worker task owns the host process and its connection. Every
//! public call is queued to that task and applied in submission order;
//! messages from the host are fed into the same queue.

mod actor;
pub mod host;
pub mod output;

pub use host::{
    find_host_app, framework_versions, package_directory, DotnetLauncher, HostInvocation,
    HostLauncher, HostProcess,
};
pub use output::{OutputBuffer, OutputSink};

use crate::config::PreviewerConfig;
use crate::markup::MarkupRegistry;
use crate::payload::PreviewPayload;
use crate::project::LoadPayload;
use crate::protocol::codec::Received;
use crate::protocol::{PointerEvent, ProtocolError};
use actor::Actor;
use output::SharedOutput;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Preview host not found: {0}")]
    NotFound(String),
    #[error("Preview host did not connect within {0:?}")]
    Timeout(Duration),
    #[error("Handshake with preview host failed: {0}")]
    Handshake(#[source] ProtocolError),
    #[error("Failed to start preview host: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Preview host is not connected")]
    NotConnected,
    #[error("Previewer has been disposed")]
    Disposed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Notifications produced by the loader.
#[derive(Debug, Clone)]
pub enum PreviewEvent {
    /// A preview is ready to display: rendered, immediate or failed.
    Payload(PreviewPayload),
    /// A new line of host output.
    Output(String),
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub framework_version: Option<String>,
    pub connect_timeout: Duration,
    pub output_capacity: usize,
    pub scale: f64,
}

impl LoaderSettings {
    pub fn from_config(config: &PreviewerConfig) -> Self {
        Self {
            framework_version: config.host.framework_version.clone(),
            connect_timeout: config.host.connect_timeout(),
            output_capacity: config.host.output_capacity,
            scale: config.scale,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from_config(&PreviewerConfig::default())
    }
}

pub(crate) enum Command {
    Update(LoadPayload),
    SetScale(f64),
    Pointer(PointerEvent),
    Stop,
    Dispose,
    Flush(oneshot::Sender<()>),
    Inbound { generation: u64, received: Received },
    Disconnected { generation: u64, error: Option<String> },
}

/// State visible to handles without going through the worker.
pub(crate) struct Shared {
    pub(crate) output: SharedOutput,
    pub(crate) capturing: Arc<AtomicBool>,
    pub(crate) running: AtomicBool,
    scale: AtomicU64,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn scale(&self) -> f64 {
        f64::from_bits(self.scale.load(Ordering::Acquire))
    }

    fn set_scale(&self, scale: f64) {
        self.scale.store(scale.to_bits(), Ordering::Release);
    }
}

struct Handle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        let _ = self.commands.send(Command::Dispose);
    }
}

/// Drives one designer host for live previews.
///
/// Cloning is cheap; the worker shuts down when [`dispose`](Self::dispose)
/// is called or the last clone is dropped. Must be created inside a tokio
/// runtime.
#[derive(Clone)]
pub struct RemoteLoader {
    inner: Arc<Handle>,
}

impl RemoteLoader {
    pub fn new(
        settings: LoaderSettings,
        launcher: Arc<dyn HostLauncher>,
        registry: Arc<MarkupRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<PreviewEvent>) {
        let (commands, queue) = mpsc::unbounded_channel();
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            output: Arc::new(Mutex::new(OutputBuffer::new(settings.output_capacity))),
            capturing: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            scale: AtomicU64::new(settings.scale.to_bits()),
            cancel: CancellationToken::new(),
        });

        let actor = Actor::new(
            settings,
            launcher,
            registry,
            commands.downgrade(),
            events,
            shared.clone(),
        );
        tokio::spawn(actor.run(queue));

        let loader = Self {
            inner: Arc::new(Handle { commands, shared }),
        };
        (loader, receiver)
    }

    fn send(&self, command: Command) {
        if self.inner.shared.cancel.is_cancelled() {
            return;
        }
        if self.inner.commands.send(command).is_err() {
            tracing::debug!("Preview worker is gone, dropping command");
        }
    }

    /// Queues a new preview.
    pub fn update(&self, payload: LoadPayload) {
        self.send(Command::Update(payload));
    }

    pub fn scale(&self) -> f64 {
        self.inner.shared.scale()
    }

    /// Changes the render scale; non-positive values are ignored.
    pub fn set_scale(&self, scale: f64) {
        if scale.is_nan() || scale <= 0.0 || scale == self.scale() {
            return;
        }
        self.inner.shared.set_scale(scale);
        self.send(Command::SetScale(scale));
    }

    pub fn send_pointer_event(&self, event: PointerEvent) {
        self.send(Command::Pointer(event));
    }

    /// Stops the host; the next update starts a fresh one.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Stops the host and silences all further events. Idempotent.
    pub fn dispose(&self) {
        if self.inner.shared.cancel.is_cancelled() {
            return;
        }
        self.inner.shared.cancel.cancel();
        let _ = self.inner.commands.send(Command::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shared.cancel.is_cancelled()
    }

    /// Buffered host output, or `None` if nothing was captured.
    pub fn process_output(&self) -> Option<String> {
        output::lock(&self.inner.shared.output).text()
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::Acquire)
    }

    /// Waits until every command queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.shared.cancel.is_cancelled() {
            return;
        }
        if self.inner.commands.send(Command::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests;
