use super::host::{HostInvocation, HostLauncher, HostProcess};
use super::output::{self, OutputSink};
use super::{Command, LoaderError, LoaderSettings, PreviewEvent, Shared};
use crate::constants::{BASE_DPI, LOOPBACK};
use crate::factory::PreviewFactory;
use crate::markup::MarkupRegistry;
use crate::payload::{PayloadError, PreviewPayload};
use crate::project::LoadPayload;
use crate::protocol::bitmap::frame_to_bitmap;
use crate::protocol::codec::{read_message, write_message, Received};
use crate::protocol::{Frame, FrameReceived, Message, PointerEvent, UpdateXaml, UpdateXamlResult};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Connection {
    writer: OwnedWriteHalf,
    generation: u64,
    reader: JoinHandle<()>,
}

struct Host {
    process: Box<dyn HostProcess>,
    connection: Option<Connection>,
}

pub(super) struct Actor {
    settings: LoaderSettings,
    launcher: Arc<dyn HostLauncher>,
    registry: Arc<MarkupRegistry>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<PreviewEvent>,
    shared: Arc<Shared>,
    host: Option<Host>,
    factory: Option<PreviewFactory>,
    app_hash: Option<u64>,
    generation: u64,
}

impl Actor {
    pub(super) fn new(
        settings: LoaderSettings,
        launcher: Arc<dyn HostLauncher>,
        registry: Arc<MarkupRegistry>,
        commands: mpsc::WeakUnboundedSender<Command>,
        events: mpsc::UnboundedSender<PreviewEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            settings,
            launcher,
            registry,
            commands,
            events,
            shared,
            host: None,
            factory: None,
            app_hash: None,
            generation: 0,
        }
    }

    pub(super) async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = queue.recv().await {
            if self.shared.cancel.is_cancelled() {
                break;
            }
            match command {
                Command::Update(payload) => self.update(payload).await,
                Command::SetScale(scale) => self.set_scale(scale).await,
                Command::Pointer(event) => self.pointer(event).await,
                Command::Stop => self.stop(),
                Command::Dispose => break,
                Command::Flush(done) => {
                    let _ = done.send(());
                }
                Command::Inbound {
                    generation,
                    received,
                } => self.inbound(generation, received).await,
                Command::Disconnected { generation, error } => {
                    self.disconnected(generation, error)
                }
            }
        }
        self.stop();
        debug!("Preview worker shutting down");
    }

    async fn update(&mut self, payload: LoadPayload) {
        let name = payload.name();
        let kind = payload.kind();
        let registry = self.registry.clone();
        let built = tokio::task::spawn_blocking(move || PreviewFactory::new(payload, &registry));
        let factory = match built.await {
            Ok(factory) => factory,
            Err(e) => {
                error!("Preview task for {} failed: {}", name, e);
                let failed = PreviewPayload::new(name, kind);
                self.deliver(failed.with_error(PayloadError::new(e.to_string()), None));
                return;
            }
        };

        let app_hash = factory.payload().app_hash();
        if self.host.is_some() && self.app_hash != Some(app_hash) {
            info!("Application assembly changed, restarting preview host");
            self.stop();
        }
        self.app_hash = Some(app_hash);

        if factory.is_immediate() {
            self.shared.capturing.store(false, Ordering::Release);
            let template = factory.template().clone();
            self.factory = Some(factory);
            self.deliver(template);
            return;
        }

        self.factory = None;
        output::lock(&self.shared.output).clear();
        self.shared.capturing.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        match self.push(&factory).await {
            Ok(()) => {
                debug!("Sent {} in {:.2}s", name, start.elapsed().as_secs_f64());
                self.factory = Some(factory);
            }
            Err(e) => {
                warn!("Preview of {} failed: {}", name, e);
                let output = self.output_text();
                self.stop();
                let error = PayloadError::new(e.to_string());
                self.deliver(factory.template().with_error(error, output));
            }
        }
    }

    async fn push(&mut self, factory: &PreviewFactory) -> Result<(), LoaderError> {
        if self.connection_generation().is_none() {
            self.start(factory.payload()).await?;
        }
        let message = update_message(factory, true).ok_or(LoaderError::NotConnected)?;
        self.send(&message).await
    }

    async fn start(&mut self, payload: &LoadPayload) -> Result<(), LoaderError> {
        self.stop_host();
        if self.shared.cancel.is_cancelled() {
            return Err(LoaderError::Disposed);
        }
        let application = payload
            .application
            .as_ref()
            .ok_or_else(|| LoaderError::NotFound("no application assembly to host".into()))?;
        let host_app = self
            .launcher
            .locate(self.settings.framework_version.as_deref())?;

        let listener = TcpListener::bind((LOOPBACK, 0)).await?;
        let port = listener.local_addr()?.port();
        let invocation = HostInvocation {
            runtime_config: application.runtime_config_path.clone(),
            deps_file: application.deps_path.clone(),
            host_app,
            port,
            app_assembly: application.assembly_path.clone(),
        };

        let process = self.launcher.launch(&invocation, self.output_sink()).await?;
        match process.id() {
            Some(pid) => debug!("Preview host running as pid {}", pid),
            None => debug!("Preview host started"),
        }
        self.host = Some(Host {
            process,
            connection: None,
        });
        self.shared.running.store(true, Ordering::Release);

        let timeout = self.settings.connect_timeout;
        let stream = tokio::select! {
            accepted = tokio::time::timeout(timeout, listener.accept()) => match accepted {
                Ok(result) => result?.0,
                Err(_) => return Err(LoaderError::Timeout(timeout)),
            },
            _ = self.shared.cancel.cancelled() => return Err(LoaderError::Disposed),
        };
        drop(listener);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let (reader, writer) = stream.into_split();
        let queue = self.commands.upgrade().ok_or(LoaderError::Disposed)?;
        self.generation += 1;
        let generation = self.generation;
        let reader = tokio::spawn(read_loop(reader, generation, queue));
        if let Some(host) = self.host.as_mut() {
            host.connection = Some(Connection {
                writer,
                generation,
                reader,
            });
        }
        info!("Preview host connected on port {}", port);

        let dpi = BASE_DPI * self.shared.scale();
        for message in [Message::supported_pixel_formats(), Message::render_info(dpi)] {
            self.send(&message).await.map_err(|e| match e {
                LoaderError::Protocol(e) => LoaderError::Handshake(e),
                other => other,
            })?;
        }
        Ok(())
    }

    async fn set_scale(&mut self, scale: f64) {
        if self.connection_generation().is_some() {
            if let Err(e) = self.send(&Message::render_info(BASE_DPI * scale)).await {
                warn!("Failed to send render info: {}", e);
            }
        }
        if let Some(factory) = self.factory.as_ref().filter(|f| f.is_immediate()) {
            self.deliver(factory.template().clone());
        }
    }

    async fn pointer(&mut self, event: PointerEvent) {
        if self.factory.as_ref().is_some_and(|f| f.events_disabled()) {
            return;
        }
        if self.connection_generation().is_none() {
            return;
        }
        let message = event.to_message(self.shared.scale());
        if let Err(e) = self.send(&message).await {
            debug!("Failed to forward pointer event: {}", e);
        }
    }

    async fn inbound(&mut self, generation: u64, received: Received) {
        if self.connection_generation() != Some(generation) {
            debug!("Dropping message from a previous host connection");
            return;
        }
        match received {
            Received::Message(Message::Frame(frame)) => self.on_frame(frame).await,
            Received::Message(Message::UpdateXamlResult(result)) => self.on_result(result).await,
            Received::Message(other) => debug!("Ignoring host message {}", other.type_id()),
            Received::Unknown(id) => debug!("Ignoring unknown host message {}", id),
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        if let Some(factory) = self.factory.as_ref().filter(|f| !f.is_immediate()) {
            match frame_to_bitmap(&frame) {
                Some(bitmap) => {
                    let payload = factory
                        .template()
                        .with_bitmap(Arc::new(bitmap), self.output_text());
                    self.deliver(payload);
                }
                None => debug!(
                    "Dropping frame {} ({}x{}, format {})",
                    frame.sequence_id, frame.width, frame.height, frame.format
                ),
            }
        }
        let ack = Message::FrameReceived(FrameReceived {
            sequence_id: frame.sequence_id,
        });
        if let Err(e) = self.send(&ack).await {
            warn!("Failed to acknowledge frame {}: {}", frame.sequence_id, e);
        }
    }

    async fn on_result(&mut self, result: UpdateXamlResult) {
        let Some(error) = result_error(&result) else {
            return;
        };
        let output = self.output_text();
        let Some(factory) = self.factory.as_mut().filter(|f| !f.is_immediate()) else {
            debug!("Dropping host error for a previous preview: {}", error);
            return;
        };
        if factory.take_resend() {
            info!("Host rejected rewritten markup, resending original: {}", error);
            if let Some(retry) = update_message(factory, false) {
                if let Err(e) = self.send(&retry).await {
                    warn!("Failed to resend markup: {}", e);
                }
            }
            return;
        }
        let payload = factory.template().with_error(error, output);
        self.deliver(payload);
    }

    fn disconnected(&mut self, generation: u64, error: Option<String>) {
        if self.connection_generation() != Some(generation) {
            return;
        }
        let message = match error {
            Some(e) => {
                warn!("Preview host connection failed: {}", e);
                format!("Preview host connection failed: {}", e)
            }
            None => {
                info!("Preview host closed the connection");
                "Preview host exited".to_string()
            }
        };
        let output = self.output_text();
        let template = self
            .factory
            .as_ref()
            .filter(|f| !f.is_immediate())
            .map(|f| f.template().clone());
        self.stop();
        if let Some(template) = template {
            self.deliver(template.with_error(PayloadError::new(message), output));
        }
    }

    /// Clears the in-flight preview, then tears down the host.
    fn stop(&mut self) {
        self.factory = None;
        self.shared.capturing.store(false, Ordering::Release);
        self.stop_host();
        output::lock(&self.shared.output).clear();
    }

    fn stop_host(&mut self) {
        if let Some(mut host) = self.host.take() {
            info!("Stopping preview host");
            if let Some(connection) = host.connection.take() {
                connection.reader.abort();
            }
            host.process.kill();
        }
        self.shared.running.store(false, Ordering::Release);
    }

    async fn send(&mut self, message: &Message) -> Result<(), LoaderError> {
        let connection = self
            .host
            .as_mut()
            .and_then(|h| h.connection.as_mut())
            .ok_or(LoaderError::NotConnected)?;
        write_message(&mut connection.writer, message).await?;
        Ok(())
    }

    fn connection_generation(&self) -> Option<u64> {
        self.host
            .as_ref()
            .and_then(|h| h.connection.as_ref())
            .map(|c| c.generation)
    }

    fn output_sink(&self) -> OutputSink {
        OutputSink::new(
            self.shared.output.clone(),
            self.shared.capturing.clone(),
            self.events.clone(),
            self.shared.cancel.clone(),
        )
    }

    fn output_text(&self) -> Option<String> {
        output::lock(&self.shared.output).text()
    }

    fn deliver(&self, payload: PreviewPayload) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        let payload = payload.with_scale(self.shared.scale());
        let _ = self.events.send(PreviewEvent::Payload(payload));
    }
}

fn update_message(factory: &PreviewFactory, processed: bool) -> Option<Message> {
    let payload = factory.payload();
    Some(Message::UpdateXaml(UpdateXaml {
        assembly_path: payload
            .assembly_path()
            .map(|p| p.to_string_lossy().into_owned()),
        xaml: factory.xaml(processed)?.to_string(),
        xaml_file_project_path: payload.project_relative_path(),
    }))
}

/// The host's error report, preferring exception details when present.
fn result_error(result: &UpdateXamlResult) -> Option<PayloadError> {
    let exception = result.exception.as_ref();
    let message = exception
        .and_then(|e| e.message.as_deref())
        .filter(|m| !m.is_empty())
        .or(result.error.as_deref())
        .filter(|m| !m.is_empty())?;
    let line = exception
        .and_then(|e| e.line_number)
        .filter(|l| *l > 0);
    Some(match line {
        Some(line) => {
            let column = exception
                .and_then(|e| e.line_position)
                .filter(|c| *c > 0)
                .unwrap_or(1);
            PayloadError::at(message, line as u32, column as u32)
        }
        None => PayloadError::new(message),
    })
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    generation: u64,
    queue: mpsc::UnboundedSender<Command>,
) {
    loop {
        let command = match read_message(&mut reader).await {
            Ok(Some(received)) => Command::Inbound {
                generation,
                received,
            },
            Ok(None) => Command::Disconnected {
                generation,
                error: None,
            },
            Err(e) => Command::Disconnected {
                generation,
                error: Some(e.to_string()),
            },
        };
        let done = matches!(command, Command::Disconnected { .. });
        if queue.send(command).is_err() || done {
            break;
        }
    }
}
