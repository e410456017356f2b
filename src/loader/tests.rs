use super::*;
use crate::constants::LOOPBACK;
use crate::payload::PayloadError;
use crate::project::{Application, DisplayOptions, Project};
use crate::protocol::codec::{read_message, write_message, Received};
use crate::protocol::{ExceptionDetails, Frame, Message, MouseButton, UpdateXamlResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MARKUP: &str = r#"<UserControl xmlns="https://github.com/avaloniaui">
  <StackPanel>
    <Button Click="OnClick" Content="Go"/>
    <Grid Tag="Cells"/>
  </StackPanel>
</UserControl>"#;

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Render,
    /// Never connects back.
    Silent,
}

#[derive(Default)]
struct Record {
    received: Mutex<Vec<Message>>,
    launches: AtomicUsize,
    kills: AtomicUsize,
}

impl Record {
    fn messages(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    fn updates(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::UpdateXaml(u) => Some(u.xaml),
                _ => None,
            })
            .collect()
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

struct FakeLauncher {
    behavior: Behavior,
    locate_fails: bool,
    record: Arc<Record>,
}

#[async_trait]
impl HostLauncher for FakeLauncher {
    fn locate(&self, _version: Option<&str>) -> Result<PathBuf, LoaderError> {
        if self.locate_fails {
            return Err(LoaderError::NotFound("designer host app".into()));
        }
        Ok(PathBuf::from("/packages/avalonia/11.0.10/tools/HostApp.dll"))
    }

    async fn launch(
        &self,
        invocation: &HostInvocation,
        output: OutputSink,
    ) -> Result<Box<dyn HostProcess>, LoaderError> {
        self.record.launches.fetch_add(1, Ordering::SeqCst);
        output.line("fake host starting");
        let task = match self.behavior {
            Behavior::Render => Some(tokio::spawn(serve(invocation.port, self.record.clone()))),
            Behavior::Silent => None,
        };
        Ok(Box::new(FakeProcess {
            task,
            record: self.record.clone(),
        }))
    }
}

struct FakeProcess {
    task: Option<JoinHandle<()>>,
    record: Arc<Record>,
}

impl HostProcess for FakeProcess {
    fn kill(&mut self) {
        self.record.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn rejection(message: &str, line: i32, column: i32) -> Message {
    Message::UpdateXamlResult(UpdateXamlResult {
        exception: Some(ExceptionDetails {
            exception_type: Some("XamlLoadException".into()),
            message: Some(message.into()),
            line_number: Some(line),
            line_position: Some(column),
        }),
        ..Default::default()
    })
}

/// Accepts markup unless it mentions `Broken`, or it was rewritten with grid
/// lines for an element tagged `RejectRewrite`.
async fn serve(port: u16, record: Arc<Record>) {
    let Ok(stream) = TcpStream::connect((LOOPBACK, port)).await else {
        return;
    };
    let (mut reader, mut writer) = stream.into_split();
    let mut sequence = 0;
    while let Ok(Some(Received::Message(message))) = read_message(&mut reader).await {
        record.received.lock().unwrap().push(message.clone());
        let Message::UpdateXaml(update) = message else {
            continue;
        };
        let reply = if update.xaml.contains("Broken") {
            rejection("Unable to resolve type Broken", 3, 9)
        } else if update.xaml.contains("RejectRewrite") && update.xaml.contains("ShowGridLines") {
            rejection("Rewritten markup rejected", 4, 5)
        } else {
            Message::UpdateXamlResult(UpdateXamlResult::default())
        };
        let failed = !matches!(&reply, Message::UpdateXamlResult(r) if r.exception.is_none());
        if write_message(&mut writer, &reply).await.is_err() {
            break;
        }
        if failed {
            continue;
        }
        sequence += 1;
        let frame = Message::Frame(Frame {
            sequence_id: sequence,
            format: 1,
            data: bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![0x80; 16],
            },
            width: 2,
            height: 2,
            stride: 8,
        });
        if write_message(&mut writer, &frame).await.is_err() {
            break;
        }
    }
}

struct Harness {
    loader: RemoteLoader,
    events: mpsc::UnboundedReceiver<PreviewEvent>,
    record: Arc<Record>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(behavior: Behavior) -> Self {
        Self::with(behavior, false, Duration::from_secs(5))
    }

    fn with(behavior: Behavior, locate_fails: bool, connect_timeout: Duration) -> Self {
        let record = Arc::new(Record::default());
        let launcher = Arc::new(FakeLauncher {
            behavior,
            locate_fails,
            record: record.clone(),
        });
        let settings = LoaderSettings {
            connect_timeout,
            ..Default::default()
        };
        let (loader, events) =
            RemoteLoader::new(settings, launcher, Arc::new(MarkupRegistry::builtin()));
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Views")).unwrap();
        Self {
            loader,
            events,
            record,
            dir,
        }
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn payload(&self, file: &Path, assembly: &str, options: DisplayOptions) -> LoadPayload {
        let root = self.dir.path();
        LoadPayload::builder()
            .file(file)
            .project(Project::new("App", root))
            .application(Application {
                assembly_path: root.join(assembly),
                runtime_config_path: root.join("App.runtimeconfig.json"),
                deps_path: root.join("App.deps.json"),
            })
            .options(options)
            .build()
    }

    async fn next_payload(&mut self) -> PreviewPayload {
        loop {
            let event = timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("timed out waiting for a preview")
                .expect("event channel closed");
            if let PreviewEvent::Payload(payload) = event {
                return payload;
            }
        }
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_markup_is_rendered_by_host() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);
    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));

    let payload = h.next_payload().await;
    assert!(payload.error.is_none());
    let bitmap = payload.bitmap.expect("rendered frame");
    assert_eq!((bitmap.width(), bitmap.height()), (2, 2));
    assert!(payload.output.unwrap().contains("fake host starting"));
    assert!(h.loader.is_running());

    let record = h.record.clone();
    wait_for(|| {
        record
            .messages()
            .iter()
            .any(|m| matches!(m, Message::FrameReceived(f) if f.sequence_id == 1))
    })
    .await;
    let messages = h.record.messages();
    assert_eq!(messages[0], Message::supported_pixel_formats());
    assert_eq!(messages[1], Message::render_info(96.0));
    match &messages[2] {
        Message::UpdateXaml(update) => {
            assert_eq!(update.xaml, MARKUP);
            assert!(update.assembly_path.as_deref().unwrap().ends_with("App.dll"));
            assert_eq!(update.xaml_file_project_path.as_deref(), Some("/Views/Main.axaml"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.record.launches(), 1);
}

#[tokio::test]
async fn test_disable_events_toggle_reuses_host() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);

    for options in [
        DisplayOptions::NONE,
        DisplayOptions::DISABLE_EVENTS,
        DisplayOptions::NONE,
    ] {
        h.loader.update(h.payload(&file, "App.dll", options));
        assert!(h.next_payload().await.bitmap.is_some());
    }

    let updates = h.record.updates();
    assert_eq!(updates.len(), 3);
    assert!(updates[0].contains(r#"Click="OnClick""#));
    assert!(!updates[1].contains("Click"));
    assert!(updates[1].contains(r#"Content="Go""#));
    assert!(updates[2].contains(r#"Click="OnClick""#));
    assert_eq!(h.record.launches(), 1);
}

#[tokio::test]
async fn test_late_host_error_does_not_reach_immediate_preview() {
    let mut h = Harness::new(Behavior::Render);
    let markup = MARKUP.replace("<Grid Tag=\"Cells\"/>", "<Broken/>");
    let broken = h.write("Views/Main.axaml", &markup);
    let notes = h.write("notes.txt", "plain text");

    h.loader.update(h.payload(&broken, "App.dll", DisplayOptions::NONE));
    h.loader.update(h.payload(&notes, "App.dll", DisplayOptions::NONE));

    let payload = h.next_payload().await;
    assert_eq!(payload.name, "notes.txt");
    assert_eq!(payload.text.as_deref(), Some("plain text"));
    assert!(payload.error.is_none());

    let record = h.record.clone();
    wait_for(|| record.updates().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.loader.flush().await;
    while let Ok(event) = h.events.try_recv() {
        if let PreviewEvent::Payload(late) = event {
            panic!("unexpected payload {} {:?}", late.name, late.error);
        }
    }
}

#[tokio::test]
async fn test_assembly_change_restarts_host() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);

    h.loader.update(h.payload(&file, "First.dll", DisplayOptions::NONE));
    assert!(h.next_payload().await.bitmap.is_some());
    h.loader.update(h.payload(&file, "Second.dll", DisplayOptions::NONE));
    assert!(h.next_payload().await.bitmap.is_some());

    assert_eq!(h.record.launches(), 2);
    assert_eq!(h.record.kills(), 1);
    assert!(h.loader.is_running());
}

#[tokio::test]
async fn test_rejected_rewrite_is_resent_verbatim() {
    let mut h = Harness::new(Behavior::Render);
    let markup = MARKUP.replace(r#"Tag="Cells""#, r#"Tag="RejectRewrite""#);
    let file = h.write("Views/Main.axaml", &markup);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::SHOW_GRID_LINES));
    let payload = h.next_payload().await;
    assert!(payload.error.is_none());
    assert!(payload.bitmap.is_some());

    let updates = h.record.updates();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].contains("ShowGridLines"));
    assert_eq!(updates[1], markup);
}

#[tokio::test]
async fn test_host_error_is_reported_after_one_resend() {
    let mut h = Harness::new(Behavior::Render);
    let markup = MARKUP.replace("<Grid Tag=\"Cells\"/>", "<Broken/>");
    let file = h.write("Views/Main.axaml", &markup);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::DISABLE_EVENTS));
    let payload = h.next_payload().await;
    assert!(payload.bitmap.is_none());
    assert_eq!(
        payload.error,
        Some(PayloadError::at("Unable to resolve type Broken", 3, 9))
    );
    assert!(payload.output.is_some());
    assert_eq!(h.record.updates().len(), 2);
}

#[tokio::test]
async fn test_host_error_without_options_is_not_resent() {
    let mut h = Harness::new(Behavior::Render);
    let markup = MARKUP.replace("<Grid Tag=\"Cells\"/>", "<Broken/>");
    let file = h.write("Views/Main.axaml", &markup);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    let payload = h.next_payload().await;
    assert!(payload.error.unwrap().has_position());
    assert_eq!(h.record.updates().len(), 1);
}

#[tokio::test]
async fn test_connect_timeout_stops_host() {
    let mut h = Harness::with(Behavior::Silent, false, Duration::from_millis(200));
    let file = h.write("Views/Main.axaml", MARKUP);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    let payload = h.next_payload().await;
    let error = payload.error.unwrap();
    assert!(error.message.contains("did not connect"), "{}", error);
    assert!(payload.output.unwrap().contains("fake host starting"));
    assert!(payload.text.is_some());
    assert_eq!(h.record.kills(), 1);
    assert!(!h.loader.is_running());
}

#[tokio::test]
async fn test_missing_host_app_is_reported() {
    let mut h = Harness::with(Behavior::Render, true, Duration::from_secs(5));
    let file = h.write("Views/Main.axaml", MARKUP);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    let payload = h.next_payload().await;
    assert!(payload.error.unwrap().message.contains("not found"));
    assert_eq!(h.record.launches(), 0);
}

#[tokio::test]
async fn test_immediate_payload_and_rescale() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("notes.txt", "plain text");

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    let payload = h.next_payload().await;
    assert_eq!(payload.text.as_deref(), Some("plain text"));
    assert_eq!(payload.scale, 1.0);

    h.loader.set_scale(2.0);
    assert_eq!(h.loader.scale(), 2.0);
    let rescaled = h.next_payload().await;
    assert_eq!(rescaled.scale, 2.0);
    assert_eq!(rescaled.text.as_deref(), Some("plain text"));

    // ignored
    h.loader.set_scale(-1.0);
    assert_eq!(h.loader.scale(), 2.0);
    assert_eq!(h.record.launches(), 0);
}

#[tokio::test]
async fn test_pointer_events_are_scaled_and_filtered() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);
    h.loader.set_scale(2.0);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    h.next_payload().await;
    h.loader.send_pointer_event(PointerEvent::Pressed {
        x: 20.0,
        y: 10.0,
        button: MouseButton::Left,
        modifiers: Vec::new(),
    });

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::DISABLE_EVENTS));
    h.next_payload().await;
    h.loader.send_pointer_event(PointerEvent::Moved {
        x: 4.0,
        y: 4.0,
        modifiers: Vec::new(),
    });
    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    h.next_payload().await;

    let record = h.record.clone();
    wait_for(|| record.updates().len() == 3).await;
    let messages = h.record.messages();
    assert_eq!(messages[1], Message::render_info(192.0));
    let pressed: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::PointerPressed(p) => Some((p.x, p.y, p.button)),
            _ => None,
        })
        .collect();
    assert_eq!(pressed, vec![(10.0, 5.0, MouseButton::Left as i32)]);
    assert!(!messages.iter().any(|m| matches!(m, Message::PointerMoved(_))));
}

#[tokio::test]
async fn test_stop_clears_state_and_next_update_restarts() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    h.next_payload().await;
    h.loader.stop();
    h.loader.flush().await;
    assert!(!h.loader.is_running());
    assert_eq!(h.loader.process_output(), None);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    assert!(h.next_payload().await.bitmap.is_some());
    assert_eq!(h.record.launches(), 2);
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_silences_events() {
    let mut h = Harness::new(Behavior::Render);
    let file = h.write("Views/Main.axaml", MARKUP);

    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));
    h.next_payload().await;

    h.loader.dispose();
    h.loader.dispose();
    assert!(h.loader.is_disposed());
    h.loader.update(h.payload(&file, "App.dll", DisplayOptions::NONE));

    let record = h.record.clone();
    wait_for(|| record.kills() == 1).await;
    while let Ok(Some(event)) = timeout(Duration::from_millis(300), h.events.recv()).await {
        assert!(!matches!(event, PreviewEvent::Payload(_)));
    }
    assert_eq!(h.record.launches(), 1);
    assert!(!h.loader.is_running());
}
