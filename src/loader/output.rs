use super::PreviewEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Most recent host output lines, oldest evicted first.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All buffered lines joined by newlines, or `None` if empty.
    pub fn text(&self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        Some(self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
    }
}

pub(crate) type SharedOutput = Arc<Mutex<OutputBuffer>>;

pub(crate) fn lock(output: &SharedOutput) -> MutexGuard<'_, OutputBuffer> {
    output.lock().unwrap_or_else(|e| e.into_inner())
}

/// Receives host stdout/stderr lines.
///
/// Lines are kept only while a preview is starting or in flight.
#[derive(Clone)]
pub struct OutputSink {
    buffer: SharedOutput,
    capturing: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PreviewEvent>,
    disposed: CancellationToken,
}

impl OutputSink {
    pub(crate) fn new(
        buffer: SharedOutput,
        capturing: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<PreviewEvent>,
        disposed: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            capturing,
            events,
            disposed,
        }
    }

    pub fn line(&self, line: impl Into<String>) {
        if !self.capturing.load(Ordering::Acquire) || self.disposed.is_cancelled() {
            return;
        }
        let line = line.into();
        tracing::trace!(target: "host", "{}", line);
        lock(&self.buffer).push(line.clone());
        if !line.is_empty() {
            let _ = self.events.send(PreviewEvent::Output(line));
        }
    }
}
