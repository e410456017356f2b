//! Turns a [`LoadPayload`] into a display template and, when display options
//! are active, a rewritten copy of the markup.

use crate::assets::file_reference;
use crate::constants::{APPLICATION_ELEMENT, GRID_ELEMENT, GRID_PALETTE, WINDOW_ELEMENT};
use crate::markup::MarkupRegistry;
use crate::payload::{Bitmap, Dimension, PayloadError, PreviewPayload};
use crate::project::{DisplayOptions, ItemKind, LoadPayload};
use crate::utils::{line_col, read_text};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("{message}")]
    Xml {
        message: String,
        line: u32,
        column: u32,
    },
    #[error("Invalid {name} value '{value}'")]
    InvalidDimension {
        name: &'static str,
        value: String,
        line: u32,
        column: u32,
    },
    #[error("An Application root cannot be previewed; open a Window or UserControl instead")]
    ApplicationRoot,
    #[error("Unable to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<FactoryError> for PayloadError {
    fn from(err: FactoryError) -> Self {
        match &err {
            FactoryError::Xml { line, column, .. }
            | FactoryError::InvalidDimension { line, column, .. } => {
                PayloadError::at(err.to_string(), *line, *column)
            }
            FactoryError::Other(e) => PayloadError::new(format!("{:#}", e)),
            _ => PayloadError::new(err.to_string()),
        }
    }
}

/// Retry policy for a markup push that the host rejected.
///
/// Rewritten markup is sent first; if the host reports an error, the
/// verbatim markup is sent once more before the error is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResendState {
    AwaitingResult,
    ResendPending,
    Resent,
}

pub struct PreviewFactory {
    payload: LoadPayload,
    template: PreviewPayload,
    processed: Option<String>,
    resend: ResendState,
}

impl PreviewFactory {
    pub fn new(payload: LoadPayload, registry: &MarkupRegistry) -> Self {
        let mut template = PreviewPayload::new(payload.name(), payload.kind());
        template.is_header = payload.is_header;
        template.error = payload.error.clone();

        let mut factory = Self {
            payload,
            template,
            processed: None,
            resend: ResendState::AwaitingResult,
        };
        if let Err(e) = factory.populate(registry) {
            tracing::debug!("Preview of {} failed: {}", factory.template.name, e);
            factory.template.error = Some(e.into());
        }
        factory
    }

    fn populate(&mut self, registry: &MarkupRegistry) -> Result<(), FactoryError> {
        let Some(item) = self.payload.item.clone() else {
            return Ok(());
        };
        match item.kind {
            ItemKind::Xaml | ItemKind::Text => {
                let text = read_text(&item.path)?;
                self.template.text = Some(text);
                if item.kind == ItemKind::Xaml && self.template.error.is_none() {
                    self.populate_markup(registry)?;
                }
            }
            ItemKind::Image => {
                let bytes = std::fs::read(&item.path)
                    .map_err(|e| anyhow::anyhow!("Failed to open file {:?}: {}", item.path, e))?;
                let bitmap = image::load_from_memory(&bytes)?.to_rgba8();
                self.template.width = Dimension::fixed(bitmap.width() as f64);
                self.template.height = Dimension::fixed(bitmap.height() as f64);
                self.template.bitmap = Some(Arc::new(bitmap));
            }
            ItemKind::None | ItemKind::Directory => {}
        }
        Ok(())
    }

    fn populate_markup(&mut self, registry: &MarkupRegistry) -> Result<(), FactoryError> {
        let text = self.template.text.clone().unwrap_or_default();
        let root = inspect(&text)?;

        self.template.width = root.dimension(&text, "Width", "DesignWidth")?;
        self.template.height = root.dimension(&text, "Height", "DesignHeight")?;

        match root.name.as_str() {
            WINDOW_ELEMENT => {
                self.template.is_window = true;
                self.template.window_title = root.attr("Title").map(str::to_string);
                self.template.can_resize = root
                    .attr("CanResize")
                    .map_or(true, |v| !v.trim().eq_ignore_ascii_case("false"));
                if let Some(icon) = root.attr("Icon") {
                    self.template.window_icon = self.load_icon(icon)?;
                }
            }
            APPLICATION_ELEMENT => return Err(FactoryError::ApplicationRoot),
            _ => {}
        }

        if !self.payload.options.is_none() {
            self.processed = Some(rewrite(&text, self.payload.options, registry, &self.payload)?);
            self.resend = ResendState::ResendPending;
        }
        Ok(())
    }

    fn load_icon(&self, value: &str) -> Result<Option<Bitmap>, FactoryError> {
        let Some(path) = self.payload.assets.resolve(value) else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read window icon {:?}: {}", path, e))?;
        let icon = image::load_from_memory(&bytes)?.to_rgba8();
        Ok(Some(Arc::new(icon)))
    }

    /// True when the template can be shown without a host round-trip.
    pub fn is_immediate(&self) -> bool {
        self.payload.item.is_none()
            || self.template.kind != ItemKind::Xaml
            || self.template.text.as_deref().map_or(true, str::is_empty)
            || self.template.error.is_some()
            || self.template.bitmap.is_some()
    }

    /// Markup to send: the rewritten form if requested and available.
    pub fn xaml(&self, processed: bool) -> Option<&str> {
        if processed {
            if let Some(text) = self.processed.as_deref() {
                return Some(text);
            }
        }
        self.template.text.as_deref()
    }

    /// True once for markup that was rewritten before sending.
    pub fn take_resend(&mut self) -> bool {
        if self.resend == ResendState::ResendPending {
            self.resend = ResendState::Resent;
            true
        } else {
            false
        }
    }

    pub fn template(&self) -> &PreviewPayload {
        &self.template
    }

    pub fn payload(&self) -> &LoadPayload {
        &self.payload
    }

    pub fn events_disabled(&self) -> bool {
        self.payload.options.contains(DisplayOptions::DISABLE_EVENTS)
    }
}

struct RootElement {
    name: String,
    /// (local name, unescaped value)
    attrs: Vec<(String, String)>,
    offset: usize,
}

impl RootElement {
    fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name == local)
            .map(|(_, value)| value.as_str())
    }

    fn dimension(
        &self,
        text: &str,
        plain: &'static str,
        design: &'static str,
    ) -> Result<Dimension, FactoryError> {
        let design_value = match self.attr(design).map(str::trim) {
            None | Some("") => f64::NAN,
            Some(value) => value.parse::<f64>().map_err(|_| {
                let (line, column) = line_col(text, self.offset);
                FactoryError::InvalidDimension {
                    name: design,
                    value: value.to_string(),
                    line,
                    column,
                }
            })?,
        };
        let lenient = |name: &str| self.attr(name).and_then(|v| v.trim().parse::<f64>().ok());
        let value = if design_value.is_nan() {
            lenient(plain).unwrap_or(f64::NAN)
        } else {
            design_value
        };
        Ok(Dimension {
            value,
            min: lenient(&format!("Min{}", plain)),
            max: lenient(&format!("Max{}", plain)),
        })
    }
}

fn xml_error(text: &str, offset: usize, message: impl std::fmt::Display) -> FactoryError {
    let (line, column) = line_col(text, offset);
    FactoryError::Xml {
        message: message.to_string(),
        line,
        column,
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn attr_local_name(attr: &Attribute<'_>) -> String {
    String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned()
}

/// Checks the document is well formed and returns its root element.
fn inspect(text: &str) -> Result<RootElement, FactoryError> {
    let mut reader = Reader::from_str(text);
    let mut root: Option<RootElement> = None;
    let mut depth = 0usize;

    loop {
        let offset = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| xml_error(text, reader.error_position() as usize, e))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let mut attrs = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| xml_error(text, offset, err))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| xml_error(text, offset, err))?;
                    attrs.push((attr_local_name(&attr), value.into_owned()));
                }
                if root.is_none() {
                    root = Some(RootElement {
                        name: local_name(e),
                        attrs,
                        offset,
                    });
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    if depth > 0 {
        return Err(xml_error(text, text.len(), "Unexpected end of document"));
    }
    root.ok_or_else(|| xml_error(text, 0, "Root element is missing"))
}

/// Applies display options to every element the registry knows about.
fn rewrite(
    text: &str,
    options: DisplayOptions,
    registry: &MarkupRegistry,
    payload: &LoadPayload,
) -> Result<String, FactoryError> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut grid_index = 0usize;

    loop {
        let offset = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| xml_error(text, reader.error_position() as usize, e))?;
        let written = match event {
            Event::Start(ref e) => Event::Start(rewrite_element(
                text, offset, e, options, registry, payload, &mut grid_index,
            )?),
            Event::Empty(ref e) => Event::Empty(rewrite_element(
                text, offset, e, options, registry, payload, &mut grid_index,
            )?),
            Event::Eof => break,
            other => other,
        };
        writer
            .write_event(written)
            .map_err(|e| anyhow::anyhow!("Failed to write markup: {}", e))?;
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| FactoryError::Other(anyhow::anyhow!("Rewritten markup is not UTF-8: {}", e)))
}

fn rewrite_element<'a>(
    text: &str,
    offset: usize,
    element: &BytesStart<'a>,
    options: DisplayOptions,
    registry: &MarkupRegistry,
    payload: &LoadPayload,
    grid_index: &mut usize,
) -> Result<BytesStart<'a>, FactoryError> {
    let name = local_name(element);
    let info = registry.lookup(&name);
    let is_grid = name == GRID_ELEMENT;
    if info.is_none() && !is_grid {
        return Ok(element.clone());
    }

    let mut out = element.clone();
    out.clear_attributes();
    let mut has_grid_lines = false;
    let mut has_background = false;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| xml_error(text, offset, e))?;
        let local = attr_local_name(&attr);
        has_grid_lines |= local == "ShowGridLines";
        has_background |= local == "Background";

        if let Some(info) = info {
            if options.contains(DisplayOptions::DISABLE_EVENTS) && info.is_event(&local) {
                continue;
            }
            if options.contains(DisplayOptions::PREFETCH_ASSETS) && info.is_asset(&local) {
                let value = attr
                    .unescape_value()
                    .map_err(|e| xml_error(text, offset, e))?;
                let reference = payload
                    .assets
                    .resolve(&value)
                    .and_then(|p| file_reference(&p));
                if let Some(reference) = reference {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    out.push_attribute((key.as_str(), reference.as_str()));
                    continue;
                }
            }
        }
        out.push_attribute(attr);
    }

    if is_grid {
        if options.contains(DisplayOptions::SHOW_GRID_LINES) && !has_grid_lines {
            out.push_attribute(("ShowGridLines", "True"));
        }
        if options.contains(DisplayOptions::COLOR_GRID_CELLS) && !has_background {
            out.push_attribute(("Background", GRID_PALETTE[*grid_index % GRID_PALETTE.len()]));
            *grid_index += 1;
        }
    }
    Ok(out)
}
