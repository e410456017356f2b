//! Display-ready preview results.

use crate::project::ItemKind;
use image::RgbaImage;
use std::fmt;
use std::sync::Arc;

/// Decoded pixels shared between payload clones.
pub type Bitmap = Arc<RgbaImage>;

/// An error attached to a preview, with an optional 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadError {
    pub message: String,
    /// 1-based line, 0 when unknown.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
}

impl PayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn has_position(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_position() {
            write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// A width or height with an optional allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dimension {
    /// `NaN` when unspecified.
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Dimension {
    pub const UNSET: Self = Self {
        value: f64::NAN,
        min: None,
        max: None,
    };

    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            min: None,
            max: None,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.value.is_nan()
    }

    pub fn has_range(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// Everything the display layer needs to show one preview.
#[derive(Debug, Clone)]
pub struct PreviewPayload {
    pub name: String,
    pub text: Option<String>,
    pub kind: ItemKind,
    pub is_header: bool,
    pub is_window: bool,
    pub window_title: Option<String>,
    pub window_icon: Option<Bitmap>,
    pub can_resize: bool,
    pub bitmap: Option<Bitmap>,
    pub width: Dimension,
    pub height: Dimension,
    pub error: Option<PayloadError>,
    pub output: Option<String>,
    /// Render scale in effect when the payload was delivered. Host frames
    /// are already rendered at `96 * scale` DPI; image items keep their
    /// natural pixel size and are scaled by the display layer.
    pub scale: f64,
}

impl PreviewPayload {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            text: None,
            kind,
            is_header: false,
            is_window: false,
            window_title: None,
            window_icon: None,
            can_resize: true,
            bitmap: None,
            width: Dimension::UNSET,
            height: Dimension::UNSET,
            error: None,
            output: None,
            scale: 1.0,
        }
    }

    /// Clone carrying an error and the captured host output.
    pub fn with_error(&self, error: PayloadError, output: Option<String>) -> Self {
        let mut payload = self.clone();
        payload.error = Some(error);
        payload.output = output;
        payload
    }

    /// Clone carrying a rendered frame and the captured host output.
    pub fn with_bitmap(&self, bitmap: Bitmap, output: Option<String>) -> Self {
        let mut payload = self.clone();
        payload.bitmap = Some(bitmap);
        payload.output = output;
        payload
    }

    /// Tags the payload with the render scale in effect at delivery.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(PayloadError::new("boom").to_string(), "boom");
        assert_eq!(
            PayloadError::at("bad tag", 3, 7).to_string(),
            "bad tag (line 3, column 7)"
        );
    }

    #[test]
    fn test_clone_shares_bitmap() {
        let bitmap: Bitmap = Arc::new(RgbaImage::new(2, 2));
        let payload =
            PreviewPayload::new("Main.axaml", ItemKind::Xaml).with_bitmap(bitmap.clone(), None);
        let copy = payload.clone();
        assert!(Arc::ptr_eq(copy.bitmap.as_ref().unwrap(), &bitmap));
    }

    #[test]
    fn test_dimension_defaults() {
        assert!(!Dimension::UNSET.is_set());
        let d = Dimension::fixed(400.0);
        assert!(d.is_set());
        assert!(!d.has_range());
    }
}
