//! Messages exchanged with the designer host over the `tcp-bson` transport.
//!
//! Each message is identified on the wire by a fixed type GUID and carries a
//! BSON document whose field names are PascalCase.

pub mod bitmap;
pub mod codec;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("Failed to decode message: {0}")]
    Decode(#[from] bson::de::Error),
    #[error("Message of {0} bytes exceeds the transport limit")]
    TooLarge(usize),
    #[error("Invalid message length {0}")]
    InvalidLength(i32),
}

const SUPPORTED_PIXEL_FORMATS_ID: Uuid = Uuid::from_u128(0x63481025_7016_43FE_BADC_F2FD0F88609E);
const RENDER_INFO_ID: Uuid = Uuid::from_u128(0x7A3C25D3_3652_438D_8EF1_86E942CC96C0);
const UPDATE_XAML_ID: Uuid = Uuid::from_u128(0x9AEC9A2E_6315_4066_B4BA_E9A9EFD0F8CC);
const UPDATE_XAML_RESULT_ID: Uuid = Uuid::from_u128(0xB7A70093_0C5D_47FD_9261_22086D43A2E2);
const FRAME_ID: Uuid = Uuid::from_u128(0xF58313EE_FE69_4536_819D_F52EDF201A0E);
const FRAME_RECEIVED_ID: Uuid = Uuid::from_u128(0x68014F8A_289D_4851_8D34_5367EDA7F827);
const POINTER_MOVED_ID: Uuid = Uuid::from_u128(0x6228F0B9_99F2_4F62_A621_414DA2881648);
const POINTER_PRESSED_ID: Uuid = Uuid::from_u128(0x7E9E2818_F93F_411A_800E_6B1AEB11DA46);
const POINTER_RELEASED_ID: Uuid = Uuid::from_u128(0x4ADC84EE_E7C8_4BCF_986C_DE3A2F78EDE4);

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565 = 0,
    Rgba8888 = 1,
    Bgra8888 = 2,
}

impl PixelFormat {
    /// Formats offered to the host, most preferred first.
    pub const PREFERRED: [PixelFormat; 3] =
        [PixelFormat::Bgra8888, PixelFormat::Rgba8888, PixelFormat::Rgb565];

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => 4,
        }
    }
}

impl TryFrom<i32> for PixelFormat {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, i32> {
        match v {
            0 => Ok(PixelFormat::Rgb565),
            1 => Ok(PixelFormat::Rgba8888),
            2 => Ok(PixelFormat::Bgra8888),
            other => Err(other),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    None = 0,
    Left = 1,
    Right = 2,
    Middle = 3,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModifier {
    Alt = 0,
    Control = 1,
    Shift = 2,
    Windows = 3,
    LeftMouseButton = 4,
    RightMouseButton = 5,
    MiddleMouseButton = 6,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientSupportedPixelFormats {
    pub formats: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientRenderInfo {
    pub dpi_x: f64,
    pub dpi_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateXaml {
    pub assembly_path: Option<String>,
    pub xaml: String,
    pub xaml_file_project_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionDetails {
    pub exception_type: Option<String>,
    pub message: Option<String>,
    pub line_number: Option<i32>,
    pub line_position: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateXamlResult {
    pub error: Option<String>,
    pub handle: Option<String>,
    pub exception: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frame {
    pub sequence_id: i64,
    pub format: i32,
    pub data: bson::Binary,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrameReceived {
    pub sequence_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointerMoved {
    pub modifiers: Vec<i32>,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointerButton {
    pub modifiers: Vec<i32>,
    pub x: f64,
    pub y: f64,
    pub button: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SupportedPixelFormats(ClientSupportedPixelFormats),
    RenderInfo(ClientRenderInfo),
    UpdateXaml(UpdateXaml),
    UpdateXamlResult(UpdateXamlResult),
    Frame(Frame),
    FrameReceived(FrameReceived),
    PointerMoved(PointerMoved),
    PointerPressed(PointerButton),
    PointerReleased(PointerButton),
}

impl Message {
    pub fn supported_pixel_formats() -> Self {
        Message::SupportedPixelFormats(ClientSupportedPixelFormats {
            formats: PixelFormat::PREFERRED.iter().map(|f| *f as i32).collect(),
        })
    }

    pub fn render_info(dpi: f64) -> Self {
        Message::RenderInfo(ClientRenderInfo { dpi_x: dpi, dpi_y: dpi })
    }

    pub fn type_id(&self) -> Uuid {
        match self {
            Message::SupportedPixelFormats(_) => SUPPORTED_PIXEL_FORMATS_ID,
            Message::RenderInfo(_) => RENDER_INFO_ID,
            Message::UpdateXaml(_) => UPDATE_XAML_ID,
            Message::UpdateXamlResult(_) => UPDATE_XAML_RESULT_ID,
            Message::Frame(_) => FRAME_ID,
            Message::FrameReceived(_) => FRAME_RECEIVED_ID,
            Message::PointerMoved(_) => POINTER_MOVED_ID,
            Message::PointerPressed(_) => POINTER_PRESSED_ID,
            Message::PointerReleased(_) => POINTER_RELEASED_ID,
        }
    }

    pub fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Message::SupportedPixelFormats(m) => bson::to_vec(m)?,
            Message::RenderInfo(m) => bson::to_vec(m)?,
            Message::UpdateXaml(m) => bson::to_vec(m)?,
            Message::UpdateXamlResult(m) => bson::to_vec(m)?,
            Message::Frame(m) => bson::to_vec(m)?,
            Message::FrameReceived(m) => bson::to_vec(m)?,
            Message::PointerMoved(m) => bson::to_vec(m)?,
            Message::PointerPressed(m) | Message::PointerReleased(m) => bson::to_vec(m)?,
        };
        Ok(body)
    }

    /// Decodes a body by type id; unknown ids yield `Ok(None)`.
    pub fn decode(type_id: Uuid, body: &[u8]) -> Result<Option<Self>, ProtocolError> {
        fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
            Ok(bson::from_slice(body)?)
        }
        let message = match type_id {
            SUPPORTED_PIXEL_FORMATS_ID => Message::SupportedPixelFormats(parse(body)?),
            RENDER_INFO_ID => Message::RenderInfo(parse(body)?),
            UPDATE_XAML_ID => Message::UpdateXaml(parse(body)?),
            UPDATE_XAML_RESULT_ID => Message::UpdateXamlResult(parse(body)?),
            FRAME_ID => Message::Frame(parse(body)?),
            FRAME_RECEIVED_ID => Message::FrameReceived(parse(body)?),
            POINTER_MOVED_ID => Message::PointerMoved(parse(body)?),
            POINTER_PRESSED_ID => Message::PointerPressed(parse(body)?),
            POINTER_RELEASED_ID => Message::PointerReleased(parse(body)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

/// Pointer input forwarded from the display surface, in display pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    Moved {
        x: f64,
        y: f64,
        modifiers: Vec<InputModifier>,
    },
    Pressed {
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: Vec<InputModifier>,
    },
    Released {
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: Vec<InputModifier>,
    },
}

impl PointerEvent {
    /// Host message with coordinates normalized by the render scale.
    pub fn to_message(&self, scale: f64) -> Message {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let mods = |m: &[InputModifier]| m.iter().map(|m| *m as i32).collect::<Vec<_>>();
        match self {
            PointerEvent::Moved { x, y, modifiers } => Message::PointerMoved(PointerMoved {
                modifiers: mods(modifiers),
                x: x / scale,
                y: y / scale,
            }),
            PointerEvent::Pressed { x, y, button, modifiers } => {
                Message::PointerPressed(PointerButton {
                    modifiers: mods(modifiers),
                    x: x / scale,
                    y: y / scale,
                    button: *button as i32,
                })
            }
            PointerEvent::Released { x, y, button, modifiers } => {
                Message::PointerReleased(PointerButton {
                    modifiers: mods(modifiers),
                    x: x / scale,
                    y: y / scale,
                    button: *button as i32,
                })
            }
        }
    }
}
