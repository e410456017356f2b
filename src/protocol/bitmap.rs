use super::{Frame, PixelFormat};
use image::RgbaImage;

/// Converts a host frame into an RGBA image.
///
/// Returns `None` for unknown formats or buffers too short for the declared
/// geometry; such frames are skipped.
pub fn frame_to_bitmap(frame: &Frame) -> Option<RgbaImage> {
    let format = PixelFormat::try_from(frame.format).ok()?;
    if frame.width <= 0 || frame.height <= 0 || frame.stride <= 0 {
        return None;
    }
    let (width, height, stride) = (
        frame.width as usize,
        frame.height as usize,
        frame.stride as usize,
    );
    let bpp = format.bytes_per_pixel();
    let row_bytes = width.checked_mul(bpp)?;
    if stride < row_bytes {
        return None;
    }
    let data = &frame.data.bytes;
    let needed = stride.checked_mul(height - 1)?.checked_add(row_bytes)?;
    if data.len() < needed {
        return None;
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let line = &data[row * stride..row * stride + row_bytes];
        match format {
            PixelFormat::Rgba8888 => pixels.extend_from_slice(line),
            PixelFormat::Bgra8888 => {
                for px in line.chunks_exact(4) {
                    pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            }
            PixelFormat::Rgb565 => {
                for px in line.chunks_exact(2) {
                    let v = u16::from_le_bytes([px[0], px[1]]);
                    let r = ((v >> 11) & 0x1F) as u32;
                    let g = ((v >> 5) & 0x3F) as u32;
                    let b = (v & 0x1F) as u32;
                    pixels.extend_from_slice(&[
                        (r * 255 / 31) as u8,
                        (g * 255 / 63) as u8,
                        (b * 255 / 31) as u8,
                        0xFF,
                    ]);
                }
            }
        }
    }
    RgbaImage::from_raw(width as u32, height as u32, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::spec::BinarySubtype;

    fn frame(format: PixelFormat, width: i32, height: i32, stride: i32, bytes: Vec<u8>) -> Frame {
        Frame {
            sequence_id: 1,
            format: format as i32,
            data: bson::Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            },
            width,
            height,
            stride,
        }
    }

    #[test]
    fn test_bgra_is_swizzled_and_padding_skipped() {
        // 1x2 image, stride 8 leaves 4 bytes of row padding
        let bytes = vec![10, 20, 30, 255, 9, 9, 9, 9, 1, 2, 3, 128];
        let img = frame_to_bitmap(&frame(PixelFormat::Bgra8888, 1, 2, 8, bytes)).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10, 255]);
        assert_eq!(img.get_pixel(0, 1).0, [3, 2, 1, 128]);
    }

    #[test]
    fn test_rgba_passthrough() {
        let bytes = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let img = frame_to_bitmap(&frame(PixelFormat::Rgba8888, 2, 1, 8, bytes)).unwrap();
        assert_eq!(img.get_pixel(1, 0).0, [5, 6, 7, 8]);
    }

    #[test]
    fn test_rgb565_expands() {
        let white = 0xFFFF_u16.to_le_bytes();
        let red = 0xF800_u16.to_le_bytes();
        let bytes = [white, red].concat();
        let img = frame_to_bitmap(&frame(PixelFormat::Rgb565, 2, 1, 4, bytes)).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_bad_frames_are_dropped() {
        assert!(frame_to_bitmap(&frame(PixelFormat::Rgba8888, 2, 2, 8, vec![0; 10])).is_none());
        assert!(frame_to_bitmap(&frame(PixelFormat::Rgba8888, 2, 1, 4, vec![0; 8])).is_none());
        assert!(frame_to_bitmap(&frame(PixelFormat::Rgba8888, 0, 1, 4, vec![])).is_none());
        let mut unknown = frame(PixelFormat::Rgba8888, 1, 1, 4, vec![0; 4]);
        unknown.format = 42;
        assert!(frame_to_bitmap(&unknown).is_none());
    }
}
