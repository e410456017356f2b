use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The bytes could not be interpreted in any supported encoding.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unable to decode text: {0}")]
pub struct TextDecodeError(pub String);

/// Reads a text file, detecting its encoding.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let text = decode_text(&bytes).with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(text)
}

/// Decodes bytes by sniffing a byte-order mark, then trying strict UTF-8,
/// BOM-less UTF-16 and finally Latin-1.
pub fn decode_text(bytes: &[u8]) -> Result<String, TextDecodeError> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8(rest.to_vec()).map_err(|e| TextDecodeError(e.to_string()));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        if !looks_like_utf16(bytes) {
            return Ok(text.to_string());
        }
    }
    if looks_like_utf16(bytes) {
        // NUL in the high byte of ASCII characters tells the byte order
        let le = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
        let be = bytes.iter().step_by(2).filter(|b| **b == 0).count();
        return if le >= be {
            decode_utf16(bytes, u16::from_le_bytes)
        } else {
            decode_utf16(bytes, u16::from_be_bytes)
        };
    }
    Ok(bytes.iter().map(|&b| b as char).collect())
}

fn looks_like_utf16(bytes: &[u8]) -> bool {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return false;
    }
    let zeros = bytes.iter().filter(|b| **b == 0).count();
    zeros * 4 >= bytes.len()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, TextDecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(TextDecodeError("odd number of bytes for UTF-16".to_string()));
    }
    let units = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| TextDecodeError(e.to_string()))
}

/// Converts a byte offset into a 1-based line and column.
pub fn line_col(text: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(text.len());
    let before = text.as_bytes()[..offset].to_vec();
    let line = before.iter().filter(|b| **b == b'\n').count() as u32 + 1;
    let line_start = before.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
    let column = String::from_utf8_lossy(&before[line_start..]).chars().count() as u32 + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<TextBlock Text=\"Café\"/>";

    fn latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u32 as u8).collect()
    }

    fn utf16le_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_all_encodings_decode_identically() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("utf8.axaml", SAMPLE.as_bytes().to_vec()),
            ("latin1.axaml", latin1(SAMPLE)),
            ("utf16.axaml", utf16le_bom(SAMPLE)),
        ];
        for (name, bytes) in files {
            let path = dir.path().join(name);
            fs::write(&path, bytes).unwrap();
            assert_eq!(read_text(&path).unwrap(), SAMPLE, "{}", name);
        }
    }

    #[test]
    fn test_utf16_without_bom() {
        let mut bytes = Vec::new();
        for unit in SAMPLE.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_text(&bytes).unwrap(), SAMPLE);
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(SAMPLE.as_bytes());
        assert_eq!(decode_text(&bytes).unwrap(), SAMPLE);
    }

    #[test]
    fn test_broken_utf16_fails() {
        // lone high surrogate
        let bytes = [0xFF, 0xFE, 0x00, 0xD8];
        assert!(decode_text(&bytes).is_err());
    }

    #[test]
    fn test_read_text_not_found() {
        let path = std::env::temp_dir().join("nonexistent_axaml_preview_12345.axaml");
        assert!(read_text(&path).is_err());
    }

    #[test]
    fn test_line_col() {
        let text = "<a>\n  <b>\n</a>";
        assert_eq!(line_col(text, 0), (1, 1));
        assert_eq!(line_col(text, 6), (2, 3));
        assert_eq!(line_col(text, 1000), (3, 5));
    }
}
