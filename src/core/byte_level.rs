//! GPT-2 byte-level remapping.
//!
//! Byte-level vocabularies store tokens as strings in which every byte is
//! replaced by a printable character: bytes that are already printable
//! (`!`..=`~`, `¡`..=`¬`, `®`..=`ÿ`) stand for themselves and the remaining
//! 68 bytes are assigned code points from U+0100 upwards, in byte order.
//! Space (0x20) therefore becomes `Ġ` (U+0120) and newline becomes `Ċ`.

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

fn is_direct(b: u8) -> bool {
    matches!(b, 33..=126 | 161..=172 | 174..=255)
}

static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut mapping = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0u8..=255 {
        mapping[b as usize] = if is_direct(b) {
            char::from(b)
        } else {
            shifted += 1;
            // 256 + shifted - 1 stays below U+0144, always a valid scalar.
            char::from_u32(255 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER)
        };
    }
    mapping
});

static CHAR_TO_BYTE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// Printable stand-in for a raw byte.
#[inline]
pub fn byte_to_char(byte: u8) -> char {
    BYTE_TO_CHAR[byte as usize]
}

/// Raw byte behind a printable stand-in, if `ch` is one.
#[inline]
pub fn char_to_byte(ch: char) -> Option<u8> {
    CHAR_TO_BYTE.get(&ch).copied()
}

/// Remap raw bytes to their byte-level string.
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| byte_to_char(b)).collect()
}

/// Invert [`byte_level_encode`]; `None` if `text` holds a character outside the map.
pub fn byte_level_decode(text: &str) -> Option<Vec<u8>> {
    text.chars().map(char_to_byte).collect()
}
