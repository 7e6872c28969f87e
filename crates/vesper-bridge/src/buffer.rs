//! Owned text buffers handed across the host boundary

use std::fmt;

use zeroize::Zeroize;

/// Size of the big-endian length prefix in [`OwnedBuffer::to_length_prefixed`]
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest buffer whose length fits the `u32` prefix
pub const MAX_BUFFER_LEN: usize = u32::MAX as usize;

/// UTF-8 text owned by the boundary.
///
/// Holds either decrypted plaintext or an error message. The bytes are
/// zeroized when the buffer is released or dropped, on every path.
pub struct OwnedBuffer {
    text: String,
}

impl OwnedBuffer {
    /// Take ownership of `text`. Returns `None` if it exceeds
    /// [`MAX_BUFFER_LEN`].
    pub fn new(text: String) -> Option<Self> {
        if text.len() > MAX_BUFFER_LEN {
            let mut text = text;
            text.zeroize();
            return None;
        }
        Some(Self { text })
    }

    /// Buffer contents.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Buffer contents as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Export as `len:u32 (big endian) | bytes` for hosts that cannot share
    /// Rust-owned memory.
    pub fn to_length_prefixed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + self.text.len());
        out.extend_from_slice(&(self.text.len() as u32).to_be_bytes());
        out.extend_from_slice(self.text.as_bytes());
        out
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        self.text.zeroize();
    }
}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedBuffer({} bytes)", self.text.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixed_export() {
        let buffer = OwnedBuffer::new("ping".to_owned()).unwrap();

        assert_eq!(buffer.to_length_prefixed(), [0, 0, 0, 4, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn empty_buffer_exports_zero_length() {
        let buffer = OwnedBuffer::new(String::new()).unwrap();

        assert!(buffer.is_empty());
        assert_eq!(buffer.to_length_prefixed(), [0, 0, 0, 0]);
    }

    #[test]
    fn debug_hides_contents() {
        let buffer = OwnedBuffer::new("secret".to_owned()).unwrap();
        assert_eq!(format!("{buffer:?}"), "OwnedBuffer(6 bytes)");
    }
}
