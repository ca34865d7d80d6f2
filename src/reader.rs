//! Sequential byte reader over an in-memory buffer.
//!
//! Both binary decoders are built on this reader. MIDI files store
//! multi-byte fields big-endian and delta times as variable-length
//! quantities; SoundFont banks are RIFF containers and therefore
//! little-endian. Every read is bounds-checked and fails with
//! [`DecodeError::TruncatedStream`] rather than panicking.

use crate::error::DecodeError;

/// A cursor over a byte slice with checked reads.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::TruncatedStream { offset: self.pos }
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.data.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads a big-endian 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a little-endian 16-bit integer (RIFF field).
    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian signed 16-bit integer (RIFF field).
    pub fn read_i16_le(&mut self) -> Result<i16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian 32-bit integer (RIFF field).
    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `n` bytes as a string, trimming at the first NUL.
    ///
    /// Used for chunk tags and the fixed-width name fields in SoundFont
    /// record tables. Non-UTF-8 bytes are replaced rather than rejected;
    /// a mangled name never makes a bank unusable.
    pub fn read_fixed_string(&mut self, n: usize) -> Result<String, DecodeError> {
        let bytes = self.take(n)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Reads a MIDI variable-length quantity: 7 bits per byte,
    /// big-endian accumulation, bit 7 set on every byte but the last.
    ///
    /// Fails with `TruncatedStream` if the continuation bit is still set
    /// at end-of-buffer.
    pub fn read_var_length(&mut self) -> Result<u32, DecodeError> {
        let mut value: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n)?;
        Ok(())
    }

    /// Consumes and returns a slice of `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_reads() {
        let mut r = ByteReader::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u16_le().unwrap(), 0x0403);

        let mut r = ByteReader::new(&[0xFF, 0xFF, 0x00, 0x80]);
        assert_eq!(r.read_i16_le().unwrap(), -1);
        assert_eq!(r.read_i16_le().unwrap(), i16::MIN);

        let mut r = ByteReader::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.read_u32().unwrap(), 0x01020304);

        let mut r = ByteReader::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.read_u32_le().unwrap(), 0x04030201);
    }

    #[test]
    fn test_var_length() {
        // Canonical SMF VLQ examples.
        let cases: &[(&[u8], u32)] = &[
            (&[0x00], 0),
            (&[0x7F], 127),
            (&[0x81, 0x00], 128),
            (&[0x81, 0x48], 200),
            (&[0xFF, 0x7F], 16383),
            (&[0x81, 0x80, 0x80, 0x00], 1 << 21),
        ];
        for (bytes, expected) in cases {
            let mut r = ByteReader::new(bytes);
            assert_eq!(r.read_var_length().unwrap(), *expected);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn test_var_length_unterminated() {
        // Continuation bit set on the final byte: must not loop or panic.
        let mut r = ByteReader::new(&[0x81, 0x80]);
        assert!(matches!(
            r.read_var_length(),
            Err(DecodeError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_truncated_reads() {
        let mut r = ByteReader::new(&[0x01]);
        assert!(r.read_u32().is_err());

        let mut r = ByteReader::new(&[0x01, 0x02]);
        assert!(r.skip(3).is_err());
        // A failed read consumes nothing.
        assert_eq!(r.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_fixed_string() {
        let mut r = ByteReader::new(b"Piano\0\0\0rest");
        assert_eq!(r.read_fixed_string(8).unwrap(), "Piano");
        assert_eq!(r.read_fixed_string(4).unwrap(), "rest");
    }
}
