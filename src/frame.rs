use byteorder::{ByteOrder, LittleEndian};

/// Length of the scope name tag at the start of every stream.
pub const SCOPE_NAME_LEN: usize = 6;
/// Length of the stream header: scope name tag plus declared file length.
pub const HEADER_LEN: usize = SCOPE_NAME_LEN + 4;

/// Errors raised while decoding a capture stream.
///
/// Any of these discards the capture being decoded; a previously decoded
/// capture stays untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Device sent no capture data")]
    EmptyStream,

    #[error("Stream truncated at byte {offset}: {need} bytes needed, {available} available")]
    Truncated {
        offset: usize,
        need: usize,
        available: usize,
    },

    #[error("Channel block at byte {offset} declares {declared} bytes, fewer than the {min} fixed field bytes")]
    BlockTooShort {
        offset: usize,
        declared: u32,
        min: u32,
    },

    #[error("Channel block at byte {offset} declares {samples} samples that do not fit its {declared} byte length")]
    SamplesExceedBlock {
        offset: usize,
        samples: u32,
        declared: u32,
    },

    #[error("Stream contains more than {max} channel blocks")]
    TooManyChannels { max: usize },

    #[error("Unknown timebase code {code}")]
    UnknownTimebase { code: u32 },

    #[error("Unknown sensitivity code {code}")]
    UnknownSensitivity { code: u32 },

    #[error("Unknown attenuation code {code}")]
    UnknownAttenuation { code: u32 },
}

/// Bounds-checked little-endian reader over a received capture stream.
///
/// Every read advances the cursor; a read past the end of the buffer fails
/// with [`FormatError::Truncated`] carrying the exact position. The buffer
/// length is authoritative: lengths declared inside the stream are never
/// trusted past it.
#[derive(Debug)]
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset from the start of the stream.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, need: usize) -> Result<&'a [u8], FormatError> {
        if need > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                need,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + need];
        self.pos += need;
        Ok(bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, FormatError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, FormatError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, FormatError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        self.take(len)
    }

    /// Read a fixed-length name tag, dropping NUL padding.
    pub fn read_tag(&mut self, len: usize) -> Result<String, FormatError> {
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Skip `len` bytes without interpreting them.
    pub fn skip(&mut self, len: usize) -> Result<(), FormatError> {
        self.take(len).map(|_| ())
    }

    /// Move the cursor to an absolute offset at or before the buffer end.
    pub fn seek_to(&mut self, pos: usize) -> Result<(), FormatError> {
        if pos > self.buf.len() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                need: pos - self.pos,
                available: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }
}

/// Fixed ten byte header at the start of every capture stream.
///
/// `file_length` is the capture length the firmware claims. Real devices
/// routinely declare a value that differs from the number of bytes they then
/// send, so decoding treats the received length as authoritative and keeps
/// this field for accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub name: String,
    pub file_length: u32,
}

impl StreamHeader {
    /// Parse the header at the cursor position.
    pub fn parse(cursor: &mut FrameCursor) -> Result<Self, FormatError> {
        let name = cursor.read_tag(SCOPE_NAME_LEN)?;
        let file_length = cursor.read_u32()?;
        Ok(Self { name, file_length })
    }
}
