use crate::calibrate::Channel;
use crate::frame::{FormatError, FrameCursor, StreamHeader};

/// Most channel blocks a single capture can carry.
pub const MAX_CHANNELS: usize = 6;

/// Screen bitmap width in pixels.
pub const BITMAP_WIDTH: usize = 640;
/// Screen bitmap height in pixels.
pub const BITMAP_HEIGHT: usize = 480;
/// Colour channels per pixel.
pub const BITMAP_CHANNELS: usize = 3;
/// Total pixel bytes of a bitmap capture. A stream declaring exactly this
/// length carries the rendered screen instead of channel blocks.
const BITMAP_BYTES: usize = BITMAP_WIDTH * BITMAP_HEIGHT * BITMAP_CHANNELS;

const CHANNEL_NAME_LEN: usize = 3;
/// Fixed field bytes of a channel block counted by `block_length`:
/// everything between the length field and the samples.
const CHANNEL_FIXED_LEN: u32 = 44;

/// One channel block as it appears on the wire, before calibration.
///
/// The three `unknown` fields and `vertical_step` are present in every block
/// but their meaning is unconfirmed reverse engineering; they are carried
/// through uninterpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannel {
    pub name: String,
    pub block_length: u32,
    pub screen_length: u32,
    pub sample_length: u32,
    pub slow: u32,
    pub timebase: u32,
    pub offset: i32,
    pub sensitivity: u32,
    pub attenuation: u32,
    /// Unconfirmed fields, possibly time step, frequency and cycle count.
    pub unknown: [u32; 3],
    /// Unconfirmed per-sample vertical step.
    pub vertical_step: f32,
    pub samples: Vec<i16>,
}

/// Raw screen pixels of a bitmap capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// Flat pixel data, `width * height * channels` bytes.
    pub data: Vec<u8>,
}

/// Payload of one capture. A capture holds either waveform vectors or a
/// rendered screen, never both.
#[derive(Debug, Clone)]
pub enum CaptureData {
    /// Calibrated waveform traces, one entry per captured channel.
    Vector(Vec<Channel>),
    /// The scope screen as raw pixels.
    Bitmap(Bitmap),
}

/// Decode one received capture stream into its header and payload.
///
/// The received length is authoritative: the declared file length selects the
/// payload shape, but decoding never reads past the bytes that actually
/// arrived. Any failure discards the whole capture.
pub fn decode_capture(buf: &[u8]) -> Result<(StreamHeader, CaptureData), FormatError> {
    if buf.is_empty() {
        return Err(FormatError::EmptyStream);
    }

    let mut cursor = FrameCursor::new(buf);
    let header = StreamHeader::parse(&mut cursor)?;
    if header.file_length as usize != cursor.remaining() {
        log::debug!(
            "Header of {} declares {} payload bytes, {} received",
            header.name,
            header.file_length,
            cursor.remaining()
        );
    }

    let data = if header.file_length as usize == BITMAP_BYTES {
        CaptureData::Bitmap(decode_bitmap(&mut cursor)?)
    } else {
        CaptureData::Vector(decode_channels(&mut cursor)?)
    };

    Ok((header, data))
}

fn decode_bitmap(cursor: &mut FrameCursor) -> Result<Bitmap, FormatError> {
    let data = cursor.read_bytes(BITMAP_BYTES)?.to_vec();
    if cursor.remaining() > 0 {
        log::debug!("Ignoring {} bytes after the bitmap payload", cursor.remaining());
    }
    log::debug!("Decoded {}x{} screen bitmap", BITMAP_WIDTH, BITMAP_HEIGHT);
    Ok(Bitmap {
        width: BITMAP_WIDTH,
        height: BITMAP_HEIGHT,
        channels: BITMAP_CHANNELS,
        data,
    })
}

fn decode_channels(cursor: &mut FrameCursor) -> Result<Vec<Channel>, FormatError> {
    let mut channels = Vec::new();
    while cursor.remaining() > 0 {
        if channels.len() == MAX_CHANNELS {
            return Err(FormatError::TooManyChannels { max: MAX_CHANNELS });
        }
        let raw = read_channel_block(cursor)?;
        channels.push(Channel::calibrate(raw)?);
    }
    Ok(channels)
}

/// Read one channel block. `block_length` counts the bytes that follow the
/// length field, so the next block starts right after them.
fn read_channel_block(cursor: &mut FrameCursor) -> Result<RawChannel, FormatError> {
    let block_offset = cursor.position();
    let name = cursor.read_tag(CHANNEL_NAME_LEN)?;
    let block_length = cursor.read_u32()?;

    if block_length < CHANNEL_FIXED_LEN {
        return Err(FormatError::BlockTooShort {
            offset: block_offset,
            declared: block_length,
            min: CHANNEL_FIXED_LEN,
        });
    }
    let block_end = cursor.position() + block_length as usize;
    if block_end > cursor.len() {
        return Err(FormatError::Truncated {
            offset: cursor.position(),
            need: block_length as usize,
            available: cursor.remaining(),
        });
    }

    let screen_length = cursor.read_u32()?;
    let sample_length = cursor.read_u32()?;
    let slow = cursor.read_u32()?;
    let timebase = cursor.read_u32()?;
    let offset = cursor.read_i32()?;
    let sensitivity = cursor.read_u32()?;
    let attenuation = cursor.read_u32()?;
    let unknown = [cursor.read_u32()?, cursor.read_u32()?, cursor.read_u32()?];
    let vertical_step = cursor.read_f32()?;

    if u64::from(CHANNEL_FIXED_LEN) + u64::from(sample_length) * 2 > u64::from(block_length) {
        return Err(FormatError::SamplesExceedBlock {
            offset: block_offset,
            samples: sample_length,
            declared: block_length,
        });
    }
    let mut samples = Vec::with_capacity(sample_length as usize);
    for _ in 0..sample_length {
        samples.push(cursor.read_i16()?);
    }

    // Some firmware revisions append fields after the samples; skip to the
    // declared end of the block.
    cursor.seek_to(block_end)?;

    log::debug!("Decoded block {} with {} samples", name, samples.len());

    Ok(RawChannel {
        name,
        block_length,
        screen_length,
        sample_length,
        slow,
        timebase,
        offset,
        sensitivity,
        attenuation,
        unknown,
        vertical_step,
        samples,
    })
}
