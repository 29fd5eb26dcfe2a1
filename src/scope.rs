use crate::calibrate::Channel;
use crate::decode::{decode_capture, Bitmap, CaptureData};
use crate::frame::FormatError;
use crate::usb_transport::{OwonContext, UsbTransport, UsbTransportError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OwonError {
    #[error("USB transport error: {0}")]
    Transport(#[from] UsbTransportError),

    #[error("Capture stream error: {0}")]
    Format(#[from] FormatError),
}

/// One decoded capture.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Scope name tag from the stream header, e.g. `OWON01`.
    pub name: String,
    /// Capture length declared by the firmware, kept for accounting.
    pub file_length: u32,
    pub data: CaptureData,
}

impl Capture {
    /// Waveform traces of this capture. Empty for bitmap captures.
    pub fn channels(&self) -> &[Channel] {
        match &self.data {
            CaptureData::Vector(channels) => channels,
            CaptureData::Bitmap(_) => &[],
        }
    }

    /// Look up a trace by its channel tag.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels().iter().find(|channel| channel.name == name)
    }

    /// Screen pixels of this capture. `None` for vector captures.
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match &self.data {
            CaptureData::Bitmap(bitmap) => Some(bitmap),
            CaptureData::Vector(_) => None,
        }
    }
}

/// An open session against one scope.
///
/// Reads whatever capture is currently latched on the device and keeps the
/// decoded result until the next read, [`free`](Self::free) or
/// [`close`](Self::close). The protocol is a strict request/response
/// handshake, so reads take `&mut self` and a session serves one logical
/// task at a time.
pub struct OwonScope {
    transport: UsbTransport,
    capture: Option<Capture>,
}

impl OwonScope {
    /// Stream timeout used by [`read`](Self::read).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open the index-th attached scope.
    ///
    /// The index counts matching devices in enumeration order, as returned
    /// by [`OwonContext::list_devices`].
    pub fn open(context: &OwonContext, index: usize) -> Result<Self, OwonError> {
        let transport = UsbTransport::connect(context, index)?;
        Ok(Self {
            transport,
            capture: None,
        })
    }

    /// Capture with the default timeout. See [`read_timeout`](Self::read_timeout).
    pub fn read(&mut self) -> Result<&Capture, OwonError> {
        self.read_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Request the latched capture, stream it in and decode it.
    ///
    /// On success the previous capture is fully replaced. On any error the
    /// previous capture stays as it was; nothing half decoded becomes
    /// visible. After a [`UsbTransportError::Timeout`] the device may still
    /// be mid-transfer and its read cursor is undefined; recover by
    /// dropping the session and opening a fresh one.
    pub fn read_timeout(&mut self, timeout: Duration) -> Result<&Capture, OwonError> {
        self.transport.request_capture()?;
        let stream = match self.transport.read_stream(timeout) {
            Ok(stream) => stream,
            // A device that never starts the transfer has ignored the
            // capture command
            Err(UsbTransportError::Timeout { received: 0, .. }) => {
                return Err(FormatError::EmptyStream.into())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(commit_capture(&mut self.capture, &stream)?)
    }

    /// Drop the decoded capture buffers. The session stays open.
    pub fn free(&mut self) {
        self.capture = None;
    }

    /// Release the device. Consumes the session, so no read can follow.
    pub fn close(mut self) {
        self.transport.disconnect();
    }

    /// The most recent capture, if any.
    pub fn capture(&self) -> Option<&Capture> {
        self.capture.as_ref()
    }

    /// Scope name tag from the most recent capture.
    pub fn scope_name(&self) -> Option<&str> {
        self.capture.as_ref().map(|capture| capture.name.as_str())
    }

    /// USB manufacturer string, if the device provided one.
    pub fn manufacturer(&self) -> Option<&str> {
        self.transport.manufacturer()
    }

    /// USB product string, if the device provided one.
    pub fn product(&self) -> Option<&str> {
        self.transport.product()
    }
}

/// Decode a received stream and commit it as the session's new capture.
///
/// The whole decode runs before the slot is touched: on any error the
/// previous capture stays as it was.
fn commit_capture<'a>(
    slot: &'a mut Option<Capture>,
    stream: &[u8],
) -> Result<&'a Capture, FormatError> {
    let (header, data) = decode_capture(stream)?;
    log::debug!(
        "Capture from {} decoded ({} bytes)",
        header.name,
        stream.len()
    );
    Ok(slot.insert(Capture {
        name: header.name,
        file_length: header.file_length,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawChannel;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn vector_capture() -> Capture {
        let raw = RawChannel {
            name: "CH1".to_string(),
            block_length: 52,
            screen_length: 600,
            sample_length: 4,
            slow: 0,
            timebase: 16,
            offset: 0,
            sensitivity: 4,
            attenuation: 0,
            unknown: [0; 3],
            vertical_step: 0.0,
            samples: vec![0, 100, -100, i16::MAX],
        };
        Capture {
            name: "OWON01".to_string(),
            file_length: 118,
            data: CaptureData::Vector(vec![Channel::calibrate(raw).unwrap()]),
        }
    }

    fn capture_stream(channel: &[u8; 3], samples: &[i16], file_length: u32) -> Vec<u8> {
        let mut buf = Vec::from(*b"OWON01");
        buf.write_u32::<LittleEndian>(file_length).unwrap();
        buf.write_all(channel).unwrap();
        buf.write_u32::<LittleEndian>(44 + 2 * samples.len() as u32)
            .unwrap();
        buf.write_u32::<LittleEndian>(600).unwrap(); // screen_length
        buf.write_u32::<LittleEndian>(samples.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // slow
        buf.write_u32::<LittleEndian>(16).unwrap(); // 1 ms/div
        buf.write_i32::<LittleEndian>(0).unwrap(); // offset
        buf.write_u32::<LittleEndian>(4).unwrap(); // 0.1 V/div
        buf.write_u32::<LittleEndian>(0).unwrap(); // x1 attenuation
        for _ in 0..3 {
            buf.write_u32::<LittleEndian>(0).unwrap();
        }
        buf.write_f32::<LittleEndian>(0.0).unwrap();
        for &sample in samples {
            buf.write_i16::<LittleEndian>(sample).unwrap();
        }
        buf
    }

    #[test]
    fn test_vector_capture_accessors() {
        let capture = vector_capture();
        assert_eq!(capture.channels().len(), 1);
        assert!(capture.bitmap().is_none());
        assert!(capture.channel("CH1").is_some());
        assert!(capture.channel("CH4").is_none());
    }

    #[test]
    fn test_bitmap_capture_has_no_channels() {
        let capture = Capture {
            name: "OWON01".to_string(),
            file_length: 921_600,
            data: CaptureData::Bitmap(Bitmap {
                width: 640,
                height: 480,
                channels: 3,
                data: vec![0; 921_600],
            }),
        };
        assert!(capture.channels().is_empty());
        assert!(capture.channel("CH1").is_none());
        assert_eq!(capture.bitmap().unwrap().data.len(), 921_600);
    }

    #[test]
    fn test_open_past_end_of_device_list() {
        // This test depends on what hardware is actually connected
        let ctx = match OwonContext::new() {
            Ok(ctx) => ctx,
            // No usable libusb environment on this machine
            Err(_) => return,
        };
        let devices = match ctx.list_devices() {
            Ok(devices) => devices,
            Err(_) => return,
        };

        match OwonScope::open(&ctx, devices.len()) {
            Err(OwonError::Transport(UsbTransportError::DeviceNotFound { index, .. })) => {
                assert_eq!(index, devices.len());
            }
            Err(OwonError::Transport(_)) => {
                // Enumeration may be restricted on this machine
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
            Ok(_) => panic!("Opened a device past the end of the list"),
        }
    }

    #[test]
    fn test_consecutive_commits_replace_capture() {
        let mut slot = None;
        commit_capture(&mut slot, &capture_stream(b"CH1", &[1, 2, 3, 4], 118)).unwrap();
        {
            let capture = slot.as_ref().unwrap();
            assert_eq!(capture.file_length, 118);
            assert_eq!(capture.channels()[0].name, "CH1");
            assert_eq!(capture.channels()[0].volts.len(), 4);
        }

        let capture = commit_capture(&mut slot, &capture_stream(b"CH2", &[5, 6], 55)).unwrap();
        assert_eq!(capture.file_length, 55);
        assert_eq!(capture.channels().len(), 1);
        assert_eq!(capture.channels()[0].name, "CH2");
        assert_eq!(capture.channels()[0].volts.len(), 2);
        assert!(capture.channel("CH1").is_none());
    }

    #[test]
    fn test_failed_commit_keeps_previous_capture() {
        let mut slot = None;
        commit_capture(&mut slot, &capture_stream(b"CH1", &[10, 20, 30], 60)).unwrap();

        let mut bad = capture_stream(b"CH2", &[1], 118);
        // Cut the last sample byte so the declared block length overruns
        // the received bytes
        bad.truncate(bad.len() - 1);
        assert!(matches!(
            commit_capture(&mut slot, &bad),
            Err(FormatError::Truncated { .. })
        ));

        let capture = slot.as_ref().unwrap();
        assert_eq!(capture.channels()[0].name, "CH1");
        assert_eq!(capture.channels()[0].volts.len(), 3);
    }

    #[test]
    fn test_empty_stream_keeps_previous_capture() {
        let mut slot = None;
        commit_capture(&mut slot, &capture_stream(b"CH1", &[7], 49)).unwrap();

        assert!(matches!(
            commit_capture(&mut slot, &[]),
            Err(FormatError::EmptyStream)
        ));
        assert_eq!(slot.as_ref().unwrap().channels()[0].volts.len(), 1);
    }

    #[test]
    fn test_read_free_cycle() {
        // This test depends on what hardware is actually connected
        let ctx = match OwonContext::new() {
            Ok(ctx) => ctx,
            // No usable libusb environment on this machine
            Err(_) => return,
        };
        let mut scope = match OwonScope::open(&ctx, 0) {
            Ok(scope) => scope,
            Err(_) => return,
        };

        if scope.read().is_ok() {
            assert!(scope.capture().is_some());
            assert!(scope.scope_name().is_some());
        }
        scope.free();
        assert!(scope.capture().is_none());
        scope.close();
    }
}
