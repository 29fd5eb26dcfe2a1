use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::{Duration, Instant};

/// USB vendor id shared by the Owon PDS family.
pub const VENDOR_ID: u16 = 0x5345;
/// USB product id shared by the Owon PDS family.
pub const PRODUCT_ID: u16 = 0x1234;

const ENDPOINT_IN: u8 = 0x81;
const ENDPOINT_OUT: u8 = 0x03;
const INTERFACE: u8 = 0;
/// Bulk transfer chunk. The device ends the stream with a transfer shorter
/// than this (possibly zero length).
const TRANSFER_CHUNK: usize = 0x1000;
/// Capture request recognized by the firmware, NUL terminator included.
const CAPTURE_COMMAND: &[u8] = b"START\0";

const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);
const STRING_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum UsbTransportError {
    #[error("No Owon PDS device at index {index} ({available} attached)")]
    DeviceNotFound { index: usize, available: usize },

    #[error("Owon PDS device is in use by another process or driver")]
    DeviceBusy,

    #[error("Access to the Owon PDS device was denied. Check udev permissions")]
    AccessDenied,

    #[error("Device stopped sending after {received} bytes ({waited:?} elapsed)")]
    Timeout { waited: Duration, received: usize },

    #[error("Capture command rejected: wrote {written} of {expected} bytes")]
    ShortCommand { written: usize, expected: usize },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Process-wide USB context shared by all sessions.
///
/// Create one per process and pass it by reference into
/// [`OwonScope::open`](crate::OwonScope::open). Clones share the same
/// underlying context; open device handles keep it alive, so it is released
/// after the last session closes.
#[derive(Clone)]
pub struct OwonContext {
    inner: Context,
}

impl OwonContext {
    pub fn new() -> Result<Self, UsbTransportError> {
        Ok(Self {
            inner: Context::new()?,
        })
    }

    /// List the attached Owon PDS devices in enumeration order.
    ///
    /// The position in the returned list is the index expected by
    /// [`OwonScope::open`](crate::OwonScope::open).
    pub fn list_devices(&self) -> Result<Vec<OwonDevice>, UsbTransportError> {
        let devices = matching_devices(&self.inner)?;
        Ok(devices
            .iter()
            .enumerate()
            .map(|(index, device)| OwonDevice {
                index,
                bus_number: device.bus_number(),
                address: device.address(),
            })
            .collect())
    }
}

/// One attached Owon PDS device found during enumeration.
#[derive(Debug, Clone)]
pub struct OwonDevice {
    /// Index to pass to [`OwonScope::open`](crate::OwonScope::open).
    pub index: usize,
    pub bus_number: u8,
    pub address: u8,
}

fn matching_devices(context: &Context) -> Result<Vec<Device<Context>>, rusb::Error> {
    let mut matching = Vec::new();
    for device in context.devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(_) => continue,
        };
        if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
            matching.push(device);
        }
    }
    log::debug!("Found {} Owon PDS device(s)", matching.len());
    Ok(matching)
}

/// Claimed bulk connection to one scope.
///
/// Owns the device handle exclusively for its lifetime. The protocol is a
/// strict request/response handshake, so one transport serves one logical
/// task at a time.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    manufacturer: Option<String>,
    product: Option<String>,
    claimed: bool,
}

impl UsbTransport {
    /// Open and claim the index-th attached scope.
    pub fn connect(context: &OwonContext, index: usize) -> Result<Self, UsbTransportError> {
        let devices = matching_devices(&context.inner)?;
        let available = devices.len();
        let device = devices
            .into_iter()
            .nth(index)
            .ok_or(UsbTransportError::DeviceNotFound { index, available })?;
        log::debug!(
            "Opening Owon PDS device on bus {:03} address {:03}",
            device.bus_number(),
            device.address()
        );

        let handle = match device.open() {
            Ok(handle) => handle,
            Err(rusb::Error::Access) => return Err(UsbTransportError::AccessDenied),
            Err(rusb::Error::Busy) => return Err(UsbTransportError::DeviceBusy),
            Err(e) => return Err(e.into()),
        };

        // The usbtest kernel module likes to bind this device; have libusb
        // detach whatever holds the interface.
        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => return Err(e.into()),
        }

        match handle.claim_interface(INTERFACE) {
            Ok(()) => {}
            Err(rusb::Error::Busy) => return Err(UsbTransportError::DeviceBusy),
            Err(rusb::Error::Access) => return Err(UsbTransportError::AccessDenied),
            Err(e) => return Err(e.into()),
        }

        let (manufacturer, product) = read_identity(&handle);
        log::debug!(
            "Claimed interface {} of {} {}",
            INTERFACE,
            manufacturer.as_deref().unwrap_or("?"),
            product.as_deref().unwrap_or("?")
        );

        Ok(Self {
            handle,
            manufacturer,
            product,
            claimed: true,
        })
    }

    /// Manufacturer string descriptor, if the device provided one.
    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    /// Product string descriptor, if the device provided one.
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    /// Ask the firmware to send the currently latched capture.
    pub fn request_capture(&self) -> Result<(), UsbTransportError> {
        log::debug!("Requesting capture");
        let written = self
            .handle
            .write_bulk(ENDPOINT_OUT, CAPTURE_COMMAND, COMMAND_TIMEOUT)?;
        if written != CAPTURE_COMMAND.len() {
            return Err(UsbTransportError::ShortCommand {
                written,
                expected: CAPTURE_COMMAND.len(),
            });
        }
        Ok(())
    }

    /// Accumulate the capture stream until the device signals the end with
    /// a short transfer, or `timeout` elapses for the stream as a whole.
    ///
    /// No retries: a timeout means the device state is undefined and the
    /// caller decides how to recover.
    pub fn read_stream(&self, timeout: Duration) -> Result<Vec<u8>, UsbTransportError> {
        let start = Instant::now();
        let mut stream = Vec::new();
        let mut chunk = vec![0u8; TRANSFER_CHUNK];

        loop {
            let remaining = match next_read_timeout(start, timeout) {
                Some(remaining) => remaining,
                None => {
                    return Err(UsbTransportError::Timeout {
                        waited: start.elapsed(),
                        received: stream.len(),
                    })
                }
            };
            match self.handle.read_bulk(ENDPOINT_IN, &mut chunk, remaining) {
                Ok(n) => {
                    stream.extend_from_slice(&chunk[..n]);
                    if n < TRANSFER_CHUNK {
                        log::debug!(
                            "End of stream after {} bytes (final transfer of {})",
                            stream.len(),
                            n
                        );
                        break;
                    }
                }
                Err(rusb::Error::Timeout) => {
                    return Err(UsbTransportError::Timeout {
                        waited: start.elapsed(),
                        received: stream.len(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(stream)
    }

    /// Release the claimed interface. Idempotent; also runs on drop.
    pub fn disconnect(&mut self) {
        if self.claimed {
            if let Err(e) = self.handle.release_interface(INTERFACE) {
                log::debug!("Releasing interface failed: {}", e);
            }
            self.claimed = false;
        }
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_identity(handle: &DeviceHandle<Context>) -> (Option<String>, Option<String>) {
    let descriptor = match handle.device().device_descriptor() {
        Ok(descriptor) => descriptor,
        Err(_) => return (None, None),
    };
    let language = match handle.read_languages(STRING_TIMEOUT) {
        Ok(languages) => match languages.first() {
            Some(language) => *language,
            None => return (None, None),
        },
        Err(_) => return (None, None),
    };

    let manufacturer = handle
        .read_manufacturer_string(language, &descriptor, STRING_TIMEOUT)
        .ok();
    let product = handle
        .read_product_string(language, &descriptor, STRING_TIMEOUT)
        .ok();
    (manufacturer, product)
}

/// Timeout for the next bulk transfer, `None` once the whole-stream timeout
/// has elapsed.
///
/// libusb rounds timeouts down to whole milliseconds and treats zero as
/// unlimited, so the returned slice is never under 1 ms.
fn next_read_timeout(start: Instant, timeout: Duration) -> Option<Duration> {
    let elapsed = start.elapsed();
    if elapsed >= timeout {
        return None;
    }
    Some((timeout - elapsed).max(Duration::from_millis(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_command_bytes() {
        // sizeof("START") in the firmware protocol includes the NUL
        assert_eq!(CAPTURE_COMMAND, b"START\0");
        assert_eq!(CAPTURE_COMMAND.len(), 6);
    }

    #[test]
    fn test_next_read_timeout_bounds() {
        let start = Instant::now();
        assert!(next_read_timeout(start, Duration::ZERO).is_none());

        // An extreme timeout must not panic and still yields a usable slice
        let slice = next_read_timeout(start, Duration::MAX).unwrap();
        assert!(slice >= Duration::from_millis(1));
    }

    #[test]
    fn test_next_read_timeout_never_under_one_millisecond() {
        match next_read_timeout(Instant::now(), Duration::from_micros(500)) {
            Some(slice) => assert_eq!(slice, Duration::from_millis(1)),
            // The 500 microseconds may already have elapsed on a loaded
            // machine
            None => {}
        }
    }

    #[test]
    fn test_list_devices() {
        // This test depends on what hardware is actually connected
        let ctx = match OwonContext::new() {
            Ok(ctx) => ctx,
            // No usable libusb environment on this machine
            Err(_) => return,
        };

        match ctx.list_devices() {
            Ok(devices) => {
                for (position, device) in devices.iter().enumerate() {
                    assert_eq!(device.index, position);
                }
            }
            Err(UsbTransportError::Usb(_)) => {
                // Expected where device enumeration is restricted
            }
            Err(e) => {
                panic!("Unexpected error: {:?}", e);
            }
        }
    }
}
