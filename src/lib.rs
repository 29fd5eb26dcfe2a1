//! # owonpds
//!
//! A userspace driver for Owon PDS digital storage oscilloscopes connected
//! over USB.
//!
//! The transfer protocol is reverse engineered: a capture request is a
//! single bulk command, and the reply is one little-endian stream holding
//! either per-channel waveform blocks or a raw screen bitmap. This crate
//! streams that reply in and turns it into calibrated traces (volts,
//! seconds) or pixel data.
//!
//! ## Features
//!
//! - **Device discovery**: enumerate attached PDS scopes via `rusb`
//! - **Waveform capture**: per-channel samples calibrated to volts, with
//!   timebase, offset, sensitivity and probe attenuation resolved
//! - **Screen capture**: the rendered 640x480 display as raw pixel bytes
//! - **Typed errors**: transport and stream failures as dedicated enums
//! - **DataFrame output**: optional `polars` conversion behind the
//!   `dataframe` feature
//!
//! ## Examples
//!
//! ### Capture a waveform
//!
//! ```rust,no_run
//! use owonpds::{OwonContext, OwonScope};
//!
//! let ctx = OwonContext::new()?;
//! let mut scope = OwonScope::open(&ctx, 0)?;
//!
//! let capture = scope.read()?;
//! for channel in capture.channels() {
//!     println!(
//!         "{}: {} samples at {} Sa/s",
//!         channel.name,
//!         channel.volts.len(),
//!         channel.sample_rate
//!     );
//! }
//!
//! scope.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Grab the screen
//!
//! ```rust,no_run
//! use owonpds::{OwonContext, OwonScope};
//!
//! let ctx = OwonContext::new()?;
//! let mut scope = OwonScope::open(&ctx, 0)?;
//!
//! let capture = scope.read()?;
//! if let Some(bitmap) = capture.bitmap() {
//!     println!("{}x{} pixels", bitmap.width, bitmap.height);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Device discovery
//!
//! ```rust,no_run
//! use owonpds::OwonContext;
//!
//! let ctx = OwonContext::new()?;
//! for device in ctx.list_devices()? {
//!     println!(
//!         "[{}] bus {:03} address {:03}",
//!         device.index, device.bus_number, device.address
//!     );
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calibrate;
pub mod decode;
pub mod frame;
pub mod scope;
pub mod usb_transport;

// Re-export the main types for convenience
pub use calibrate::Channel;

pub use decode::{Bitmap, CaptureData, RawChannel};

pub use frame::{FormatError, StreamHeader};

pub use scope::{Capture, OwonError, OwonScope};

pub use usb_transport::{OwonContext, OwonDevice, UsbTransport, UsbTransportError};

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
