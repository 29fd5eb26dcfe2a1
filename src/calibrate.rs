use crate::decode::RawChannel;
use crate::frame::FormatError;

/// Seconds per division for each firmware timebase code, 5 ns/div up to
/// 100 s/div in the PDS 1-2.5-5 progression.
const TIMEBASES: [f64; 32] = [
    5e-9, 1e-8, 2.5e-8, 5e-8, 1e-7, 2.5e-7, 5e-7, 1e-6, 2.5e-6, 5e-6, 1e-5,
    2.5e-5, 5e-5, 1e-4, 2.5e-4, 5e-4, 1e-3, 2.5e-3, 5e-3, 1e-2, 2.5e-2, 5e-2,
    1e-1, 2.5e-1, 5e-1, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0,
];

/// Volts per division for each firmware sensitivity code, 5 mV/div up to
/// 5 V/div in the 1-2-5 progression.
const SENSITIVITIES: [f64; 10] = [
    5e-3, 1e-2, 2e-2, 5e-2, 1e-1, 2e-1, 5e-1, 1.0, 2.0, 5.0,
];

/// Highest probe attenuation code the firmware reports (x1000).
const MAX_ATTENUATION_CODE: u32 = 3;

const ADC_STEPS_PER_DIV: f64 = 25.0;
const HORIZONTAL_DIVS: f64 = 10.0;
/// Timebase at which the scope switches to scan ("slow") mode.
const SLOW_MODE_THRESHOLD: f64 = 0.1;

#[cfg(feature = "dataframe")]
const TIME_COLUMN_NAME: &str = "time";
#[cfg(feature = "dataframe")]
const VOLTS_COLUMN_NAME: &str = "volts";

/// Resolve a timebase code to seconds per division.
pub fn timebase_seconds(code: u32) -> Result<f64, FormatError> {
    TIMEBASES
        .get(code as usize)
        .copied()
        .ok_or(FormatError::UnknownTimebase { code })
}

/// Resolve a sensitivity code to volts per division.
pub fn sensitivity_volts(code: u32) -> Result<f64, FormatError> {
    SENSITIVITIES
        .get(code as usize)
        .copied()
        .ok_or(FormatError::UnknownSensitivity { code })
}

/// Resolve an attenuation code to the probe attenuation factor.
pub fn attenuation_factor(code: u32) -> Result<u32, FormatError> {
    if code > MAX_ATTENUATION_CODE {
        return Err(FormatError::UnknownAttenuation { code });
    }
    Ok(10u32.pow(code))
}

/// One calibrated waveform trace.
///
/// All derived values are computed once from the raw block; the untouched
/// wire fields stay available in [`raw`](Self::raw) for diagnostics.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel tag as sent by the scope, e.g. `CH1`.
    pub name: String,
    /// Timebase in seconds per division.
    pub timebase: f64,
    /// Most recent captured time in seconds when the scope runs in scan
    /// mode (timebase of 100 ms/div or slower), otherwise 0.
    pub slow: f64,
    /// Sample rate in samples per second.
    pub sample_rate: f64,
    /// Vertical offset in volts.
    pub offset: f64,
    /// Sensitivity in volts per division, probe attenuation applied.
    pub sensitivity: f64,
    /// Probe attenuation factor (1, 10, 100 or 1000).
    pub attenuation: u32,
    /// Calibrated samples in volts.
    pub volts: Vec<f64>,
    /// The channel block as decoded from the wire.
    pub raw: RawChannel,
}

impl Channel {
    /// Calibrate a decoded channel block into physical units.
    ///
    /// Fails when the block carries a timebase, sensitivity or attenuation
    /// code the firmware tables do not list. Codes outside the tables mean
    /// a corrupt stream or an untested firmware revision, and guessing a
    /// scale would silently produce wrong voltages.
    pub fn calibrate(raw: RawChannel) -> Result<Self, FormatError> {
        let timebase = timebase_seconds(raw.timebase)?;
        let attenuation = attenuation_factor(raw.attenuation)?;
        let sensitivity = sensitivity_volts(raw.sensitivity)? * f64::from(attenuation);
        let volts_per_step = sensitivity / ADC_STEPS_PER_DIV;

        let volts = raw
            .samples
            .iter()
            .map(|&sample| f64::from(sample) * volts_per_step)
            .collect();
        let offset = f64::from(raw.offset) * volts_per_step;
        let sample_rate = f64::from(raw.screen_length) / (timebase * HORIZONTAL_DIVS);
        let slow = if timebase >= SLOW_MODE_THRESHOLD {
            f64::from(raw.slow) / 1000.0
        } else {
            0.0
        };

        log::debug!(
            "Calibrated {}: {} samples at {} V/div, {} s/div",
            raw.name,
            raw.samples.len(),
            sensitivity,
            timebase
        );

        Ok(Self {
            name: raw.name.clone(),
            timebase,
            slow,
            sample_rate,
            offset,
            sensitivity,
            attenuation,
            volts,
            raw,
        })
    }

    /// Seconds between two consecutive samples, 0 for an empty screen.
    pub fn sample_interval(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.sample_rate.recip()
        } else {
            0.0
        }
    }

    /// Captured time span in seconds.
    pub fn duration(&self) -> f64 {
        self.volts.len() as f64 * self.sample_interval()
    }
}

#[cfg(feature = "dataframe")]
impl Channel {
    /// Build a polars frame with a derived time column and the calibrated
    /// samples.
    pub fn dataframe(&self) -> Result<polars::prelude::DataFrame, polars::prelude::PolarsError> {
        use polars::prelude::*;

        let interval = self.sample_interval();
        let time: Vec<f64> = (0..self.volts.len())
            .map(|index| index as f64 * interval)
            .collect();

        let time_column: Column = Series::new(TIME_COLUMN_NAME.into(), time).into();
        let volts_column: Column = Series::new(VOLTS_COLUMN_NAME.into(), self.volts.clone()).into();
        DataFrame::new(vec![time_column, volts_column])
    }
}
