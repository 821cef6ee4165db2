//! Rolling sensor averages over fixed-size sample windows.
//!
//! Each physical sensor feed owns a [`SensorChannel`]: a ring buffer holding
//! the most recent readings plus the rounded mean over that window. A channel
//! primes its whole window from the first valid reading, so a cold start
//! never skews the average toward zero-initialized slots.

/// The physical sensor feeds of the fan coil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature,
    Humidity,
    InletPipe,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::InletPipe => "inlet",
        }
    }
}

pub const TEMPERATURE_WINDOW: usize = 10;
pub const TEMPERATURE_PRECISION: u32 = 1;
pub const TEMPERATURE_POLL_INTERVAL_MS: u64 = 10_000;

pub const HUMIDITY_WINDOW: usize = 10;
pub const HUMIDITY_PRECISION: u32 = 0;
pub const HUMIDITY_POLL_INTERVAL_MS: u64 = 10_000;

pub const INLET_WINDOW: usize = 10;
pub const INLET_PRECISION: u32 = 1;
pub const INLET_POLL_INTERVAL_MS: u64 = 30_000;

/// Rounds half away from zero to `precision` decimal digits.
pub fn round_to_precision(value: f64, precision: u32) -> f32 {
    let factor = 10_f64.powi(precision as i32);
    ((value * factor).round() / factor) as f32
}

#[derive(Debug, Clone)]
pub struct SensorChannel {
    /// Whether the sensor is physically present. Absent channels ignore
    /// samples, which tells the caller it need not poll the hardware.
    pub exists: bool,
    kind: SensorKind,
    current: f32,
    average: f32,
    samples: Vec<f32>,
    cursor: usize,
    capacity: usize,
    precision: u32,
    poll_interval_ms: u64,
}

impl SensorChannel {
    /// Capacity and precision are fixed for the channel's lifetime.
    pub fn new(kind: SensorKind, capacity: usize, precision: u32, poll_interval_ms: u64) -> Self {
        Self {
            exists: true,
            kind,
            current: 0.0,
            average: 0.0,
            samples: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
            precision,
            poll_interval_ms,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Most recent raw reading.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Rounded mean over the current window contents.
    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Minimum time between sample acquisitions, enforced by the caller.
    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    /// True once the window holds `capacity` real readings.
    pub fn is_primed(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Fills every slot of the window with `first_value`, so the average
    /// starts from a known reading instead of empty slots. Used at startup
    /// or after a long sampling gap. Returns false without touching the
    /// window when the channel is absent.
    pub fn reset(&mut self, first_value: f32) -> bool {
        if !self.exists {
            return false;
        }

        self.samples.clear();
        self.samples.resize(self.capacity, first_value);
        self.cursor = 0;
        self.current = first_value;
        self.average = first_value;
        true
    }

    /// Stores `new_value` over the oldest slot and returns the new rounded
    /// mean of the window. An unprimed channel primes itself from
    /// `new_value` first.
    pub fn record_and_average(&mut self, new_value: f32) -> f32 {
        if !self.exists {
            return self.average;
        }

        if !self.is_primed() {
            self.reset(new_value);
            return self.average;
        }

        self.samples[self.cursor] = new_value;
        self.cursor = (self.cursor + 1) % self.capacity;
        self.current = new_value;

        let sum: f64 = self.samples.iter().map(|sample| f64::from(*sample)).sum();
        self.average = round_to_precision(sum / self.capacity as f64, self.precision);
        self.average
    }
}

/// The three channels of the fan coil, constructed once with their fixed
/// window parameters and owned by the caller.
#[derive(Debug, Clone)]
pub struct SensorSet {
    pub temperature: SensorChannel,
    pub humidity: SensorChannel,
    pub inlet: SensorChannel,
}

impl SensorSet {
    pub fn new() -> Self {
        Self {
            temperature: SensorChannel::new(
                SensorKind::Temperature,
                TEMPERATURE_WINDOW,
                TEMPERATURE_PRECISION,
                TEMPERATURE_POLL_INTERVAL_MS,
            ),
            humidity: SensorChannel::new(
                SensorKind::Humidity,
                HUMIDITY_WINDOW,
                HUMIDITY_PRECISION,
                HUMIDITY_POLL_INTERVAL_MS,
            ),
            inlet: SensorChannel::new(
                SensorKind::InletPipe,
                INLET_WINDOW,
                INLET_PRECISION,
                INLET_POLL_INTERVAL_MS,
            ),
        }
    }
}

impl Default for SensorSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(capacity: usize, precision: u32) -> SensorChannel {
        SensorChannel::new(SensorKind::Temperature, capacity, precision, 1_000)
    }

    #[test]
    fn average_covers_only_the_latest_window() {
        let mut channel = channel(5, 1);
        channel.reset(10.0);

        for value in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0] {
            channel.record_and_average(value);
        }

        // Mean of the last five readings: [3, 4, 5, 6, 7].
        assert_eq!(channel.average(), 5.0);
        assert_eq!(channel.current(), 7.0);
    }

    #[test]
    fn reset_then_single_reading_matches_formula() {
        let mut channel = channel(5, 1);
        assert!(channel.reset(20.0));
        assert_eq!(channel.average(), 20.0);

        // ((capacity - 1) * 20.0 + 21.0) / capacity
        assert_eq!(channel.record_and_average(21.0), 20.2);
    }

    #[test]
    fn first_reading_primes_every_slot() {
        let mut channel = channel(4, 1);
        assert!(!channel.is_primed());

        assert_eq!(channel.record_and_average(19.5), 19.5);
        assert!(channel.is_primed());

        // The second reading averages against the primed window, not zeros.
        assert_eq!(channel.record_and_average(19.9), 19.6);
    }

    #[test]
    fn rounding_is_idempotent() {
        let rounded = round_to_precision(20.1532, 1);
        assert_eq!(round_to_precision(f64::from(rounded), 1), rounded);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_to_precision(20.25, 1), 20.3);
        assert_eq!(round_to_precision(-20.25, 1), -20.3);
        assert_eq!(round_to_precision(42.5, 0), 43.0);
    }

    #[test]
    fn window_of_real_readings_averages_to_one_digit() {
        let mut channel = channel(5, 1);
        channel.reset(20.12);

        let mut average = 0.0;
        for value in [20.12, 20.08, 20.31, 19.95, 20.20] {
            average = channel.record_and_average(value);
        }

        // Mean is 20.132, rounded to one digit.
        assert_eq!(average, 20.1);
    }

    #[test]
    fn absent_channel_ignores_samples() {
        let mut channel = channel(3, 1);
        channel.exists = false;

        assert!(!channel.reset(22.0));
        assert_eq!(channel.record_and_average(22.0), 0.0);
        assert!(!channel.is_primed());
    }

    #[test]
    fn sensor_set_wires_channel_constants() {
        let set = SensorSet::new();

        assert_eq!(set.temperature.kind(), SensorKind::Temperature);
        assert_eq!(set.temperature.precision(), TEMPERATURE_PRECISION);
        assert_eq!(set.humidity.kind(), SensorKind::Humidity);
        assert_eq!(set.humidity.poll_interval_ms(), HUMIDITY_POLL_INTERVAL_MS);
        assert_eq!(set.inlet.kind(), SensorKind::InletPipe);
        assert!(set.temperature.exists && set.humidity.exists && set.inlet.exists);
    }
}
