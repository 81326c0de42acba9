//! One immutable snapshot of every sensor per sensing cycle. Invalid
//! readings are replaced by sentinels here so nothing downstream ever sees
//! a `NaN` or an out-of-range converter value.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::board::Board;
use crate::config::{SensingConfig, ADC_MAX, WET_SOIL_BELOW};

/// Stored in place of an unavailable temperature or humidity.
pub const INVALID_FLOAT: f32 = -999.0;
/// Stored in place of an out-of-range analog reading.
pub const INVALID_ANALOG: i32 = -1;

/// Climate sensor operating range (DHT22 class).
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = -40.0..=80.0;
const HUMIDITY_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub soil_moisture: i32,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub water_level: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
}

impl SensorSnapshot {
    pub fn soil_status(&self, dry_threshold: i32) -> SoilStatus {
        SoilStatus::classify(self.soil_moisture, dry_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilStatus {
    Wet,
    Moist,
    Dry,
    Unknown,
}

impl SoilStatus {
    pub fn classify(raw: i32, dry_threshold: i32) -> Self {
        if raw == INVALID_ANALOG {
            Self::Unknown
        } else if raw < WET_SOIL_BELOW {
            Self::Wet
        } else if raw < dry_threshold {
            Self::Moist
        } else {
            Self::Dry
        }
    }
}

pub fn normalize_analog(raw: i32) -> i32 {
    if (0..=ADC_MAX).contains(&raw) {
        raw
    } else {
        INVALID_ANALOG
    }
}

fn normalize_float(value: f32, range: std::ops::RangeInclusive<f32>) -> f32 {
    if value.is_finite() && range.contains(&value) {
        value
    } else {
        INVALID_FLOAT
    }
}

/// Reads the soil probe, the water level sensor and the climate sensor.
/// Never touches the probe servo or the pump.
#[derive(Debug, Clone, Copy)]
pub struct SensorReader {
    soil_pin: u8,
    water_pin: u8,
}

impl SensorReader {
    pub fn new(cfg: &SensingConfig) -> Self {
        Self {
            soil_pin: cfg.soil_pin,
            water_pin: cfg.water_pin,
        }
    }

    pub fn read_snapshot(&self, board: &mut dyn Board) -> SensorSnapshot {
        let soil_moisture = normalize_analog(board.read_analog(self.soil_pin));
        let water_level = self.read_water_level(board);
        let climate = board.read_climate();

        let snapshot = SensorSnapshot {
            soil_moisture,
            temperature_c: normalize_float(climate.temperature_c, TEMPERATURE_RANGE),
            humidity_pct: normalize_float(climate.humidity_pct, HUMIDITY_RANGE),
            water_level,
            taken_at: OffsetDateTime::now_utc(),
        };
        tracing::debug!(
            soil = snapshot.soil_moisture,
            water = snapshot.water_level,
            temperature = snapshot.temperature_c,
            humidity = snapshot.humidity_pct,
            "sensor snapshot"
        );
        snapshot
    }

    /// Water level alone; the pump guard needs it for manual starts.
    pub fn read_water_level(&self, board: &mut dyn Board) -> i32 {
        normalize_analog(board.read_analog(self.water_pin))
    }
}
