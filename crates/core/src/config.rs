//! Boot-time thresholds and pin bindings for each capability. These are
//! deserialised straight out of the node's TOML file and are never mutated
//! at runtime.

use serde::Deserialize;
use std::time::Duration;

/// Analog readings above this are outside the converter's range.
pub const ADC_MAX: i32 = 4095;

/// Soil readings below this are classified as wet.
pub const WET_SOIL_BELOW: i32 = 1500;

#[derive(Debug, Clone, Deserialize)]
pub struct SensingConfig {
    pub soil_pin: u8,
    pub water_pin: u8,
    pub pump_pin: u8,
    /// Many relay boards switch on a LOW input.
    #[serde(default)]
    pub pump_active_low: bool,

    #[serde(default = "default_servo_up_angle")]
    pub servo_up_angle: u8,
    #[serde(default = "default_servo_down_angle")]
    pub servo_down_angle: u8,
    /// Boards whose servo must not move at boot need `/init_servo` first.
    #[serde(default = "default_true")]
    pub probe_requires_init: bool,
    #[serde(default = "default_probe_lower_settle_ms")]
    pub probe_lower_settle_ms: u64,
    #[serde(default = "default_probe_raise_settle_ms")]
    pub probe_raise_settle_ms: u64,

    #[serde(default = "default_dry_soil_threshold")]
    pub dry_soil_threshold: i32,
    #[serde(default = "default_min_water_level")]
    pub min_water_level: i32,
    #[serde(default = "default_pump_duration_ms")]
    pub pump_duration_ms: u64,
    #[serde(default = "default_sensor_check_interval_ms")]
    pub sensor_check_interval_ms: u64,
    /// Run cycles off the local interval timer. Disable when a mobility
    /// peer is the only cycle initiator.
    #[serde(default = "default_true")]
    pub self_timed: bool,
}

impl SensingConfig {
    pub fn pump_duration(&self) -> Duration {
        Duration::from_millis(self.pump_duration_ms)
    }

    pub fn sensor_check_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_check_interval_ms)
    }

    pub fn probe_lower_settle(&self) -> Duration {
        Duration::from_millis(self.probe_lower_settle_ms)
    }

    pub fn probe_raise_settle(&self) -> Duration {
        Duration::from_millis(self.probe_raise_settle_ms)
    }
}

/// L298N-style H-bridge wiring: two direction pins per side plus an enable.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MotorPins {
    pub in1: u8,
    pub in2: u8,
    pub in3: u8,
    pub in4: u8,
    pub ena: u8,
    pub enb: u8,
}

impl MotorPins {
    pub fn all(&self) -> [u8; 6] {
        [self.in1, self.in2, self.in3, self.in4, self.ena, self.enb]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MobilityConfig {
    pub motor: MotorPins,
    #[serde(default = "default_move_burst_ms")]
    pub move_burst_ms: u64,
    #[serde(default = "default_inter_cycle_delay_ms")]
    pub inter_cycle_delay_ms: u64,
}

impl MobilityConfig {
    pub fn move_burst(&self) -> Duration {
        Duration::from_millis(self.move_burst_ms)
    }

    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_cycle_delay_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_servo_up_angle() -> u8 {
    60
}
fn default_servo_down_angle() -> u8 {
    90
}
fn default_probe_lower_settle_ms() -> u64 {
    1000
}
fn default_probe_raise_settle_ms() -> u64 {
    500
}
fn default_dry_soil_threshold() -> i32 {
    2800
}
fn default_min_water_level() -> i32 {
    100
}
fn default_pump_duration_ms() -> u64 {
    5000
}
fn default_sensor_check_interval_ms() -> u64 {
    30_000
}
fn default_move_burst_ms() -> u64 {
    3000
}
fn default_inter_cycle_delay_ms() -> u64 {
    5000
}
