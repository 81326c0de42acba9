//! Stateful simulated board for running a node without hardware.
//!
//! Models a capacitive soil probe on a 12-bit converter (higher = drier), a
//! float-style water level sensor on the reservoir, and a climate sensor:
//! - Random walk with mean reversion and a steady drying drift
//! - Per-reading converter noise and occasional spikes
//! - Closed-loop watering: soil gets wetter and the tank drains while the
//!   pump output is on
//!
//! [`SimBoard::fixed`] turns all of that off and returns exact values, which
//! is what the cycle tests use.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::board::{Board, ClimateReading};
use crate::config::{SensingConfig, ADC_MAX};

fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Pre-configured profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts just below the dry threshold and drifts drier. Triggers
    /// irrigation after a few cycles.
    Drying,
    /// Hovers mid-range with little noise. Never irrigates.
    Stable,
    /// Heavy noise, frequent spikes, climate sensor drops out.
    Flaky,
    /// Starts wet, dries very slowly.
    Wet,
    /// Dry soil and a nearly empty reservoir. Exercises the low-water path.
    Drought,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            "drought" => Self::Drought,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
            Self::Drought => write!(f, "drought"),
        }
    }
}

struct SoilModel {
    base: f64,
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    wet_rate: f64,
}

struct TankModel {
    level: f64,
    drain_per_sec: f64,
}

#[derive(Default)]
struct Wiring {
    soil_pin: Option<u8>,
    water_pin: Option<u8>,
    pump_pin: Option<u8>,
    pump_active_low: bool,
}

enum Mode {
    Simulated {
        soil: SoilModel,
        tank: TankModel,
        climate_dropout: f32,
    },
    Fixed {
        soil: i32,
        water: i32,
        climate: ClimateReading,
    },
}

pub struct SimBoard {
    mode: Mode,
    wiring: Wiring,
    outputs: HashMap<u8, bool>,
    servo_angle: Option<u8>,
    servo_moves: u32,
    pump_on_since: Option<Instant>,
}

impl SimBoard {
    /// Simulated board running `scenario`.
    pub fn new(scenario: Scenario) -> Self {
        let (start, drift, walk_sigma, noise_sigma, spike_prob, tank, dropout) = match scenario {
            Scenario::Drying => (2600.0, 25.0, 20.0, 15.0, 0.02_f32, 900.0, 0.0_f32),
            Scenario::Stable => (2200.0, 0.0, 8.0, 6.0, 0.0, 900.0, 0.0),
            Scenario::Flaky => (2500.0, 10.0, 60.0, 80.0, 0.10, 900.0, 0.3),
            Scenario::Wet => (1300.0, 4.0, 10.0, 10.0, 0.01, 900.0, 0.0),
            Scenario::Drought => (3100.0, 15.0, 15.0, 10.0, 0.01, 60.0, 0.0),
        };

        let soil = SoilModel {
            base: start + gaussian(0.0, 40.0),
            drift,
            walk_sigma,
            mean_reversion: if scenario == Scenario::Stable { 0.1 } else { 0.0 },
            center: start,
            noise_sigma,
            spike_prob,
            spike_sigma: 600.0,
            wet_rate: -250.0,
        };

        Self::with_mode(Mode::Simulated {
            soil,
            tank: TankModel {
                level: tank,
                drain_per_sec: 12.0,
            },
            climate_dropout: dropout,
        })
    }

    /// Deterministic board returning exactly `soil` and `water` on the
    /// wired pins and a valid climate reading.
    pub fn fixed(soil: i32, water: i32) -> Self {
        Self::with_mode(Mode::Fixed {
            soil,
            water,
            climate: ClimateReading {
                temperature_c: 24.5,
                humidity_pct: 55.0,
            },
        })
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            wiring: Wiring::default(),
            outputs: HashMap::new(),
            servo_angle: None,
            servo_moves: 0,
            pump_on_since: None,
        }
    }

    /// Tell the simulator which pins carry the soil probe, the water level
    /// sensor and the pump relay.
    pub fn wire_sensing(mut self, cfg: &SensingConfig) -> Self {
        self.wiring = Wiring {
            soil_pin: Some(cfg.soil_pin),
            water_pin: Some(cfg.water_pin),
            pump_pin: Some(cfg.pump_pin),
            pump_active_low: cfg.pump_active_low,
        };
        self
    }

    pub fn set_soil(&mut self, value: i32) {
        match &mut self.mode {
            Mode::Fixed { soil, .. } => *soil = value,
            Mode::Simulated { soil, .. } => soil.base = value as f64,
        }
    }

    pub fn set_water(&mut self, value: i32) {
        match &mut self.mode {
            Mode::Fixed { water, .. } => *water = value,
            Mode::Simulated { tank, .. } => tank.level = value as f64,
        }
    }

    pub fn set_climate(&mut self, reading: ClimateReading) {
        if let Mode::Fixed { climate, .. } = &mut self.mode {
            *climate = reading;
        }
    }

    /// Last level written to `pin`, `false` if never written.
    pub fn output(&self, pin: u8) -> bool {
        self.outputs.get(&pin).copied().unwrap_or(false)
    }

    pub fn servo_angle(&self) -> Option<u8> {
        self.servo_angle
    }

    /// Number of servo commands issued so far.
    pub fn servo_moves(&self) -> u32 {
        self.servo_moves
    }

    fn pump_on(&self) -> bool {
        self.pump_on_since.is_some()
    }

    /// Account for tank drain since the pump was switched on.
    fn settle_tank(&mut self) {
        let Some(since) = self.pump_on_since else {
            return;
        };
        if let Mode::Simulated { tank, .. } = &mut self.mode {
            let drained = since.elapsed().as_secs_f64() * tank.drain_per_sec;
            tank.level = (tank.level - drained).max(0.0);
        }
        self.pump_on_since = Some(Instant::now());
    }

    fn sample_soil(&mut self) -> i32 {
        let watering = self.pump_on();
        match &mut self.mode {
            Mode::Fixed { soil, .. } => *soil,
            Mode::Simulated { soil, .. } => {
                let pull = soil.mean_reversion * (soil.center - soil.base);
                let walk = gaussian(0.0, soil.walk_sigma);
                let wet = if watering { soil.wet_rate } else { 0.0 };
                soil.base = (soil.base + soil.drift + pull + walk + wet).clamp(800.0, 3600.0);

                let noise = gaussian(0.0, soil.noise_sigma);
                let spike = if fastrand::f32() < soil.spike_prob {
                    gaussian(0.0, soil.spike_sigma)
                } else {
                    0.0
                };
                (soil.base + noise + spike)
                    .round()
                    .clamp(0.0, ADC_MAX as f64) as i32
            }
        }
    }

    fn sample_water(&mut self) -> i32 {
        self.settle_tank();
        match &self.mode {
            Mode::Fixed { water, .. } => *water,
            Mode::Simulated { tank, .. } => {
                (tank.level + gaussian(0.0, 3.0)).round().clamp(0.0, ADC_MAX as f64) as i32
            }
        }
    }
}

impl Board for SimBoard {
    fn read_analog(&mut self, pin: u8) -> i32 {
        if Some(pin) == self.wiring.soil_pin {
            self.sample_soil()
        } else if Some(pin) == self.wiring.water_pin {
            self.sample_water()
        } else {
            tracing::debug!(pin, "[sim] analog read on unwired pin");
            0
        }
    }

    fn set_digital(&mut self, pin: u8, level: bool) {
        self.outputs.insert(pin, level);
        if Some(pin) == self.wiring.pump_pin {
            let on = level != self.wiring.pump_active_low;
            if on && self.pump_on_since.is_none() {
                self.pump_on_since = Some(Instant::now());
            } else if !on {
                self.settle_tank();
                self.pump_on_since = None;
            }
        }
    }

    fn set_servo_angle(&mut self, angle: u8) {
        self.servo_angle = Some(angle);
        self.servo_moves += 1;
        tracing::debug!(angle, "[sim] servo moved");
    }

    fn read_climate(&mut self) -> ClimateReading {
        match &self.mode {
            Mode::Fixed { climate, .. } => *climate,
            Mode::Simulated {
                climate_dropout, ..
            } => {
                if fastrand::f32() < *climate_dropout {
                    return ClimateReading::UNAVAILABLE;
                }
                ClimateReading {
                    temperature_c: gaussian(24.0, 1.5) as f32,
                    humidity_pct: gaussian(55.0, 5.0).clamp(0.0, 100.0) as f32,
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
