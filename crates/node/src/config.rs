//! TOML config file loading and validation. A `[sensing]` or `[mobility]`
//! section grants the node that capability.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use rover_core::config::ADC_MAX;
use rover_core::{MobilityConfig, SensingConfig};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub node: NodeSection,
    pub sensing: Option<SensingConfig>,
    pub mobility: Option<MobilityConfig>,
    #[serde(default)]
    pub pi: PiSection,
}

#[derive(Debug, Deserialize)]
pub struct NodeSection {
    pub name: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Base URL of the peer node, e.g. `http://192.168.1.42`.
    pub peer: Option<String>,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default)]
    pub cors: bool,
}

impl NodeSection {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

/// Raspberry Pi wiring. Only read with the `gpio` feature; analog pins in
/// `[sensing]` are ADS1115 channels there.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
pub struct PiSection {
    pub servo_pin: u8,
    pub ads1115_addr: u16,
}

impl Default for PiSection {
    fn default() -> Self {
        Self {
            servo_pin: 18,
            ads1115_addr: 0x48,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_tick_ms() -> u64 {
    100
}
fn default_peer_timeout_ms() -> u64 {
    5000
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the 40-pin header. GPIO 0-1 belong to the ID EEPROM.
#[cfg(feature = "gpio")]
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Single-ended ADS1115 inputs.
#[cfg(feature = "gpio")]
const ADS1115_CHANNELS: std::ops::RangeInclusive<u8> = 0..=3;

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_node(&mut errors);
        if let Some(s) = &self.sensing {
            validate_sensing(s, &mut errors);
        }
        if let Some(m) = &self.mobility {
            validate_mobility(m, &mut errors);
        }
        if self.sensing.is_none() && self.mobility.is_none() {
            errors.push("node has neither a [sensing] nor a [mobility] section".into());
        }
        if let (Some(s), Some(m)) = (&self.sensing, &self.mobility) {
            if m.motor.all().contains(&s.pump_pin) {
                errors.push(format!(
                    "sensing: pump_pin {} is also a motor pin",
                    s.pump_pin
                ));
            }
        }
        #[cfg(feature = "gpio")]
        self.validate_pi(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_node(&self, errors: &mut Vec<String>) {
        let n = &self.node;
        if n.name.trim().is_empty() {
            errors.push("node: name is empty".into());
        }
        if n.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "node: listen '{}' is not a socket address (e.g. 0.0.0.0:8080)",
                n.listen
            ));
        }
        if let Some(peer) = &n.peer {
            if !(peer.starts_with("http://") || peer.starts_with("https://")) {
                errors.push(format!("node: peer '{peer}' must start with http://"));
            }
        }
        if n.tick_ms == 0 {
            errors.push("node: tick_ms must be positive".into());
        }
        if n.peer_timeout_ms == 0 {
            errors.push("node: peer_timeout_ms must be positive".into());
        }
    }

    #[cfg(feature = "gpio")]
    fn validate_pi(&self, errors: &mut Vec<String>) {
        let mut digital: Vec<(&str, u8)> = vec![("pi.servo_pin", self.pi.servo_pin)];
        if let Some(s) = &self.sensing {
            digital.push(("sensing.pump_pin", s.pump_pin));
            for (name, ch) in [("sensing.soil_pin", s.soil_pin), ("sensing.water_pin", s.water_pin)] {
                if !ADS1115_CHANNELS.contains(&ch) {
                    errors.push(format!("{name}: ADS1115 channel {ch} out of range (0-3)"));
                }
            }
        }
        if let Some(m) = &self.mobility {
            for pin in m.motor.all() {
                digital.push(("mobility.motor", pin));
            }
        }

        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in digital {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{name}: GPIO {pin} is already in use"));
            }
        }
    }
}

fn validate_sensing(s: &SensingConfig, errors: &mut Vec<String>) {
    if s.soil_pin == s.water_pin {
        errors.push(format!(
            "sensing: soil_pin and water_pin are both {}",
            s.soil_pin
        ));
    }

    // ── Servo ───────────────────────────────────────────────
    for (name, angle) in [("servo_up_angle", s.servo_up_angle), ("servo_down_angle", s.servo_down_angle)] {
        if angle > 180 {
            errors.push(format!("sensing: {name} {angle} out of range [0, 180]"));
        }
    }
    if s.servo_up_angle == s.servo_down_angle {
        errors.push(format!(
            "sensing: servo_up_angle and servo_down_angle are both {}",
            s.servo_up_angle
        ));
    }

    // ── Thresholds ──────────────────────────────────────────
    if !(0..=ADC_MAX).contains(&s.dry_soil_threshold) {
        errors.push(format!(
            "sensing: dry_soil_threshold {} out of range [0, {ADC_MAX}]",
            s.dry_soil_threshold
        ));
    }
    if !(0..=ADC_MAX).contains(&s.min_water_level) {
        errors.push(format!(
            "sensing: min_water_level {} out of range [0, {ADC_MAX}]",
            s.min_water_level
        ));
    }

    // ── Timing ──────────────────────────────────────────────
    if s.pump_duration_ms == 0 {
        errors.push("sensing: pump_duration_ms must be positive".into());
    }
    if s.sensor_check_interval_ms == 0 {
        errors.push("sensing: sensor_check_interval_ms must be positive".into());
    }
}

fn validate_mobility(m: &MobilityConfig, errors: &mut Vec<String>) {
    let mut seen: HashSet<u8> = HashSet::new();
    for pin in m.motor.all() {
        if !seen.insert(pin) {
            errors.push(format!("mobility: motor pin {pin} is used twice"));
        }
    }
    if m.move_burst_ms == 0 {
        errors.push("mobility: move_burst_ms must be positive".into());
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SENSING_NODE: &str = r#"
[node]
name = "sensor-1"
listen = "0.0.0.0:8081"
peer = "http://192.168.1.40"

[sensing]
soil_pin = 34
water_pin = 35
pump_pin = 19
"#;

    const MOBILITY_NODE: &str = r#"
[node]
name = "rover-1"
peer = "http://192.168.1.41"

[mobility]
motor = { in1 = 14, in2 = 27, in3 = 26, in4 = 25, ena = 32, enb = 33 }
"#;

    // Sample pins are ESP32 numbers; the Pi build wants ADS1115 channels.
    #[cfg(not(feature = "gpio"))]
    #[test]
    fn sample_config_runs_cycles_on_its_own_timer() {
        let cfg = parse(include_str!("../../../rover.toml")).unwrap();
        let sensing = cfg.sensing.expect("sample has a [sensing] section");
        assert!(sensing.self_timed);
        assert!(cfg.mobility.is_none());
        assert_eq!(cfg.node.peer.as_deref(), Some("http://192.168.1.40:8080"));
    }

    fn assert_validation_err(toml_str: &str, needle: &str) {
        let err = parse(toml_str).unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_sensing_node_with_defaults() {
        let cfg = parse(SENSING_NODE).unwrap();
        assert_eq!(cfg.node.name, "sensor-1");
        assert_eq!(cfg.node.tick_ms, 100);
        assert_eq!(cfg.node.peer_timeout(), Duration::from_secs(5));
        assert!(!cfg.node.cors);
        assert!(cfg.mobility.is_none());

        let s = cfg.sensing.unwrap();
        assert_eq!(s.dry_soil_threshold, 2800);
        assert_eq!(s.min_water_level, 100);
        assert_eq!(s.pump_duration_ms, 5000);
        assert_eq!(s.sensor_check_interval_ms, 30_000);
        assert_eq!((s.servo_up_angle, s.servo_down_angle), (60, 90));
        assert!(s.probe_requires_init);
        assert!(s.self_timed);
    }

    #[test]
    fn parse_mobility_node_with_defaults() {
        let cfg = parse(MOBILITY_NODE).unwrap();
        assert_eq!(cfg.node.listen, "0.0.0.0:8080");
        let m = cfg.mobility.unwrap();
        assert_eq!(m.motor.in1, 14);
        assert_eq!(m.move_burst_ms, 3000);
        assert_eq!(m.inter_cycle_delay_ms, 5000);
    }

    #[test]
    fn parse_combined_node() {
        let toml_str = format!(
            "{SENSING_NODE}\n[mobility]\nmotor = {{ in1 = 14, in2 = 27, in3 = 26, in4 = 25, ena = 32, enb = 33 }}\n"
        );
        let cfg = parse(&toml_str).unwrap();
        assert!(cfg.sensing.is_some() && cfg.mobility.is_some());
    }

    #[test]
    fn missing_node_section_fails_to_parse() {
        assert!(parse("[sensing]\nsoil_pin = 1\nwater_pin = 2\npump_pin = 3\n").is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn no_capability_rejected() {
        assert_validation_err("[node]\nname = \"x\"\n", "neither a [sensing] nor a [mobility]");
    }

    #[test]
    fn bad_listen_rejected() {
        let toml_str = SENSING_NODE.replace("0.0.0.0:8081", "port 80");
        assert_validation_err(&toml_str, "not a socket address");
    }

    #[test]
    fn peer_without_scheme_rejected() {
        let toml_str = SENSING_NODE.replace("http://192.168.1.40", "192.168.1.40");
        assert_validation_err(&toml_str, "must start with http://");
    }

    #[test]
    fn shared_soil_and_water_pin_rejected() {
        let toml_str = SENSING_NODE.replace("water_pin = 35", "water_pin = 34");
        assert_validation_err(&toml_str, "soil_pin and water_pin are both 34");
    }

    #[test]
    fn threshold_outside_adc_range_rejected() {
        let toml_str = format!("{SENSING_NODE}dry_soil_threshold = 5000\n");
        assert_validation_err(&toml_str, "dry_soil_threshold 5000 out of range");
    }

    #[test]
    fn zero_pump_duration_rejected() {
        let toml_str = format!("{SENSING_NODE}pump_duration_ms = 0\n");
        assert_validation_err(&toml_str, "pump_duration_ms must be positive");
    }

    #[test]
    fn duplicate_motor_pin_rejected() {
        let toml_str = MOBILITY_NODE.replace("enb = 33", "enb = 32");
        assert_validation_err(&toml_str, "motor pin 32 is used twice");
    }

    #[test]
    fn pump_on_motor_pin_rejected() {
        let toml_str = format!(
            "{SENSING_NODE}\n[mobility]\nmotor = {{ in1 = 19, in2 = 27, in3 = 26, in4 = 25, ena = 32, enb = 33 }}\n"
        );
        assert_validation_err(&toml_str, "pump_pin 19 is also a motor pin");
    }

    #[test]
    fn multiple_errors_collected() {
        let toml_str = r#"
[node]
name = ""
listen = "nowhere"
tick_ms = 0

[sensing]
soil_pin = 1
water_pin = 1
pump_pin = 3
servo_up_angle = 200
"#;
        let err = parse(toml_str).unwrap_err();
        let msg = format!("{err:#}");
        // Should report many errors, not bail after the first
        assert!(msg.contains("name is empty"), "missing name error in: {msg}");
        assert!(msg.contains("not a socket address"), "missing listen error in: {msg}");
        assert!(msg.contains("tick_ms"), "missing tick error in: {msg}");
        assert!(msg.contains("servo_up_angle 200"), "missing servo error in: {msg}");
        assert!(msg.contains("5 errors"), "wrong count in: {msg}");
    }
}
