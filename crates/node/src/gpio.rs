//! Raspberry Pi board: relay and H-bridge outputs plus a software-PWM probe
//! servo through rppal GPIO, analog inputs through an ADS1115 on I2C bus 1.
//!
//! The Pi has no climate sensor wired, so climate reads report unavailable.

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use std::collections::HashMap;
use std::{thread, time::Duration};

use rover_core::Board;

// ── ADS1115 ─────────────────────────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for single-ended reads, AIN0..AIN3 against GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// ~7.8 ms at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);
const OS_READY_BIT: u16 = 1 << 15;

/// Single-ended reads span 0..=32767; thresholds are on a 12-bit scale.
const TO_12_BIT_SHIFT: u32 = 3;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

/// Scale a raw 16-bit single-ended reading to 0..=4095.
fn to_12_bit(raw: i16) -> i32 {
    i32::from(raw).clamp(0, i16::MAX as i32) >> TO_12_BIT_SHIFT
}

struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new().context("failed to open I2C bus")?;
        i2c.set_slave_address(addr)
            .with_context(|| format!("failed to address ADS1115 at 0x{addr:02x}"))?;
        tracing::info!(addr = format_args!("0x{addr:02x}"), "ads1115 initialised");
        Ok(Self { i2c })
    }

    fn read_channel(&mut self, channel: usize) -> Result<i16> {
        self.i2c
            .block_write(REG_CONFIG, &config_for_channel(channel).to_be_bytes())?;
        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

// ── Servo ───────────────────────────────────────────────────────────────────

const SERVO_PERIOD: Duration = Duration::from_millis(20);
const SERVO_MIN_PULSE_US: u64 = 500;
const SERVO_MAX_PULSE_US: u64 = 2500;

fn servo_pulse(angle: u8) -> Duration {
    let angle = u64::from(angle.min(180));
    Duration::from_micros(SERVO_MIN_PULSE_US + angle * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / 180)
}

// ── Board ───────────────────────────────────────────────────────────────────

pub struct PiBoard {
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
    servo: OutputPin,
    adc: Ads1115,
}

impl PiBoard {
    pub fn new(servo_pin: u8, ads1115_addr: u16) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let servo = gpio
            .get(servo_pin)
            .with_context(|| format!("servo GPIO {servo_pin} unavailable"))?
            .into_output_low();
        let adc = Ads1115::new(ads1115_addr)?;
        tracing::info!(servo_pin, "pi board initialised");
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
            servo,
            adc,
        })
    }

    fn output(&mut self, pin: u8) -> Option<&mut OutputPin> {
        if !self.outputs.contains_key(&pin) {
            match self.gpio.get(pin) {
                Ok(p) => {
                    self.outputs.insert(pin, p.into_output_low());
                }
                Err(e) => {
                    tracing::error!(pin, "gpio unavailable: {e}");
                    return None;
                }
            }
        }
        self.outputs.get_mut(&pin)
    }
}

impl Board for PiBoard {
    fn read_analog(&mut self, pin: u8) -> i32 {
        let channel = usize::from(pin);
        if channel >= MUX_SINGLE_ENDED.len() {
            tracing::error!(pin, "no such ADS1115 channel");
            return -1;
        }
        match self.adc.read_channel(channel) {
            Ok(raw) => to_12_bit(raw),
            Err(e) => {
                tracing::error!(channel, "adc read failed: {e}");
                -1
            }
        }
    }

    fn set_digital(&mut self, pin: u8, level: bool) {
        if let Some(out) = self.output(pin) {
            if level {
                out.set_high();
            } else {
                out.set_low();
            }
        }
    }

    fn set_servo_angle(&mut self, angle: u8) {
        if let Err(e) = self.servo.set_pwm(SERVO_PERIOD, servo_pulse(angle)) {
            tracing::error!(angle, "servo pwm failed: {e}");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
