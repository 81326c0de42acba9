//! The hardware seam. Everything the coordination logic needs from a board
//! is expressed through [`Board`]; the simulated board and the Raspberry Pi
//! board both implement it.
//!
//! Board calls never fail from the caller's point of view: a board that
//! cannot talk to its hardware logs the fault and returns a value the
//! sensor reader normalises (`-1`, `NaN`).

/// Raw temperature / humidity pair as reported by the climate sensor.
/// Either value may be `NaN` when the sensor is unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl ClimateReading {
    pub const UNAVAILABLE: Self = Self {
        temperature_c: f32::NAN,
        humidity_pct: f32::NAN,
    };
}

pub trait Board: Send + Sync {
    /// Single analog conversion on `pin`.
    fn read_analog(&mut self, pin: u8) -> i32;

    /// Drive a digital output.
    fn set_digital(&mut self, pin: u8, level: bool);

    /// Move the probe servo to `angle` degrees (0..=180).
    fn set_servo_angle(&mut self, angle: u8);

    /// Read the climate sensor, if the board has one.
    fn read_climate(&mut self) -> ClimateReading {
        ClimateReading::UNAVAILABLE
    }
}

impl<B: Board + ?Sized> Board for Box<B> {
    fn read_analog(&mut self, pin: u8) -> i32 {
        (**self).read_analog(pin)
    }

    fn set_digital(&mut self, pin: u8, level: bool) {
        (**self).set_digital(pin, level)
    }

    fn set_servo_angle(&mut self, angle: u8) {
        (**self).set_servo_angle(angle)
    }

    fn read_climate(&mut self) -> ClimateReading {
        (**self).read_climate()
    }
}
