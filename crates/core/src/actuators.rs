//! Duration-capped pump control and idempotent probe positioning.
//!
//! Both guards own their output exclusively and hold every safety invariant
//! for it: the pump never runs past `pump_duration` (enforced by
//! [`PumpGuard::tick_watchdog`], not by callers), the pump never starts on a
//! low reservoir, and the probe only moves when its state actually changes.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::board::Board;
use crate::config::SensingConfig;
use crate::error::Denial;

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStart {
    Started,
    AlreadyRunning,
}

pub struct PumpGuard {
    pin: u8,
    active_low: bool,
    max_run: Duration,
    min_water_level: i32,
    running: bool,
    started_at: Option<Instant>,
}

impl PumpGuard {
    /// Creates the guard and forces the relay off.
    pub fn new(cfg: &SensingConfig, board: &mut dyn Board) -> Self {
        let mut guard = Self {
            pin: cfg.pump_pin,
            active_low: cfg.pump_active_low,
            max_run: cfg.pump_duration(),
            min_water_level: cfg.min_water_level,
            running: false,
            started_at: None,
        };
        guard.write(board, false);
        guard
    }

    fn write(&self, board: &mut dyn Board, on: bool) {
        board.set_digital(self.pin, on != self.active_low);
    }

    /// Switch the pump on unless it already runs or the reservoir reading
    /// `water_level` is below the minimum. Never blocks.
    pub fn start(
        &mut self,
        board: &mut dyn Board,
        now: Instant,
        water_level: i32,
    ) -> Result<PumpStart, Denial> {
        if self.running {
            return Ok(PumpStart::AlreadyRunning);
        }
        if water_level < self.min_water_level {
            return Err(Denial::LowWater {
                level: water_level,
                min: self.min_water_level,
            });
        }

        self.write(board, true);
        self.running = true;
        self.started_at = Some(now);
        tracing::info!(max_run_ms = self.max_run.as_millis() as u64, "pump started");
        Ok(PumpStart::Started)
    }

    /// Idempotent. Returns whether the pump was running.
    pub fn stop(&mut self, board: &mut dyn Board) -> bool {
        let was_running = self.running;
        self.write(board, false);
        self.running = false;
        self.started_at = None;
        if was_running {
            tracing::info!("pump stopped");
        }
        was_running
    }

    /// Force-stop the pump once it has run for `pump_duration`. Must be
    /// called every scheduler tick. Returns `true` if it stopped the pump.
    pub fn tick_watchdog(&mut self, board: &mut dyn Board, now: Instant) -> bool {
        match self.started_at {
            Some(since) if self.running && now.saturating_duration_since(since) >= self.max_run => {
                tracing::info!(
                    ran_ms = now.saturating_duration_since(since).as_millis() as u64,
                    "pump watchdog: duration reached"
                );
                self.stop(board)
            }
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn running_for(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .filter(|_| self.running)
            .map(|since| now.saturating_duration_since(since))
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbePosition {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMove {
    /// Servo commanded; readings are valid from `settled_at` on.
    Moved { settled_at: Instant },
    /// Already in the requested position; nothing was written.
    Unchanged,
}

pub struct ProbeGuard {
    up_angle: u8,
    down_angle: u8,
    lower_settle: Duration,
    raise_settle: Duration,
    position: ProbePosition,
    initialized: bool,
    settled_at: Option<Instant>,
}

impl ProbeGuard {
    /// Does not move the servo. Boards that need no explicit initialisation
    /// start out initialised and assumed up.
    pub fn new(cfg: &SensingConfig) -> Self {
        Self {
            up_angle: cfg.servo_up_angle,
            down_angle: cfg.servo_down_angle,
            lower_settle: cfg.probe_lower_settle(),
            raise_settle: cfg.probe_raise_settle(),
            position: ProbePosition::Up,
            initialized: !cfg.probe_requires_init,
            settled_at: None,
        }
    }

    /// One-time initialisation: drive to the up angle and accept commands.
    /// Re-running it is harmless.
    pub fn initialize(&mut self, board: &mut dyn Board, now: Instant) -> Instant {
        board.set_servo_angle(self.up_angle);
        self.position = ProbePosition::Up;
        self.initialized = true;
        let settled_at = now + self.raise_settle;
        self.settled_at = Some(settled_at);
        tracing::info!(angle = self.up_angle, "probe initialised");
        settled_at
    }

    pub fn lower(&mut self, board: &mut dyn Board, now: Instant) -> Result<ProbeMove, Denial> {
        self.move_to(board, now, ProbePosition::Down)
    }

    pub fn raise(&mut self, board: &mut dyn Board, now: Instant) -> Result<ProbeMove, Denial> {
        self.move_to(board, now, ProbePosition::Up)
    }

    fn move_to(
        &mut self,
        board: &mut dyn Board,
        now: Instant,
        target: ProbePosition,
    ) -> Result<ProbeMove, Denial> {
        if !self.initialized {
            return Err(Denial::ProbeNotInitialized);
        }
        if self.position == target {
            return Ok(ProbeMove::Unchanged);
        }

        let (angle, settle) = match target {
            ProbePosition::Down => (self.down_angle, self.lower_settle),
            ProbePosition::Up => (self.up_angle, self.raise_settle),
        };
        board.set_servo_angle(angle);
        self.position = target;
        let settled_at = now + settle;
        self.settled_at = Some(settled_at);
        tracing::debug!(?target, angle, "probe moving");
        Ok(ProbeMove::Moved { settled_at })
    }

    /// Earliest instant at which the probe is considered settled in its
    /// current position.
    pub fn settled_at(&self) -> Option<Instant> {
        self.settled_at
    }

    pub fn is_settled(&self, now: Instant) -> bool {
        self.settled_at.map_or(true, |t| now >= t)
    }

    /// True when a soil reading is physically meaningful.
    pub fn ready_to_read(&self, now: Instant) -> bool {
        self.position == ProbePosition::Down && self.is_settled(now)
    }

    pub fn position(&self) -> ProbePosition {
        self.position
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

// ===========================================================================
// Tests
// ===========================================================================
