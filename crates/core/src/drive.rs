//! Chassis motors behind an H-bridge.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::board::Board;
use crate::config::MotorPins;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Stop,
    Forward,
    Backward,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// (in1, in2, in3, in4) for this direction. Left spins the left side
    /// backwards, right spins the right side backwards.
    fn bridge(self) -> [bool; 4] {
        match self {
            Self::Stop => [false, false, false, false],
            Self::Forward => [true, false, true, false],
            Self::Backward => [false, true, false, true],
            Self::Left => [false, true, true, false],
            Self::Right => [true, false, false, true],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementState {
    pub direction: Direction,
    pub is_moving: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
}

/// Wall-clock time of a monotonic instant; instants not yet reached map to now.
fn wall_clock(at: Instant) -> OffsetDateTime {
    OffsetDateTime::now_utc() - Instant::now().saturating_duration_since(at)
}

pub struct Drive {
    pins: MotorPins,
    direction: Direction,
    started_at: Option<OffsetDateTime>,
}

impl Drive {
    /// Creates the drive with all motor outputs low.
    pub fn new(pins: MotorPins, board: &mut dyn Board) -> Self {
        let mut drive = Self {
            pins,
            direction: Direction::Stop,
            started_at: None,
        };
        drive.apply(board, Direction::Stop);
        drive
    }

    fn apply(&mut self, board: &mut dyn Board, direction: Direction) {
        let [a1, a2, b1, b2] = direction.bridge();
        let enable = direction != Direction::Stop;
        board.set_digital(self.pins.in1, a1);
        board.set_digital(self.pins.in2, a2);
        board.set_digital(self.pins.in3, b1);
        board.set_digital(self.pins.in4, b2);
        board.set_digital(self.pins.ena, enable);
        board.set_digital(self.pins.enb, enable);
        self.direction = direction;
    }

    pub fn set(&mut self, board: &mut dyn Board, direction: Direction, now: Instant) {
        if direction == Direction::Stop {
            self.stop(board);
            return;
        }
        if direction != self.direction {
            tracing::info!(direction = direction.as_str(), "motors");
        }
        self.apply(board, direction);
        self.started_at = Some(wall_clock(now));
    }

    /// Idempotent.
    pub fn stop(&mut self, board: &mut dyn Board) {
        if self.direction != Direction::Stop {
            tracing::info!("motors stopped");
        }
        self.apply(board, Direction::Stop);
        self.started_at = None;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_moving(&self) -> bool {
        self.direction != Direction::Stop
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        self.started_at
    }

    pub fn state(&self) -> MovementState {
        MovementState {
            direction: self.direction,
            is_moving: self.is_moving(),
            started_at: self.started_at,
        }
    }
}
