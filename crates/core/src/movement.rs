//! Mobility capability: the drive plus the automatic movement cycle.
//!
//! `Idle → Moving → Stopped → AwaitingSensorCheck → Idle`, with an
//! inter-cycle delay stored on `Idle` as its eligibility time.

use tokio::time::Instant;

use crate::board::Board;
use crate::config::MobilityConfig;
use crate::drive::{Direction, Drive};
use crate::peer::PeerRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementPhase {
    Idle { not_before: Option<Instant> },
    Moving { since: Instant },
    Stopped,
    AwaitingSensorCheck { cycle: u64 },
}

impl MovementPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "idle",
            Self::Moving { .. } => "moving",
            Self::Stopped => "stopped",
            Self::AwaitingSensorCheck { .. } => "awaiting_sensor_check",
        }
    }
}

pub struct Mobility {
    cfg: MobilityConfig,
    drive: Drive,
    phase: MovementPhase,
    cycle: u64,
}

impl Mobility {
    pub fn new(cfg: MobilityConfig, board: &mut dyn Board) -> Self {
        let drive = Drive::new(cfg.motor, board);
        Self {
            cfg,
            drive,
            phase: MovementPhase::Idle { not_before: None },
            cycle: 0,
        }
    }

    pub fn config(&self) -> &MobilityConfig {
        &self.cfg
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub fn phase(&self) -> MovementPhase {
        self.phase
    }

    /// Manual motor command. Mode policy is checked by the caller.
    pub fn manual(&mut self, board: &mut dyn Board, direction: Direction, now: Instant) {
        self.drive.set(board, direction, now);
    }

    pub fn stop(&mut self, board: &mut dyn Board) {
        self.drive.stop(board);
    }

    /// Stops any manual motion; the next tick starts a burst immediately.
    pub fn begin_automatic(&mut self, board: &mut dyn Board) {
        self.drive.stop(board);
        self.cycle += 1;
        self.phase = MovementPhase::Idle { not_before: None };
    }

    /// Stop the motors and forget the cycle in flight. A sensor check still
    /// outstanding completes against a stale cycle id and is ignored.
    pub fn abort(&mut self, board: &mut dyn Board) {
        if self.phase != (MovementPhase::Idle { not_before: None }) {
            tracing::info!(phase = self.phase.name(), "movement cycle aborted");
        }
        self.drive.stop(board);
        self.cycle += 1;
        self.phase = MovementPhase::Idle { not_before: None };
    }

    /// Advance the automatic cycle. With `can_check == false` (no peer and
    /// no local sensing) the rover just alternates bursts and pauses.
    pub fn tick(&mut self, board: &mut dyn Board, now: Instant, can_check: bool) -> Option<PeerRequest> {
        match self.phase {
            MovementPhase::Idle { not_before } => {
                if not_before.is_some_and(|t| now < t) {
                    return None;
                }
                self.cycle += 1;
                self.drive.set(board, Direction::Forward, now);
                self.phase = MovementPhase::Moving { since: now };
                tracing::info!(cycle = self.cycle, burst_ms = self.cfg.move_burst_ms, "movement burst");
                None
            }
            MovementPhase::Moving { since } => {
                if now.saturating_duration_since(since) < self.cfg.move_burst() {
                    return None;
                }
                self.drive.stop(board);
                self.phase = MovementPhase::Stopped;
                self.after_stop(now, can_check)
            }
            MovementPhase::Stopped => self.after_stop(now, can_check),
            MovementPhase::AwaitingSensorCheck { .. } => None,
        }
    }

    fn after_stop(&mut self, now: Instant, can_check: bool) -> Option<PeerRequest> {
        if can_check {
            self.phase = MovementPhase::AwaitingSensorCheck { cycle: self.cycle };
            Some(PeerRequest::SensorCheck { cycle: self.cycle })
        } else {
            self.rest(now);
            None
        }
    }

    fn rest(&mut self, now: Instant) {
        self.phase = MovementPhase::Idle {
            not_before: Some(now + self.cfg.inter_cycle_delay()),
        };
    }

    /// The sensor check for `cycle` returned or timed out.
    pub fn check_finished(&mut self, cycle: u64, now: Instant) {
        if self.phase == (MovementPhase::AwaitingSensorCheck { cycle }) {
            self.rest(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use crate::sim::SimBoard;
    use std::time::Duration;

    fn setup() -> (Mobility, SimBoard) {
        let mut b = SimBoard::fixed(0, 0);
        let m = Mobility::new(fixtures::mobility(), &mut b);
        (m, b)
    }

    #[test]
    fn first_tick_starts_forward_burst() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        assert!(m.tick(&mut b, t0, true).is_none());
        assert_eq!(m.drive().direction(), Direction::Forward);
        assert_eq!(m.phase(), MovementPhase::Moving { since: t0 });
    }

    #[test]
    fn burst_stops_and_requests_check() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.tick(&mut b, t0, true);

        assert!(m.tick(&mut b, t0 + Duration::from_millis(2900), true).is_none());
        assert!(m.drive().is_moving());

        let req = m.tick(&mut b, t0 + Duration::from_millis(3000), true);
        assert!(!m.drive().is_moving());
        let Some(PeerRequest::SensorCheck { cycle }) = req else {
            panic!("expected a sensor check, got {req:?}");
        };
        assert_eq!(m.phase(), MovementPhase::AwaitingSensorCheck { cycle });
    }

    #[test]
    fn awaiting_check_does_not_move() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.tick(&mut b, t0, true);
        m.tick(&mut b, t0 + Duration::from_secs(3), true);

        for s in 4..20 {
            assert!(m.tick(&mut b, t0 + Duration::from_secs(s), true).is_none());
        }
        assert!(!m.drive().is_moving());
    }

    #[test]
    fn inter_cycle_delay_after_check() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.tick(&mut b, t0, true);
        let Some(PeerRequest::SensorCheck { cycle }) = m.tick(&mut b, t0 + Duration::from_secs(3), true) else {
            panic!("expected a sensor check");
        };

        let t_done = t0 + Duration::from_secs(4);
        m.check_finished(cycle, t_done);
        m.tick(&mut b, t_done + Duration::from_millis(4900), true);
        assert!(!m.drive().is_moving());
        m.tick(&mut b, t_done + Duration::from_secs(5), true);
        assert_eq!(m.drive().direction(), Direction::Forward);
    }

    #[test]
    fn stale_check_completion_ignored() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.tick(&mut b, t0, true);
        let Some(PeerRequest::SensorCheck { cycle }) = m.tick(&mut b, t0 + Duration::from_secs(3), true) else {
            panic!("expected a sensor check");
        };

        m.abort(&mut b);
        m.begin_automatic(&mut b);
        m.tick(&mut b, t0 + Duration::from_secs(4), true);
        m.check_finished(cycle, t0 + Duration::from_secs(4));
        assert!(matches!(m.phase(), MovementPhase::Moving { .. }));
    }

    #[test]
    fn without_check_target_rests_between_bursts() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.tick(&mut b, t0, false);
        assert!(m.tick(&mut b, t0 + Duration::from_secs(3), false).is_none());
        assert!(matches!(m.phase(), MovementPhase::Idle { not_before: Some(_) }));
    }

    #[test]
    fn begin_automatic_stops_manual_motion() {
        let (mut m, mut b) = setup();
        let t0 = Instant::now();
        m.manual(&mut b, Direction::Left, t0);

        m.begin_automatic(&mut b);
        assert_eq!(m.drive().direction(), Direction::Stop);

        let t1 = t0 + Duration::from_secs(10);
        m.tick(&mut b, t1, true);
        assert_eq!(m.drive().direction(), Direction::Forward);
        assert!(matches!(m.phase(), MovementPhase::Moving { since } if since == t1));
    }

    #[test]
    fn abort_stops_motors() {
        let (mut m, mut b) = setup();
        let pins = m.config().motor;
        m.tick(&mut b, Instant::now(), true);
        m.abort(&mut b);
        assert_eq!(m.drive().direction(), Direction::Stop);
        assert!(pins.all().iter().all(|p| !b.output(*p)));
    }
}
