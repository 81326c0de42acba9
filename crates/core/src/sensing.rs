//! Sensing capability: pump, probe, sensor reader and the automatic sensing
//! cycle that ties them together.
//!
//! ## Cycle
//!
//! ```text
//! Idle ──[interval due | check requested]──▶ ProbeLowering ──[settled]──▶ Reading
//!  ▲                                                                        │
//!  │                                                              snapshot stored
//!  │                                                                        ▼
//!  │   NotifyingPeer ◀── Irrigating | Skipping ◀── Deciding ◀──[settled]── ProbeRaising
//!  │        │
//!  └────────┘ (delivery finished, success or not)
//! ```
//!
//! Every settle delay is an eligibility timestamp: [`Sensing::tick`] never
//! sleeps, it only advances a state whose time has come. The pump watchdog
//! runs at the top of every tick regardless of the cycle state, so a pump
//! started by one cycle may still be running when the next one decides.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::actuators::{ProbeGuard, ProbeMove, ProbePosition, PumpGuard, PumpStart};
use crate::board::Board;
use crate::config::SensingConfig;
use crate::error::Denial;
use crate::peer::{NotifyToken, PeerRequest};
use crate::sensors::{SensorReader, SensorSnapshot, SoilStatus};

/// Upper bound on state transitions per tick.
const MAX_STEPS_PER_TICK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Irrigate,
    SkipMoist,
    SkipLowWater,
    SkipPumpBusy,
}

impl Decision {
    pub fn token(self) -> NotifyToken {
        match self {
            Self::Irrigate | Self::SkipPumpBusy => NotifyToken::Irrigating,
            Self::SkipMoist => NotifyToken::ContinueMovement,
            Self::SkipLowWater => NotifyToken::LowWater,
        }
    }
}

/// Irrigation is warranted iff the soil is drier than the threshold; it
/// happens only with enough water and an idle pump.
pub fn decide(snapshot: &SensorSnapshot, cfg: &SensingConfig, pump_running: bool) -> Decision {
    if snapshot.soil_moisture <= cfg.dry_soil_threshold {
        Decision::SkipMoist
    } else if snapshot.water_level < cfg.min_water_level {
        Decision::SkipLowWater
    } else if pump_running {
        Decision::SkipPumpBusy
    } else {
        Decision::Irrigate
    }
}

/// Result of one sensing cycle, returned by `/check_sensors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub soil_moisture: i32,
    pub soil_status: SoilStatus,
    pub water_level: i32,
    pub temperature: f32,
    pub humidity: f32,
    pub needs_irrigation: bool,
    pub irrigated: bool,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensingState {
    Idle,
    ProbeLowering { ready_at: Instant },
    Reading,
    ProbeRaising { ready_at: Instant },
    Deciding,
    Irrigating,
    Skipping(Decision),
    NotifyingPeer { token: NotifyToken },
}

impl SensingState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ProbeLowering { .. } => "probe_lowering",
            Self::Reading => "reading",
            Self::ProbeRaising { .. } => "probe_raising",
            Self::Deciding => "deciding",
            Self::Irrigating => "irrigating",
            Self::Skipping(_) => "skipping",
            Self::NotifyingPeer { .. } => "notifying_peer",
        }
    }
}

enum Step {
    Continue,
    Wait,
    Emit(PeerRequest),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensingStatus {
    pub cycle_state: &'static str,
    pub pump_running: bool,
    pub pump_running_ms: Option<u64>,
    pub servo_position: ProbePosition,
    pub servo_initialized: bool,
    pub latest: Option<SensorSnapshot>,
    pub soil_status: SoilStatus,
    pub last_outcome: Option<CheckOutcome>,
}

pub struct Sensing {
    cfg: SensingConfig,
    pump: PumpGuard,
    probe: ProbeGuard,
    reader: SensorReader,
    has_peer: bool,

    state: SensingState,
    cycle: u64,
    notify_this_cycle: bool,
    check_requested: bool,
    last_cycle_start: Option<Instant>,
    latest: Option<SensorSnapshot>,
    last_outcome: Option<(u64, CheckOutcome)>,
    waiters: Vec<oneshot::Sender<CheckOutcome>>,
}

impl Sensing {
    /// Forces the pump off. The probe is left where it is until
    /// initialised or commanded.
    pub fn new(cfg: SensingConfig, board: &mut dyn Board, has_peer: bool) -> Self {
        let pump = PumpGuard::new(&cfg, board);
        let probe = ProbeGuard::new(&cfg);
        let reader = SensorReader::new(&cfg);
        Self {
            cfg,
            pump,
            probe,
            reader,
            has_peer,
            state: SensingState::Idle,
            cycle: 0,
            notify_this_cycle: false,
            check_requested: false,
            last_cycle_start: None,
            latest: None,
            last_outcome: None,
            waiters: Vec::new(),
        }
    }

    pub fn config(&self) -> &SensingConfig {
        &self.cfg
    }

    pub fn state(&self) -> SensingState {
        self.state
    }

    pub fn is_cycle_active(&self) -> bool {
        self.state != SensingState::Idle
    }

    pub fn latest(&self) -> Option<&SensorSnapshot> {
        self.latest.as_ref()
    }

    /// Most recent decision and the cycle that made it.
    pub fn last_outcome(&self) -> Option<(u64, &CheckOutcome)> {
        self.last_outcome.as_ref().map(|(cycle, o)| (*cycle, o))
    }

    pub fn pump(&self) -> &PumpGuard {
        &self.pump
    }

    pub fn probe(&self) -> &ProbeGuard {
        &self.probe
    }

    // -- Mode hooks ---------------------------------------------------------

    /// Entering automatic mode: the next tick starts a cycle no matter how
    /// recently the previous one ran.
    pub fn begin_automatic(&mut self) {
        self.last_cycle_start = None;
    }

    /// Leaving automatic mode: drop any cycle in flight and put the probe
    /// back up. A running pump is left to its watchdog.
    pub fn abort(&mut self, board: &mut dyn Board, now: Instant) {
        if self.state != SensingState::Idle {
            tracing::info!(cycle = self.cycle, state = self.state.name(), "sensing cycle aborted");
        }
        self.state = SensingState::Idle;
        self.check_requested = false;
        self.waiters.clear();
        // Bump so a late notify completion from the aborted cycle is ignored.
        self.cycle += 1;
        if self.probe.is_initialized() {
            let _ = self.probe.raise(board, now);
        }
    }

    // -- Cycle --------------------------------------------------------------

    /// Ask for one cycle outside the interval timer. Joins the cycle in
    /// progress if there is one. The receiver resolves once the cycle has
    /// decided; it is dropped if the cycle is aborted.
    pub fn request_check(&mut self) -> Result<oneshot::Receiver<CheckOutcome>, Denial> {
        if !self.probe.is_initialized() {
            return Err(Denial::ProbeNotInitialized);
        }

        let (tx, rx) = oneshot::channel();
        match (self.state, &self.last_outcome) {
            // Decision already made in this cycle: answer right away.
            (SensingState::NotifyingPeer { .. }, Some((cycle, outcome))) if *cycle == self.cycle => {
                let _ = tx.send(outcome.clone());
            }
            (SensingState::Idle, _) => {
                self.check_requested = true;
                self.waiters.push(tx);
            }
            _ => self.waiters.push(tx),
        }
        Ok(rx)
    }

    /// Advance the cycle and run the pump watchdog. `automatic` enables the
    /// interval timer; requested checks run in either mode.
    pub fn tick(&mut self, board: &mut dyn Board, now: Instant, automatic: bool) -> Option<PeerRequest> {
        self.pump.tick_watchdog(board, now);

        for _ in 0..MAX_STEPS_PER_TICK {
            match self.step(board, now, automatic) {
                Step::Continue => continue,
                Step::Wait => return None,
                Step::Emit(req) => return Some(req),
            }
        }
        None
    }

    fn interval_due(&self, now: Instant) -> bool {
        self.last_cycle_start.map_or(true, |t| {
            now.saturating_duration_since(t) >= self.cfg.sensor_check_interval()
        })
    }

    fn step(&mut self, board: &mut dyn Board, now: Instant, automatic: bool) -> Step {
        match self.state {
            SensingState::Idle => {
                let timer_due = automatic && self.cfg.self_timed && self.interval_due(now);
                if !self.check_requested && !timer_due {
                    return Step::Wait;
                }

                self.cycle += 1;
                self.last_cycle_start = Some(now);
                // Requested checks answer their caller directly.
                self.notify_this_cycle = !self.check_requested;
                self.check_requested = false;

                let ready_at = match self.probe.lower(board, now) {
                    Ok(ProbeMove::Moved { settled_at }) => settled_at,
                    Ok(ProbeMove::Unchanged) => self.probe.settled_at().unwrap_or(now),
                    Err(denial) => {
                        tracing::warn!(cycle = self.cycle, "sensing cycle not started: {denial}");
                        self.waiters.clear();
                        return Step::Wait;
                    }
                };
                tracing::info!(cycle = self.cycle, notify = self.notify_this_cycle, "sensing cycle started");
                self.state = SensingState::ProbeLowering { ready_at };
                Step::Continue
            }
            SensingState::ProbeLowering { ready_at } => {
                if now < ready_at {
                    return Step::Wait;
                }
                self.state = SensingState::Reading;
                Step::Continue
            }
            SensingState::Reading => {
                self.latest = Some(self.reader.read_snapshot(board));
                let ready_at = match self.probe.raise(board, now) {
                    Ok(ProbeMove::Moved { settled_at }) => settled_at,
                    Ok(ProbeMove::Unchanged) | Err(_) => now,
                };
                self.state = SensingState::ProbeRaising { ready_at };
                Step::Continue
            }
            SensingState::ProbeRaising { ready_at } => {
                if now < ready_at {
                    return Step::Wait;
                }
                self.state = SensingState::Deciding;
                Step::Continue
            }
            SensingState::Deciding => {
                let Some(snapshot) = self.latest.clone() else {
                    tracing::warn!(cycle = self.cycle, "no snapshot to decide on; cycle dropped");
                    self.state = SensingState::Idle;
                    return Step::Wait;
                };
                let mut decision = decide(&snapshot, &self.cfg, self.pump.is_running());
                if decision == Decision::Irrigate {
                    match self.pump.start(board, now, snapshot.water_level) {
                        Ok(PumpStart::Started) => {}
                        Ok(PumpStart::AlreadyRunning) => decision = Decision::SkipPumpBusy,
                        Err(_) => decision = Decision::SkipLowWater,
                    }
                }
                tracing::info!(
                    cycle = self.cycle,
                    soil = snapshot.soil_moisture,
                    water = snapshot.water_level,
                    threshold = self.cfg.dry_soil_threshold,
                    ?decision,
                    "sensing cycle decided"
                );

                let outcome = self.outcome(&snapshot, decision);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(outcome.clone());
                }
                self.last_outcome = Some((self.cycle, outcome));

                self.state = match decision {
                    Decision::Irrigate => SensingState::Irrigating,
                    other => SensingState::Skipping(other),
                };
                Step::Continue
            }
            SensingState::Irrigating | SensingState::Skipping(_) => {
                let decision = match self.state {
                    SensingState::Skipping(d) => d,
                    _ => Decision::Irrigate,
                };
                let token = decision.token();
                if self.notify_this_cycle && self.has_peer {
                    self.state = SensingState::NotifyingPeer { token };
                    Step::Emit(PeerRequest::Notify {
                        token,
                        cycle: Some(self.cycle),
                    })
                } else {
                    self.state = SensingState::Idle;
                    Step::Wait
                }
            }
            SensingState::NotifyingPeer { .. } => Step::Wait,
        }
    }

    fn outcome(&self, snapshot: &SensorSnapshot, decision: Decision) -> CheckOutcome {
        CheckOutcome {
            soil_moisture: snapshot.soil_moisture,
            soil_status: snapshot.soil_status(self.cfg.dry_soil_threshold),
            water_level: snapshot.water_level,
            temperature: snapshot.temperature_c,
            humidity: snapshot.humidity_pct,
            needs_irrigation: snapshot.soil_moisture > self.cfg.dry_soil_threshold,
            irrigated: decision == Decision::Irrigate,
            decision,
        }
    }

    /// Delivery of the cycle's notify finished, successfully or not.
    pub fn notify_finished(&mut self, cycle: u64) {
        if cycle == self.cycle && matches!(self.state, SensingState::NotifyingPeer { .. }) {
            self.state = SensingState::Idle;
        }
    }

    // -- Manual operations ---------------------------------------------------

    pub fn start_pump(&mut self, board: &mut dyn Board, now: Instant) -> Result<PumpStart, Denial> {
        let water = self.reader.read_water_level(board);
        self.pump.start(board, now, water)
    }

    pub fn stop_pump(&mut self, board: &mut dyn Board) -> bool {
        self.pump.stop(board)
    }

    pub fn initialize_probe(&mut self, board: &mut dyn Board, now: Instant) -> Result<(), Denial> {
        if self.is_cycle_active() {
            return Err(Denial::CycleBusy);
        }
        self.probe.initialize(board, now);
        Ok(())
    }

    pub fn lower_probe(&mut self, board: &mut dyn Board, now: Instant) -> Result<ProbeMove, Denial> {
        if self.is_cycle_active() {
            return Err(Denial::CycleBusy);
        }
        self.probe.lower(board, now)
    }

    pub fn raise_probe(&mut self, board: &mut dyn Board, now: Instant) -> Result<ProbeMove, Denial> {
        if self.is_cycle_active() {
            return Err(Denial::CycleBusy);
        }
        self.probe.raise(board, now)
    }

    /// Take a snapshot with the probe already down and settled.
    pub fn read_soil(&mut self, board: &mut dyn Board, now: Instant) -> Result<SensorSnapshot, Denial> {
        if self.is_cycle_active() {
            return Err(Denial::CycleBusy);
        }
        if !self.probe.is_initialized() {
            return Err(Denial::ProbeNotInitialized);
        }
        if !self.probe.ready_to_read(now) {
            return Err(Denial::ProbeNotSettled);
        }
        let snapshot = self.reader.read_snapshot(board);
        self.latest = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn status(&self, now: Instant) -> SensingStatus {
        let soil_status = self
            .latest
            .as_ref()
            .map_or(SoilStatus::Unknown, |s| s.soil_status(self.cfg.dry_soil_threshold));
        SensingStatus {
            cycle_state: self.state.name(),
            pump_running: self.pump.is_running(),
            pump_running_ms: self.pump.running_for(now).map(|d| d.as_millis() as u64),
            servo_position: self.probe.position(),
            servo_initialized: self.probe.is_initialized(),
            latest: self.latest.clone(),
            soil_status,
            last_outcome: self.last_outcome.as_ref().map(|(_, o)| o.clone()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
