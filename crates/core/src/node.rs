//! Per-node context: the board, the mode, whichever capabilities the node
//! was configured with, and everything `/status` reports.
//!
//! The node is purely synchronous. The binary holds it behind a lock, calls
//! [`Node::tick`] periodically, delivers the returned [`PeerRequest`]s
//! without holding the lock and reports back via
//! [`Node::peer_request_finished`].

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;

use crate::actuators::{ProbeMove, PumpStart};
use crate::board::Board;
use crate::config::{MobilityConfig, SensingConfig};
use crate::drive::{Direction, MovementState};
use crate::error::Denial;
use crate::events::{EventKind, EventLog, NodeEvent};
use crate::mode::NodeMode;
use crate::movement::Mobility;
use crate::peer::{NotifyToken, PeerRequest, PeerResult};
use crate::sensing::{CheckOutcome, Sensing, SensingStatus};
use crate::sensors::SensorSnapshot;

// ---------------------------------------------------------------------------
// JSON responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHint {
    pub token: NotifyToken,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementStatus {
    #[serde(flatten)]
    pub state: MovementState,
    pub cycle_phase: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub device: String,
    pub mode: NodeMode,
    pub uptime_secs: u64,
    pub sensing: Option<SensingStatus>,
    pub movement: Option<MovementStatus>,
    pub peer_hint: Option<PeerHint>,
    pub last_remote_check: Option<CheckOutcome>,
    pub events: Vec<NodeEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: &'static str,
    pub device: String,
    pub mode: NodeMode,
    pub uptime_secs: u64,
    pub latest: Option<SensorSnapshot>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node {
    name: String,
    board: Box<dyn Board>,
    mode: NodeMode,
    sensing: Option<Sensing>,
    mobility: Option<Mobility>,
    has_peer: bool,
    started_at: Instant,
    events: EventLog,
    peer_hint: Option<PeerHint>,
    last_remote_check: Option<CheckOutcome>,
    /// Movement cycle waiting on the local sensing cycle (combined node).
    local_check: Option<(u64, oneshot::Receiver<CheckOutcome>)>,
    last_logged_outcome: Option<u64>,
}

impl Node {
    /// Starts in Manual mode with every actuator idle.
    pub fn new(
        name: impl Into<String>,
        mut board: Box<dyn Board>,
        sensing: Option<SensingConfig>,
        mobility: Option<MobilityConfig>,
        has_peer: bool,
        now: Instant,
    ) -> Self {
        let sensing = sensing.map(|cfg| Sensing::new(cfg, &mut *board, has_peer));
        let mobility = mobility.map(|cfg| Mobility::new(cfg, &mut *board));

        let mut events = EventLog::new();
        let caps = match (sensing.is_some(), mobility.is_some()) {
            (true, true) => "sensing+mobility",
            (true, false) => "sensing",
            (false, true) => "mobility",
            (false, false) => "none",
        };
        events.push(EventKind::System, format!("node started ({caps})"));

        Self {
            name: name.into(),
            board,
            mode: NodeMode::Manual,
            sensing,
            mobility,
            has_peer,
            started_at: now,
            events,
            peer_hint: None,
            last_remote_check: None,
            local_check: None,
            last_logged_outcome: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn has_sensing(&self) -> bool {
        self.sensing.is_some()
    }

    pub fn has_mobility(&self) -> bool {
        self.mobility.is_some()
    }

    pub fn last_remote_check(&self) -> Option<&CheckOutcome> {
        self.last_remote_check.as_ref()
    }

    pub fn peer_hint(&self) -> Option<&PeerHint> {
        self.peer_hint.as_ref()
    }

    pub fn record_error(&mut self, detail: impl Into<String>) {
        self.events.push(EventKind::Error, detail);
    }

    fn sensing_parts(&mut self) -> Result<(&mut Sensing, &mut dyn Board), Denial> {
        let sensing = self.sensing.as_mut().ok_or(Denial::Unsupported("sensing"))?;
        Ok((sensing, &mut *self.board))
    }

    fn mobility_parts(&mut self) -> Result<(&mut Mobility, &mut dyn Board), Denial> {
        let mobility = self.mobility.as_mut().ok_or(Denial::Unsupported("mobility"))?;
        Ok((mobility, &mut *self.board))
    }

    fn deny_if_automatic(&self) -> Result<(), Denial> {
        if self.mode.is_automatic() {
            Err(Denial::RejectedInAutomaticMode)
        } else {
            Ok(())
        }
    }

    fn mode_notify(&self, token: NotifyToken) -> Vec<PeerRequest> {
        if self.sensing.is_some() && self.has_peer {
            vec![PeerRequest::Notify { token, cycle: None }]
        } else {
            Vec::new()
        }
    }

    // -- Scheduler --------------------------------------------------------------

    /// One scheduler step. The pump watchdog runs in every mode.
    pub fn tick(&mut self, now: Instant) -> Vec<PeerRequest> {
        let automatic = self.mode.is_automatic();
        let mut out = Vec::new();

        if let Some(sensing) = self.sensing.as_mut() {
            let was_pumping = sensing.pump().is_running();
            if let Some(req) = sensing.tick(&mut *self.board, now, automatic) {
                out.push(req);
            }
            if was_pumping && !sensing.pump().is_running() {
                self.events.push(EventKind::Pump, "pump stopped by watchdog");
            }
            if let Some((cycle, outcome)) = sensing.last_outcome() {
                if self.last_logged_outcome != Some(cycle) {
                    self.last_logged_outcome = Some(cycle);
                    self.events.push(
                        EventKind::Sensor,
                        format!(
                            "cycle {cycle}: soil {} water {} -> {:?}",
                            outcome.soil_moisture, outcome.water_level, outcome.decision
                        ),
                    );
                }
            }
        }

        self.poll_local_check(now);

        if automatic {
            let can_check = self.sensing.is_some() || self.has_peer;
            if let Some(mobility) = self.mobility.as_mut() {
                match mobility.tick(&mut *self.board, now, can_check) {
                    Some(PeerRequest::SensorCheck { cycle }) if self.sensing.is_some() => {
                        self.start_local_check(cycle, now);
                    }
                    Some(req) => out.push(req),
                    None => {}
                }
            }
        }

        out
    }

    fn start_local_check(&mut self, cycle: u64, now: Instant) {
        let Some(sensing) = self.sensing.as_mut() else {
            return;
        };
        match sensing.request_check() {
            Ok(rx) => self.local_check = Some((cycle, rx)),
            Err(denial) => {
                tracing::warn!(cycle, "local sensor check refused: {denial}");
                self.events
                    .push(EventKind::Error, format!("local sensor check refused: {denial}"));
                if let Some(mobility) = self.mobility.as_mut() {
                    mobility.check_finished(cycle, now);
                }
            }
        }
    }

    fn poll_local_check(&mut self, now: Instant) {
        let Some((cycle, rx)) = self.local_check.as_mut() else {
            return;
        };
        let cycle = *cycle;
        let result = match rx.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => Err("local sensing cycle aborted".to_string()),
        };
        self.local_check = None;
        self.peer_request_finished(&PeerRequest::SensorCheck { cycle }, result, now);
    }

    /// Delivery of `req` finished with `result`.
    pub fn peer_request_finished(&mut self, req: &PeerRequest, result: PeerResult, now: Instant) {
        match req {
            PeerRequest::Notify { token, cycle } => {
                match &result {
                    Ok(_) => self.events.push(EventKind::Peer, format!("notified peer: {token}")),
                    Err(e) => self
                        .events
                        .push(EventKind::Error, format!("notify '{token}' failed: {e}")),
                }
                if let (Some(cycle), Some(sensing)) = (cycle, self.sensing.as_mut()) {
                    sensing.notify_finished(*cycle);
                }
            }
            PeerRequest::SensorCheck { cycle } => {
                match result {
                    Ok(Some(outcome)) => {
                        self.events.push(
                            EventKind::Peer,
                            format!(
                                "sensor check: soil {} water {} irrigated {}",
                                outcome.soil_moisture, outcome.water_level, outcome.irrigated
                            ),
                        );
                        self.last_remote_check = Some(outcome);
                    }
                    Ok(None) => {}
                    Err(e) => self
                        .events
                        .push(EventKind::Error, format!("sensor check failed: {e}")),
                }
                if let Some(mobility) = self.mobility.as_mut() {
                    mobility.check_finished(*cycle, now);
                }
            }
        }
    }

    // -- Mode controller --------------------------------------------------------

    /// Enter automatic mode; the next tick starts a cycle. Returns the
    /// `sensor_ready` notify for a sensing node with a peer.
    pub fn to_automatic(&mut self) -> Result<Vec<PeerRequest>, Denial> {
        if let Some(sensing) = self.sensing.as_mut() {
            if !sensing.probe().is_initialized() {
                return Err(Denial::ProbeNotInitialized);
            }
            sensing.begin_automatic();
        }
        if let Some(mobility) = self.mobility.as_mut() {
            mobility.begin_automatic(&mut *self.board);
        }
        self.mode = NodeMode::Automatic;
        tracing::info!(node = %self.name, "automatic mode");
        self.events.push(EventKind::Mode, "automatic");
        Ok(self.mode_notify(NotifyToken::SensorReady))
    }

    /// Enter manual mode: motors stopped, probe raised, cycles dropped.
    pub fn to_manual(&mut self, now: Instant) -> Vec<PeerRequest> {
        self.mode = NodeMode::Manual;
        if let Some(mobility) = self.mobility.as_mut() {
            mobility.abort(&mut *self.board);
        }
        if let Some(sensing) = self.sensing.as_mut() {
            sensing.abort(&mut *self.board, now);
        }
        self.local_check = None;
        tracing::info!(node = %self.name, "manual mode");
        self.events.push(EventKind::Mode, "manual");
        self.mode_notify(NotifyToken::ManualMode)
    }

    // -- Manual commands ----------------------------------------------------------

    pub fn manual_move(&mut self, direction: Direction, now: Instant) -> Result<MovementState, Denial> {
        if self.mobility.is_none() {
            return Err(Denial::Unsupported("mobility"));
        }
        self.deny_if_automatic()?;
        let (mobility, board) = self.mobility_parts()?;
        mobility.manual(board, direction, now);
        let state = mobility.drive().state();
        self.events
            .push(EventKind::Movement, format!("manual {}", direction.as_str()));
        Ok(state)
    }

    pub fn start_pump(&mut self, now: Instant) -> Result<PumpStart, Denial> {
        if self.sensing.is_none() {
            return Err(Denial::Unsupported("sensing"));
        }
        self.deny_if_automatic()?;
        let (sensing, board) = self.sensing_parts()?;
        match sensing.start_pump(board, now) {
            Ok(started) => {
                if started == PumpStart::Started {
                    self.events.push(EventKind::Pump, "pump started (manual)");
                }
                Ok(started)
            }
            Err(denial) => {
                self.events.push(EventKind::Pump, format!("pump start denied: {denial}"));
                Err(denial)
            }
        }
    }

    /// Allowed in every mode. Returns whether the pump was running.
    pub fn stop_pump(&mut self) -> Result<bool, Denial> {
        let (sensing, board) = self.sensing_parts()?;
        let was_running = sensing.stop_pump(board);
        if was_running {
            self.events.push(EventKind::Pump, "pump stopped (manual)");
        }
        Ok(was_running)
    }

    pub fn init_probe(&mut self, now: Instant) -> Result<(), Denial> {
        let (sensing, board) = self.sensing_parts()?;
        sensing.initialize_probe(board, now)?;
        self.events.push(EventKind::Probe, "probe initialised");
        Ok(())
    }

    pub fn lower_probe(&mut self, now: Instant) -> Result<ProbeMove, Denial> {
        self.move_probe(now, true)
    }

    pub fn raise_probe(&mut self, now: Instant) -> Result<ProbeMove, Denial> {
        self.move_probe(now, false)
    }

    fn move_probe(&mut self, now: Instant, down: bool) -> Result<ProbeMove, Denial> {
        if self.sensing.is_none() {
            return Err(Denial::Unsupported("sensing"));
        }
        self.deny_if_automatic()?;
        let (sensing, board) = self.sensing_parts()?;
        let moved = if down {
            sensing.lower_probe(board, now)?
        } else {
            sensing.raise_probe(board, now)?
        };
        if moved != ProbeMove::Unchanged {
            self.events
                .push(EventKind::Probe, if down { "probe lowered" } else { "probe raised" });
        }
        Ok(moved)
    }

    pub fn read_soil(&mut self, now: Instant) -> Result<(SensorSnapshot, i32), Denial> {
        let (sensing, board) = self.sensing_parts()?;
        let snapshot = sensing.read_soil(board, now)?;
        let threshold = sensing.config().dry_soil_threshold;
        self.events.push(
            EventKind::Sensor,
            format!("manual read: soil {}", snapshot.soil_moisture),
        );
        Ok((snapshot, threshold))
    }

    /// Run (or join) one sensing cycle; resolves when it has decided.
    pub fn request_check(&mut self) -> Result<oneshot::Receiver<CheckOutcome>, Denial> {
        let (sensing, _) = self.sensing_parts()?;
        sensing.request_check()
    }

    /// Status hint from the peer. Recorded, never acted on.
    pub fn record_peer_hint(&mut self, token: NotifyToken) {
        tracing::info!(%token, "peer hint");
        self.peer_hint = Some(PeerHint {
            token,
            received_at: OffsetDateTime::now_utc(),
        });
        self.events.push(EventKind::Peer, format!("peer says: {token}"));
    }

    // -- Reporting ----------------------------------------------------------------

    fn uptime_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_secs()
    }

    pub fn status(&self, now: Instant) -> NodeStatus {
        NodeStatus {
            device: self.name.clone(),
            mode: self.mode,
            uptime_secs: self.uptime_secs(now),
            sensing: self.sensing.as_ref().map(|s| s.status(now)),
            movement: self.mobility.as_ref().map(|m| MovementStatus {
                state: m.drive().state(),
                cycle_phase: m.phase().name(),
            }),
            peer_hint: self.peer_hint.clone(),
            last_remote_check: self.last_remote_check.clone(),
            events: self.events.recent(),
        }
    }

    pub fn ping(&self, now: Instant) -> PingResponse {
        PingResponse {
            status: "online",
            device: self.name.clone(),
            mode: self.mode,
            uptime_secs: self.uptime_secs(now),
            latest: self.sensing.as_ref().and_then(|s| s.latest().cloned()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
