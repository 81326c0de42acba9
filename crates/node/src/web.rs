use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;

use anyhow::{Context, Result};
use rover_core::actuators::{ProbeMove, ProbePosition, PumpStart};
use rover_core::drive::MovementState;
use rover_core::sensors::{SensorSnapshot, SoilStatus};
use rover_core::{CheckOutcome, Denial, Direction, NodeMode, NotifyToken, PeerRequest};

use crate::notifier::Notifier;
use crate::scheduler::{self, SharedNode};

#[derive(Clone)]
pub struct AppState {
    pub node: SharedNode,
    pub notifier: Option<Arc<Notifier>>,
    /// How long `/check_sensors` waits for the cycle to decide.
    pub check_timeout: Duration,
}

impl AppState {
    fn dispatch(&self, requests: Vec<PeerRequest>) {
        for req in requests {
            scheduler::dispatch(Arc::clone(&self.node), self.notifier.clone(), req);
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorBody {
    command: &'static str,
    status: &'static str,
    message: String,
}

/// A refused or failed command, rendered as `{command, status:"error", message}`.
#[derive(Debug)]
pub struct ApiError {
    command: &'static str,
    code: StatusCode,
    message: String,
}

impl ApiError {
    fn denied(command: &'static str, denial: Denial) -> Self {
        let code = match denial {
            Denial::RejectedInAutomaticMode | Denial::CycleBusy => StatusCode::CONFLICT,
            Denial::Unsupported(_) => StatusCode::NOT_FOUND,
            Denial::LowWater { .. } | Denial::ProbeNotInitialized | Denial::ProbeNotSettled => {
                StatusCode::BAD_REQUEST
            }
        };
        tracing::info!(command, "denied: {denial}");
        Self {
            command,
            code,
            message: denial.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            command: self.command,
            status: "error",
            message: self.message,
        };
        (self.code, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct ModeResponse {
    status: &'static str,
    mode: NodeMode,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveResponse {
    command: &'static str,
    status: &'static str,
    #[serde(flatten)]
    state: MovementState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PumpResponse {
    command: &'static str,
    status: &'static str,
    pump_running: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServoResponse {
    command: &'static str,
    status: &'static str,
    servo_position: ProbePosition,
    moved: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SoilResponse {
    #[serde(flatten)]
    snapshot: SensorSnapshot,
    soil_status: SoilStatus,
}

#[derive(Serialize)]
struct NotifyResponse {
    status: &'static str,
    token: NotifyToken,
}

#[derive(Deserialize)]
struct NotifyQuery {
    token: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

const ROUTES: &[(&str, &str)] = &[
    ("/manual", "switch to manual mode"),
    ("/automatic", "switch to automatic mode"),
    ("/forward /backward /left /right", "manual movement"),
    ("/stop", "stop motors (pump on sensing-only nodes)"),
    ("/start", "start the pump"),
    ("/stop_pump", "stop the pump"),
    ("/init_servo", "initialise the probe servo"),
    ("/servo_down /servo_up", "lower or raise the probe"),
    ("/read_soil", "read sensors with the probe down"),
    ("/check_sensors", "run one sensing cycle"),
    ("/notify?token=", "status hint from the peer"),
    ("/status", "full node state"),
    ("/ping", "liveness"),
];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/manual", get(manual))
        .route("/automatic", get(automatic))
        .route("/forward", get(forward))
        .route("/backward", get(backward))
        .route("/left", get(left))
        .route("/right", get(right))
        .route("/stop", get(stop))
        .route("/start", get(start_pump))
        .route("/stop_pump", get(stop_pump))
        .route("/init_servo", get(init_servo))
        .route("/servo_down", get(servo_down))
        .route("/servo_up", get(servo_up))
        .route("/read_soil", get(read_soil))
        .route("/check_sensors", get(check_sensors))
        .route("/notify", get(notify))
        .route("/status", get(status))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn index(State(app): State<AppState>) -> impl IntoResponse {
    let node = app.node.read().await;
    let mut body = format!("{} ({})\n\n", node.name(), node.mode());
    for (path, what) in ROUTES {
        body.push_str(&format!("{path:<34} {what}\n"));
    }
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

// -- Mode --------------------------------------------------------------------

async fn manual(State(app): State<AppState>) -> Json<ModeResponse> {
    let notes = app.node.write().await.to_manual(Instant::now());
    app.dispatch(notes);
    Json(ModeResponse {
        status: "ok",
        mode: NodeMode::Manual,
    })
}

async fn automatic(State(app): State<AppState>) -> ApiResult<ModeResponse> {
    let notes = app
        .node
        .write()
        .await
        .to_automatic()
        .map_err(|d| ApiError::denied("automatic", d))?;
    app.dispatch(notes);
    Ok(Json(ModeResponse {
        status: "ok",
        mode: NodeMode::Automatic,
    }))
}

// -- Movement ----------------------------------------------------------------

async fn drive(app: &AppState, command: &'static str, direction: Direction) -> ApiResult<MoveResponse> {
    let state = app
        .node
        .write()
        .await
        .manual_move(direction, Instant::now())
        .map_err(|d| ApiError::denied(command, d))?;
    Ok(Json(MoveResponse {
        command,
        status: "ok",
        state,
    }))
}

async fn forward(State(app): State<AppState>) -> ApiResult<MoveResponse> {
    drive(&app, "forward", Direction::Forward).await
}

async fn backward(State(app): State<AppState>) -> ApiResult<MoveResponse> {
    drive(&app, "backward", Direction::Backward).await
}

async fn left(State(app): State<AppState>) -> ApiResult<MoveResponse> {
    drive(&app, "left", Direction::Left).await
}

async fn right(State(app): State<AppState>) -> ApiResult<MoveResponse> {
    drive(&app, "right", Direction::Right).await
}

/// Motors on a node that has them, otherwise the pump.
async fn stop(State(app): State<AppState>) -> Result<Response, ApiError> {
    let has_mobility = app.node.read().await.has_mobility();
    if has_mobility {
        Ok(drive(&app, "stop", Direction::Stop).await?.into_response())
    } else {
        Ok(pump_stop(&app, "stop").await?.into_response())
    }
}

// -- Pump --------------------------------------------------------------------

async fn start_pump(State(app): State<AppState>) -> ApiResult<PumpResponse> {
    let started = app
        .node
        .write()
        .await
        .start_pump(Instant::now())
        .map_err(|d| ApiError::denied("start", d))?;
    Ok(Json(PumpResponse {
        command: "start",
        status: match started {
            PumpStart::Started => "started",
            PumpStart::AlreadyRunning => "already_running",
        },
        pump_running: true,
    }))
}

async fn pump_stop(app: &AppState, command: &'static str) -> ApiResult<PumpResponse> {
    let was_running = app
        .node
        .write()
        .await
        .stop_pump()
        .map_err(|d| ApiError::denied(command, d))?;
    Ok(Json(PumpResponse {
        command,
        status: if was_running { "stopped" } else { "already_stopped" },
        pump_running: false,
    }))
}

async fn stop_pump(State(app): State<AppState>) -> ApiResult<PumpResponse> {
    pump_stop(&app, "stop_pump").await
}

// -- Probe -------------------------------------------------------------------

async fn init_servo(State(app): State<AppState>) -> ApiResult<ServoResponse> {
    app.node
        .write()
        .await
        .init_probe(Instant::now())
        .map_err(|d| ApiError::denied("init_servo", d))?;
    Ok(Json(ServoResponse {
        command: "init_servo",
        status: "ok",
        servo_position: ProbePosition::Up,
        moved: true,
    }))
}

async fn servo_down(State(app): State<AppState>) -> ApiResult<ServoResponse> {
    let moved = app
        .node
        .write()
        .await
        .lower_probe(Instant::now())
        .map_err(|d| ApiError::denied("servo_down", d))?;
    Ok(Json(ServoResponse {
        command: "servo_down",
        status: "ok",
        servo_position: ProbePosition::Down,
        moved: moved != ProbeMove::Unchanged,
    }))
}

async fn servo_up(State(app): State<AppState>) -> ApiResult<ServoResponse> {
    let moved = app
        .node
        .write()
        .await
        .raise_probe(Instant::now())
        .map_err(|d| ApiError::denied("servo_up", d))?;
    Ok(Json(ServoResponse {
        command: "servo_up",
        status: "ok",
        servo_position: ProbePosition::Up,
        moved: moved != ProbeMove::Unchanged,
    }))
}

// -- Sensors -----------------------------------------------------------------

async fn read_soil(State(app): State<AppState>) -> ApiResult<SoilResponse> {
    let (snapshot, threshold) = app
        .node
        .write()
        .await
        .read_soil(Instant::now())
        .map_err(|d| ApiError::denied("read_soil", d))?;
    let soil_status = snapshot.soil_status(threshold);
    Ok(Json(SoilResponse {
        snapshot,
        soil_status,
    }))
}

/// Runs (or joins) one sensing cycle and answers once it has decided. The
/// scheduler advances the cycle; this handler only waits.
async fn check_sensors(State(app): State<AppState>) -> ApiResult<CheckOutcome> {
    const COMMAND: &str = "check_sensors";
    let rx = app
        .node
        .write()
        .await
        .request_check()
        .map_err(|d| ApiError::denied(COMMAND, d))?;

    match tokio::time::timeout(app.check_timeout, rx).await {
        Ok(Ok(outcome)) => Ok(Json(outcome)),
        Ok(Err(_)) => Err(ApiError {
            command: COMMAND,
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: "sensing cycle aborted".into(),
        }),
        Err(_) => Err(ApiError {
            command: COMMAND,
            code: StatusCode::GATEWAY_TIMEOUT,
            message: "sensing cycle did not finish in time".into(),
        }),
    }
}

// -- Peer & reporting ----------------------------------------------------------

async fn notify(
    State(app): State<AppState>,
    Query(q): Query<NotifyQuery>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let token: NotifyToken = q.token.parse().map_err(|message| ApiError {
        command: "notify",
        code: StatusCode::BAD_REQUEST,
        message,
    })?;
    app.node.write().await.record_peer_hint(token);
    Ok(Json(NotifyResponse { status: "ok", token }))
}

async fn status(State(app): State<AppState>) -> impl IntoResponse {
    let node = app.node.read().await;
    Json(node.status(Instant::now()))
}

async fn ping(State(app): State<AppState>) -> impl IntoResponse {
    let node = app.node.read().await;
    Json(node.ping(Instant::now()))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, listen: &str, cors: bool) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let mut app = router(state);
    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    tracing::info!("http listening on http://{addr}");
    axum::serve(listener, app).await.context("http server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use rover_core::sim::SimBoard;
    use rover_core::{MobilityConfig, Node, SensingConfig};
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    const MOTOR: &str = "motor = { in1 = 14, in2 = 27, in3 = 26, in4 = 25, ena = 32, enb = 33 }\n";

    fn sensing_cfg(extra: &str) -> SensingConfig {
        toml::from_str(&format!(
            "soil_pin = 34\nwater_pin = 35\npump_pin = 19\n\
             probe_lower_settle_ms = 20\nprobe_raise_settle_ms = 10\n{extra}"
        ))
        .unwrap()
    }

    fn mobility_cfg() -> MobilityConfig {
        toml::from_str(MOTOR).unwrap()
    }

    fn app_with(node: Node) -> (Router, SharedNode) {
        let shared: SharedNode = Arc::new(RwLock::new(node));
        let state = AppState {
            node: shared.clone(),
            notifier: None,
            check_timeout: Duration::from_secs(2),
        };
        (router(state), shared)
    }

    fn sensing_app(soil: i32, water: i32) -> (Router, SharedNode) {
        let cfg = sensing_cfg("");
        let board = SimBoard::fixed(soil, water).wire_sensing(&cfg);
        app_with(Node::new("sensor-1", Box::new(board), Some(cfg), None, false, Instant::now()))
    }

    fn mobility_app() -> (Router, SharedNode) {
        app_with(Node::new(
            "rover-1",
            Box::new(SimBoard::fixed(0, 0)),
            None,
            Some(mobility_cfg()),
            false,
            Instant::now(),
        ))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // -- Mode ----------------------------------------------------------------

    #[tokio::test]
    async fn automatic_denied_until_servo_initialised() {
        let (app, _) = sensing_app(3000, 500);

        let (code, body) = get_json(&app, "/automatic").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["command"], "automatic");
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "servo not initialized");

        let (code, body) = get_json(&app, "/init_servo").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["servoPosition"], "up");

        let (code, body) = get_json(&app, "/automatic").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["mode"], "automatic");
    }

    #[tokio::test]
    async fn manual_commands_conflict_in_automatic() {
        let (app, _) = mobility_app();
        assert_eq!(get_json(&app, "/automatic").await.0, StatusCode::OK);

        let (code, body) = get_json(&app, "/forward").await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body["command"], "forward");
        assert_eq!(body["message"], "command rejected in automatic mode");

        let (code, body) = get_json(&app, "/manual").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["mode"], "manual");
    }

    // -- Movement ------------------------------------------------------------

    #[tokio::test]
    async fn manual_movement_reports_state() {
        let (app, _) = mobility_app();

        let (code, body) = get_json(&app, "/left").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["command"], "left");
        assert_eq!(body["direction"], "left");
        assert_eq!(body["isMoving"], true);
        assert!(body["startedAt"].is_string());

        let (_, body) = get_json(&app, "/stop").await;
        assert_eq!(body["command"], "stop");
        assert_eq!(body["isMoving"], false);
        assert!(body["startedAt"].is_null());
    }

    #[tokio::test]
    async fn movement_on_sensing_node_is_not_found() {
        let (app, _) = sensing_app(3000, 500);
        let (code, body) = get_json(&app, "/forward").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "node has no mobility capability");
    }

    // -- Pump ----------------------------------------------------------------

    #[tokio::test]
    async fn pump_start_and_stop() {
        let (app, _) = sensing_app(3000, 500);

        let (code, body) = get_json(&app, "/start").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "started");
        assert_eq!(body["pumpRunning"], true);

        let (_, body) = get_json(&app, "/start").await;
        assert_eq!(body["status"], "already_running");

        // Sensing-only node: /stop means the pump.
        let (_, body) = get_json(&app, "/stop").await;
        assert_eq!(body["status"], "stopped");
        assert_eq!(body["pumpRunning"], false);
    }

    #[tokio::test]
    async fn pump_start_denied_on_low_water() {
        let (app, shared) = sensing_app(3000, 50);
        let (code, body) = get_json(&app, "/start").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "water level too low (50 < 100)");

        let status = shared.read().await.status(Instant::now());
        assert!(!status.sensing.unwrap().pump_running);
    }

    #[tokio::test]
    async fn stop_pump_allowed_in_automatic() {
        let (app, _) = sensing_app(3000, 500);
        get_json(&app, "/init_servo").await;
        get_json(&app, "/automatic").await;

        let (code, body) = get_json(&app, "/stop_pump").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "already_stopped");
    }

    // -- Probe & sensors -----------------------------------------------------

    #[tokio::test]
    async fn servo_commands_are_idempotent() {
        let (app, _) = sensing_app(3000, 500);
        get_json(&app, "/init_servo").await;

        let (_, body) = get_json(&app, "/servo_down").await;
        assert_eq!(body["servoPosition"], "down");
        assert_eq!(body["moved"], true);
        let (_, body) = get_json(&app, "/servo_down").await;
        assert_eq!(body["moved"], false);
    }

    #[tokio::test]
    async fn read_soil_needs_settled_probe() {
        let (app, _) = sensing_app(3000, 500);
        get_json(&app, "/init_servo").await;

        let (code, body) = get_json(&app, "/read_soil").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "probe is not down and settled");

        get_json(&app, "/servo_down").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (code, body) = get_json(&app, "/read_soil").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["soilMoisture"], 3000);
        assert_eq!(body["soilStatus"], "dry");
    }

    #[tokio::test]
    async fn check_sensors_runs_a_cycle() {
        let (app, shared) = sensing_app(3000, 500);
        get_json(&app, "/init_servo").await;
        tokio::spawn(scheduler::run(shared.clone(), None, Duration::from_millis(5)));

        let (code, body) = get_json(&app, "/check_sensors").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["soilMoisture"], 3000);
        assert_eq!(body["waterLevel"], 500);
        assert_eq!(body["needsIrrigation"], true);
        assert_eq!(body["irrigated"], true);
        assert_eq!(body["decision"], "irrigate");
    }

    #[tokio::test]
    async fn check_sensors_times_out_without_scheduler() {
        let cfg = sensing_cfg("probe_requires_init = false\n");
        let board = SimBoard::fixed(1000, 500).wire_sensing(&cfg);
        let node = Node::new("s", Box::new(board), Some(cfg), None, false, Instant::now());
        let shared: SharedNode = Arc::new(RwLock::new(node));
        let app = router(AppState {
            node: shared,
            notifier: None,
            check_timeout: Duration::from_millis(50),
        });

        let (code, body) = get_json(&app, "/check_sensors").await;
        assert_eq!(code, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["command"], "check_sensors");
    }

    // -- Peer & reporting ----------------------------------------------------

    #[tokio::test]
    async fn notify_records_hint() {
        let (app, _) = mobility_app();
        let (code, body) = get_json(&app, "/notify?token=low_water").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["token"], "low_water");

        let (_, status) = get_json(&app, "/status").await;
        assert_eq!(status["peerHint"]["token"], "low_water");
    }

    #[tokio::test]
    async fn notify_rejects_unknown_token() {
        let (app, _) = mobility_app();
        let (code, body) = get_json(&app, "/notify?token=flood").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "unknown notify token 'flood'");
    }

    #[tokio::test]
    async fn status_and_ping() {
        let (app, _) = sensing_app(3000, 500);

        let (code, status) = get_json(&app, "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["device"], "sensor-1");
        assert_eq!(status["mode"], "manual");
        assert_eq!(status["sensing"]["pumpRunning"], false);
        assert!(status["movement"].is_null());

        let (_, ping) = get_json(&app, "/ping").await;
        assert_eq!(ping["status"], "online");
        assert_eq!(ping["device"], "sensor-1");
        assert!(ping["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn index_lists_routes_as_text() {
        let (app, _) = mobility_app();
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(ct.starts_with("text/plain"));
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("rover-1 (manual)"));
        assert!(text.contains("/check_sensors"));
    }
}
