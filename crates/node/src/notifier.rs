//! Best-effort HTTP delivery of [`PeerRequest`]s to the configured peer.
//! One GET per request, bounded by the client timeout, never retried.

use anyhow::{Context, Result};
use std::time::Duration;

use rover_core::{CheckOutcome, NotifyToken, PeerRequest, PeerResult};

#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    peer: String,
}

impl Notifier {
    pub fn new(peer: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            peer: peer.trim_end_matches('/').to_string(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// `GET {peer}/notify?token=<token>`.
    pub async fn notify(&self, token: NotifyToken) -> Result<()> {
        let url = format!("{}/notify", self.peer);
        self.client
            .get(&url)
            .query(&[("token", token.as_str())])
            .send()
            .await
            .with_context(|| format!("notify {token} -> {url}"))?
            .error_for_status()
            .with_context(|| format!("notify {token} rejected by peer"))?;
        Ok(())
    }

    /// `GET {peer}/check_sensors`, parsed.
    pub async fn request_sensor_check(&self) -> Result<CheckOutcome> {
        let url = format!("{}/check_sensors", self.peer);
        let outcome = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("sensor check -> {url}"))?
            .error_for_status()
            .context("sensor check rejected by peer")?
            .json::<CheckOutcome>()
            .await
            .context("sensor check returned malformed body")?;
        Ok(outcome)
    }

    pub async fn deliver(&self, req: &PeerRequest) -> PeerResult {
        let result = match req {
            PeerRequest::Notify { token, .. } => self.notify(*token).await.map(|()| None),
            PeerRequest::SensorCheck { .. } => self.request_sensor_check().await.map(Some),
        };
        result.map_err(|e| format!("{e:#}"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use rover_core::sensing::Decision;
    use rover_core::sensors::SoilStatus;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<String>>>;

    fn outcome() -> CheckOutcome {
        CheckOutcome {
            soil_moisture: 3000,
            soil_status: SoilStatus::Dry,
            water_level: 500,
            temperature: 22.5,
            humidity: 48.0,
            needs_irrigation: true,
            irrigated: true,
            decision: Decision::Irrigate,
        }
    }

    /// Spin up a fake peer on an ephemeral port and return its base URL.
    async fn fake_peer(seen: Seen) -> String {
        async fn notify(
            State(seen): State<Seen>,
            Query(q): Query<HashMap<String, String>>,
        ) -> &'static str {
            if let Some(token) = q.get("token") {
                seen.lock().unwrap().push(token.clone());
            }
            "ok"
        }
        async fn check() -> Json<CheckOutcome> {
            Json(outcome())
        }
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "late"
        }

        let app = Router::new()
            .route("/notify", get(notify))
            .route("/check_sensors", get(check))
            .route("/slow/notify", get(slow))
            .with_state(seen);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// A port nothing listens on.
    async fn refused_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn notify_sends_token_as_query() {
        let seen: Seen = Arc::default();
        let base = fake_peer(seen.clone()).await;
        let n = Notifier::new(&base, Duration::from_secs(2)).unwrap();

        n.notify(NotifyToken::ContinueMovement).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["continue_movement".to_string()]);
    }

    #[tokio::test]
    async fn sensor_check_parses_outcome() {
        let base = fake_peer(Arc::default()).await;
        let n = Notifier::new(&format!("{base}/"), Duration::from_secs(2)).unwrap();

        let got = n.deliver(&PeerRequest::SensorCheck { cycle: 1 }).await;
        assert_eq!(got, Ok(Some(outcome())));
    }

    #[tokio::test]
    async fn delivered_notify_yields_none() {
        let base = fake_peer(Arc::default()).await;
        let n = Notifier::new(&base, Duration::from_secs(2)).unwrap();
        let req = PeerRequest::Notify {
            token: NotifyToken::LowWater,
            cycle: Some(3),
        };
        assert_eq!(n.deliver(&req).await, Ok(None));
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error_not_a_panic() {
        let n = Notifier::new(&refused_port().await, Duration::from_secs(2)).unwrap();
        let res = n
            .deliver(&PeerRequest::Notify {
                token: NotifyToken::Irrigating,
                cycle: None,
            })
            .await;
        let err = res.unwrap_err();
        assert!(err.contains("notify irrigating"), "got: {err}");
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let base = fake_peer(Arc::default()).await;
        let n = Notifier::new(&format!("{base}/slow"), Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        assert!(n.notify(NotifyToken::SensorReady).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_route_is_an_error() {
        let base = fake_peer(Arc::default()).await;
        let n = Notifier::new(&format!("{base}/nope"), Duration::from_secs(2)).unwrap();
        assert!(n.request_sensor_check().await.is_err());
    }
}
