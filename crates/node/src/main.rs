mod config;
#[cfg(feature = "gpio")]
mod gpio;
mod notifier;
mod scheduler;
mod web;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable the `sim` or `gpio` feature to pick a board");

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use rover_core::{Board, Node};

use config::Config;
use notifier::Notifier;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "rover.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    if let Ok(listen) = env::var("ROVER_LISTEN") {
        cfg.node.listen = listen;
    }

    // ── Board ───────────────────────────────────────────────────────
    let board = build_board(&cfg)?;

    // ── Peer ────────────────────────────────────────────────────────
    let notifier = cfg
        .node
        .peer
        .as_deref()
        .map(|peer| Notifier::new(peer, cfg.node.peer_timeout()))
        .transpose()?
        .map(Arc::new);
    if notifier.is_none() {
        tracing::warn!("no peer configured; peer requests will be dropped");
    }

    // ── Node ────────────────────────────────────────────────────────
    let node = Node::new(
        cfg.node.name.clone(),
        board,
        cfg.sensing.clone(),
        cfg.mobility.clone(),
        notifier.is_some(),
        Instant::now(),
    );
    tracing::info!(
        node = %cfg.node.name,
        sensing = node.has_sensing(),
        mobility = node.has_mobility(),
        "node ready"
    );
    let shared = Arc::new(RwLock::new(node));

    tokio::spawn(scheduler::run(
        Arc::clone(&shared),
        notifier.clone(),
        cfg.node.tick(),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let state = web::AppState {
        node: shared,
        notifier,
        check_timeout: check_timeout(&cfg),
    };
    web::serve(state, &cfg.node.listen, cfg.node.cors).await
}

/// Long enough for a cycle already in progress plus a full one.
fn check_timeout(cfg: &Config) -> Duration {
    let cycle = cfg
        .sensing
        .as_ref()
        .map(|s| s.probe_lower_settle() + s.probe_raise_settle())
        .unwrap_or_default();
    cycle * 2 + cfg.node.tick() * 4
}

#[cfg(feature = "gpio")]
fn build_board(cfg: &Config) -> Result<Box<dyn Board>> {
    let board = gpio::PiBoard::new(cfg.pi.servo_pin, cfg.pi.ads1115_addr)?;
    Ok(Box::new(board))
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn build_board(cfg: &Config) -> Result<Box<dyn Board>> {
    use rover_core::sim::{Scenario, SimBoard};

    let scenario = env::var("SIM_SCENARIO")
        .map(|s| Scenario::from_str_lossy(&s))
        .unwrap_or(Scenario::Drying);
    tracing::info!(%scenario, "using simulated board");

    let mut board = SimBoard::new(scenario);
    if let Some(s) = &cfg.sensing {
        board = board.wire_sensing(s);
    }
    Ok(Box::new(board))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_timeout_covers_two_cycles() {
        let cfg = config::parse(
            "[node]\nname = \"s\"\ntick_ms = 100\n[sensing]\nsoil_pin = 34\nwater_pin = 35\npump_pin = 19\n",
        )
        .unwrap();
        assert_eq!(check_timeout(&cfg), Duration::from_millis(3400));
    }

    #[test]
    fn mobility_only_check_timeout_is_ticks() {
        let cfg = config::parse(
            "[node]\nname = \"r\"\n[mobility]\nmotor = { in1 = 14, in2 = 27, in3 = 26, in4 = 25, ena = 32, enb = 33 }\n",
        )
        .unwrap();
        assert_eq!(check_timeout(&cfg), Duration::from_millis(400));
    }
}
