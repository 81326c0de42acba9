//! What a node asks of its peer. The cycles only produce [`PeerRequest`]s;
//! the node binary delivers them over HTTP and reports the result back, so
//! no cycle ever waits on the network while holding the node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sensing::CheckOutcome;

/// Short status hint pushed to the peer after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyToken {
    Irrigating,
    ContinueMovement,
    LowWater,
    SensorReady,
    ManualMode,
}

impl NotifyToken {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Irrigating => "irrigating",
            Self::ContinueMovement => "continue_movement",
            Self::LowWater => "low_water",
            Self::SensorReady => "sensor_ready",
            Self::ManualMode => "manual_mode",
        }
    }
}

impl fmt::Display for NotifyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "irrigating" => Ok(Self::Irrigating),
            "continue_movement" => Ok(Self::ContinueMovement),
            "low_water" => Ok(Self::LowWater),
            "sensor_ready" => Ok(Self::SensorReady),
            "manual_mode" => Ok(Self::ManualMode),
            other => Err(format!("unknown notify token '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    /// Fire-and-forget status push. `cycle` is set when a sensing cycle is
    /// parked in `NotifyingPeer` waiting for delivery to finish.
    Notify { token: NotifyToken, cycle: Option<u64> },
    /// Ask the sensing peer to run a check; the movement cycle waits for it.
    SensorCheck { cycle: u64 },
}

/// `Ok(Some(_))` carries a parsed check result, `Ok(None)` a delivered
/// notify, `Err` the reason delivery failed.
pub type PeerResult = Result<Option<CheckOutcome>, String>;
