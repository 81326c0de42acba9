//! Coordination logic for the irrigation rover fleet.
//!
//! A [`Node`] owns one [`Board`] and any combination of the sensing and
//! mobility capabilities. Everything here is synchronous and time is passed
//! in, so the cycles can be driven by a scheduler in production and by
//! synthetic instants in tests.

pub mod actuators;
pub mod board;
pub mod config;
pub mod drive;
pub mod error;
pub mod events;
pub mod mode;
pub mod movement;
pub mod node;
pub mod peer;
pub mod sensing;
pub mod sensors;
#[cfg(feature = "sim")]
pub mod sim;

pub use board::{Board, ClimateReading};
pub use config::{MobilityConfig, MotorPins, SensingConfig};
pub use drive::Direction;
pub use error::Denial;
pub use mode::NodeMode;
pub use node::Node;
pub use peer::{NotifyToken, PeerRequest, PeerResult};
pub use sensing::CheckOutcome;
