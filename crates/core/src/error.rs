use std::fmt;

/// A policy refusal. Denials are ordinary results, never panics: the caller
/// can retry once conditions change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Water reservoir below `min_water_level`.
    LowWater { level: i32, min: i32 },
    /// Probe servo has not received its one-time initialisation.
    ProbeNotInitialized,
    /// A soil read was requested while the probe is up or still moving.
    ProbeNotSettled,
    /// Manual actuation requested while the node runs in automatic mode.
    RejectedInAutomaticMode,
    /// A sensing cycle currently owns the probe.
    CycleBusy,
    /// The node lacks the capability the command needs.
    Unsupported(&'static str),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowWater { level, min } => {
                write!(f, "water level too low ({level} < {min})")
            }
            Self::ProbeNotInitialized => write!(f, "servo not initialized"),
            Self::ProbeNotSettled => write!(f, "probe is not down and settled"),
            Self::RejectedInAutomaticMode => {
                write!(f, "command rejected in automatic mode")
            }
            Self::CycleBusy => write!(f, "a sensing cycle is in progress"),
            Self::Unsupported(capability) => {
                write!(f, "node has no {capability} capability")
            }
        }
    }
}

impl std::error::Error for Denial {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_water_message_names_both_levels() {
        let d = Denial::LowWater { level: 50, min: 100 };
        assert_eq!(d.to_string(), "water level too low (50 < 100)");
    }

    #[test]
    fn unsupported_names_capability() {
        assert_eq!(
            Denial::Unsupported("sensing").to_string(),
            "node has no sensing capability"
        );
    }
}
