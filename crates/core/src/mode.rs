use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode. Automatic runs the cycles unattended; Manual accepts
/// operator commands for the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Manual,
    Automatic,
}

impl NodeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }

    pub fn is_automatic(self) -> bool {
        self == Self::Automatic
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
