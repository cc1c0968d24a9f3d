//! Contract shared by the signal controller and the arrival detectors:
//! approach identities, the topic namespace, wire payloads and the
//! publish/subscribe seam.

mod broker;
mod config;
mod message;
mod topics;

pub use broker::{Bus, BusError, LocalBroker, Message};
pub use config::BusConfig;
pub use message::{
    decode, encode, ArrivalMessage, DecodeError, EmergencyMessage, EncodeError, ModeLabel, PerApproach,
    PhaseLabel, StateMessage, StatusMessage,
};
pub use topics::{Route, RouteError, Topics};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Approach {
    A,
    B,
}

impl Approach {
    pub const ALL: [Approach; 2] = [Approach::A, Approach::B];

    pub fn index(self) -> usize {
        match self {
            Approach::A => 0,
            Approach::B => 1,
        }
    }

    pub fn other(self) -> Approach {
        match self {
            Approach::A => Approach::B,
            Approach::B => Approach::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Approach::A => "A",
            Approach::B => "B",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown approach {0:?}")]
pub struct UnknownApproach(pub String);

impl FromStr for Approach {
    type Err = UnknownApproach;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Approach::A),
            "B" | "b" => Ok(Approach::B),
            other => Err(UnknownApproach(other.to_string())),
        }
    }
}

/// Lamp shown to one approach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aspect {
    Red,
    Green,
}

impl Aspect {
    pub fn is_green(self) -> bool {
        matches!(self, Aspect::Green)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approach_parses_both_cases() {
        assert_eq!("A".parse::<Approach>(), Ok(Approach::A));
        assert_eq!("b".parse::<Approach>(), Ok(Approach::B));
        assert!("C".parse::<Approach>().is_err());
    }

    #[test]
    fn other_is_an_involution() {
        for a in Approach::ALL {
            assert_ne!(a, a.other());
            assert_eq!(a, a.other().other());
        }
    }
}
