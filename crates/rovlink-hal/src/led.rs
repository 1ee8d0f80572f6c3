//! LED status tokens for `led <id> <status>` commands.
//!
//! The robot accepts any single token as a status; [`LedStatus`] covers the
//! common on/off pair and anything implementing `AsRef<str>` can be sent.

use std::fmt;
use std::str::FromStr;

use rovlink_types::LinkError;

/// Discrete LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedStatus {
    On,
    Off,
}

impl LedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedStatus::On => "on",
            LedStatus::Off => "off",
        }
    }
}

impl AsRef<str> for LedStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for LedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<bool> for LedStatus {
    fn from(active: bool) -> Self {
        if active { LedStatus::On } else { LedStatus::Off }
    }
}

impl FromStr for LedStatus {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(LedStatus::On),
            "off" | "0" | "false" => Ok(LedStatus::Off),
            other => Err(LinkError::InvalidCommand(format!(
                "unknown LED status {other:?}"
            ))),
        }
    }
}
