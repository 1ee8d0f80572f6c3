use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ultrasonic mounting angles in degrees, front-left to front-right.
pub const DEFAULT_SENSOR_ANGLES_DEG: [f64; 4] = [45.0, 15.0, -15.0, 45.0];

/// Ordered mounting angles (radians) of the range sensors reported by `sense`.
///
/// Fixed for the lifetime of a link; the length is the sensor count `N` used
/// to derive `distance/front` and the `ultrasonic[i]` channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    angles_rad: Vec<f64>,
}

impl SensorGeometry {
    /// Build a geometry from angles already expressed in radians.
    pub fn new(angles_rad: Vec<f64>) -> Self {
        Self { angles_rad }
    }

    /// Build a geometry from angles in degrees.
    pub fn from_degrees(angles_deg: &[f64]) -> Self {
        Self {
            angles_rad: angles_deg.iter().map(|d| d.to_radians()).collect(),
        }
    }

    /// Number of sensors (`N`).
    pub fn len(&self) -> usize {
        self.angles_rad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles_rad.is_empty()
    }

    /// Mounting angle of sensor `index`, in radians.
    pub fn angle(&self, index: usize) -> Option<f64> {
        self.angles_rad.get(index).copied()
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles_rad
    }
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self::from_degrees(&DEFAULT_SENSOR_ANGLES_DEG)
    }
}

/// Global position as received on the wire (degrees / metres, no reprojection).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub heading: f64,
}

/// Local (simulator frame) position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub heading: f64,
}

/// One range reading paired with the fixed mounting angle of its sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UltrasonicReading {
    pub distance: f64,
    pub angle_rad: f64,
}

/// A decoded colour frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major RGB24 pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

/// Named slot in the sensor state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reward,
    Gps,
    Pos,
    Sense,
    DistanceFront,
    Ultrasonic(usize),
    Image,
    Button(i64),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Reward => write!(f, "reward"),
            Channel::Gps => write!(f, "gps"),
            Channel::Pos => write!(f, "pos"),
            Channel::Sense => write!(f, "sense"),
            Channel::DistanceFront => write!(f, "distance/front"),
            Channel::Ultrasonic(i) => write!(f, "ultrasonic/{i}"),
            Channel::Image => write!(f, "img"),
            Channel::Button(id) => write!(f, "button/{id}"),
        }
    }
}

/// Value carried by a [`SensorUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Reward(i64),
    Gps(GpsFix),
    Pos(LocalPose),
    /// `sense` and `distance/front`.
    Ranges(Vec<f64>),
    Ultrasonic(UltrasonicReading),
    Image(Arc<RawImage>),
    Button(bool),
}

/// Change notification published on every channel write.
#[derive(Debug, Clone)]
pub struct SensorUpdate {
    pub channel: Channel,
    pub value: SensorValue,
    pub received_at: DateTime<Utc>,
}

/// Best-effort view of every channel at one moment.
///
/// Channels are read one after another, so two fields may come from
/// different telemetry lines.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorSnapshot {
    pub reward: Option<i64>,
    pub gps: Option<GpsFix>,
    pub pos: Option<LocalPose>,
    pub sense: Option<Vec<f64>>,
    pub distance_front: Option<Vec<f64>>,
    pub ultrasonic: Vec<Option<UltrasonicReading>>,
    /// `(width, height)` of the latest frame.
    pub image_size: Option<(u32, u32)>,
    pub buttons: BTreeMap<i64, bool>,
}

/// Lifecycle of a robot link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connecting,
    Active,
    ShuttingDown,
    /// Terminal: closed by an explicit shutdown.
    Closed,
    /// Terminal: the telemetry stream ended or failed.
    Failed,
}

impl LinkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Connecting => "connecting",
            LinkState::Active => "active",
            LinkState::ShuttingDown => "shutting-down",
            LinkState::Closed => "closed",
            LinkState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// High-level motion and signalling intents accepted by a drive adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum DriveIntent {
    /// Signed forward speed; the retained turn is reused.
    SetSpeed(f64),
    /// Turn ratio in `[-1, 1]` (`+1` full left); the retained speed is reused.
    SetTurn(f64),
    /// Zero the speed.
    Stop,
    Led {
        id: u32,
        status: String,
    },
}

/// Error type for the link, its codec and its decoders.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkError {
    #[error(
        "Robot not found at {host}:{port}. Is the robot/simulator running? ({reason})"
    )]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed telemetry line {line:?}: {reason}")]
    Protocol {
        line: String,
        reason: String,
    },

    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    #[error("Error on shutdown, is the connection broken? {0}")]
    Shutdown(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Link is not connected")]
    NotConnected,
}

impl LinkError {
    pub fn protocol(line: impl Into<String>, reason: impl Into<String>) -> Self {
        LinkError::Protocol {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
