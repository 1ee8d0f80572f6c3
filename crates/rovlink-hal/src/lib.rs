//! `rovlink-hal` – leaf encoders and decoders for the robot link.
//!
//! # Modules
//!
//! - [`drive`] – differential-drive encoder turning (speed, turn) into wheel
//!   percentages.
//! - [`camera`] – base64 + JPEG decode path for embedded camera frames.
//! - [`led`] – LED status tokens.

pub mod camera;
pub mod drive;
pub mod led;

pub use camera::{FrameDecoder, JpegDecoder, decode_frame};
pub use drive::{DifferentialDrive, DriveCommand};
pub use led::LedStatus;
