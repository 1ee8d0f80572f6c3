//! `rovlink-middleware` – the robot link protocol engine.
//!
//! Moves telemetry from the robot into a shared store and motion commands
//! from the application onto the wire, over one TCP connection.
//!
//! # Modules
//!
//! - [`codec`] – line-oriented wire format: outbound command encoding and
//!   inbound tag/argument splitting.
//! - [`store`] – [`SensorStore`]: latest-value channels with change
//!   notification, written only by the receiver.
//! - [`receiver`] – the background read loop and its tag dispatch table.
//! - [`link`] – [`RobotLink`]: socket lifecycle, drive/LED commands and
//!   shutdown.
//! - [`adapter`] – [`DriveAdapter`], the intent-level interface consumed by
//!   higher layers.

pub mod adapter;
pub mod codec;
pub mod link;
pub mod receiver;
pub mod store;

pub use adapter::DriveAdapter;
pub use codec::Command;
pub use link::{LinkOptions, RobotLink};
pub use store::SensorStore;
