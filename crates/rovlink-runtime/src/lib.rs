//! `rovlink-runtime` – process-level plumbing around a robot link.
//!
//! # Modules
//!
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! - [`supervisor`] – [`supervise`][supervisor::supervise]: watches a
//!   [`RobotLink`][rovlink_middleware::RobotLink] and releases its resources
//!   once the telemetry stream fails.

pub mod supervisor;
pub mod telemetry;

pub use supervisor::supervise;
pub use telemetry::{TracerProviderGuard, init_tracing};
