//! The intent-level interface between the link and higher layers.
//!
//! Navigation or control code never formats wire commands itself.  It hands
//! [`DriveIntent`]s to a [`DriveAdapter`] and consumes [`SensorUpdate`]s from
//! its sensor stream, so a simulator link and a test double are
//! interchangeable.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use rovlink_types::{DriveIntent, LinkError, SensorUpdate};
use tokio::sync::broadcast;
use tracing::warn;

use crate::link::RobotLink;

/// Every robot backend must implement this trait.
///
/// # Contract
///
/// * `execute` – turn one [`DriveIntent`] into at most one outbound command,
///   in call order.
///
/// * `sensor_stream` – a live stream of every channel update from the moment
///   of the call on; it ends when the backend goes away.
#[async_trait]
pub trait DriveAdapter: Send + Sync {
    async fn execute(&self, intent: DriveIntent) -> Result<(), LinkError>;

    async fn sensor_stream(&self) -> BoxStream<'static, SensorUpdate>;
}

#[async_trait]
impl DriveAdapter for RobotLink {
    async fn execute(&self, intent: DriveIntent) -> Result<(), LinkError> {
        match intent {
            DriveIntent::SetSpeed(speed) => self.set_speed(speed).await,
            DriveIntent::SetTurn(turn) => self.set_turn(turn).await,
            DriveIntent::Stop => self.stop().await,
            DriveIntent::Led { id, status } => self.set_led(id, status).await,
        }
    }

    async fn sensor_stream(&self) -> BoxStream<'static, SensorUpdate> {
        Box::pin(updates(self.store().subscribe()))
    }
}

/// Adapt a broadcast receiver into a stream, skipping over lag gaps.
pub fn updates(
    receiver: broadcast::Receiver<SensorUpdate>,
) -> impl futures_util::Stream<Item = SensorUpdate> + Send + 'static {
    stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(update) => return Some((update, rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "sensor stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
