//! Telemetry receiver: the background read loop and its dispatch table.
//!
//! One task owns the read half of the connection.  Each iteration reads
//! exactly one line, splits it with the [`codec`][crate::codec] and runs the
//! handler registered for its tag to completion before the next read, so
//! channel updates land in wire order.
//!
//! | Tag | Arguments | Channels written |
//! |---|---|---|
//! | `reward` | `<int>` | `reward` |
//! | `gps` | `<lat> <lon> <f1> <alt> <f2> <heading> <f3>` | `gps` |
//! | `pos` | `<x> <y> <z> <heading>` | `pos` |
//! | `sense` | `<f0> … <fn>` (at least `N`) | `sense`, `distance/front`, `ultrasonic/i` |
//! | `img` | `<base64 jpeg>` | `img` |
//! | `btn` | `<id> <state>` | `button/id` |
//!
//! Unknown tags are ignored.  A malformed line (including one that is not
//! valid UTF-8) is logged and dropped without touching any channel.  Only a
//! line with an empty first token, end of input, or a read error ends the
//! loop, and that moves the link to [`LinkState::Failed`].

use std::collections::HashMap;
use std::sync::Arc;

use rovlink_hal::{FrameDecoder, decode_frame};
use rovlink_types::{GpsFix, LinkError, LinkState, LocalPose};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::codec::{self, Frame, Inbound};
use crate::store::SensorStore;

// ---------------------------------------------------------------------------
// Link state
// ---------------------------------------------------------------------------

/// Shared lifecycle state of one link.
///
/// `Failed` can only be entered from `Connecting`/`Active` (receiver side) and
/// `Closed` only from `ShuttingDown` (shutdown side), so a stream that ends
/// because of a requested shutdown is never reported as a failure.
#[derive(Debug)]
pub struct LinkStatus {
    state: watch::Sender<LinkState>,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self {
            state: watch::channel(LinkState::Connecting).0,
        }
    }

    pub fn get(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn mark_active(&self) -> bool {
        self.transition(|s| (s == LinkState::Connecting).then_some(LinkState::Active))
    }

    /// Returns `true` only for the call that actually entered `Failed`.
    pub(crate) fn mark_failed(&self) -> bool {
        self.transition(|s| {
            matches!(s, LinkState::Connecting | LinkState::Active).then_some(LinkState::Failed)
        })
    }

    /// Enter `ShuttingDown`.  Returns `false` when there is nothing left to
    /// tear down (already closed, or another shutdown is in progress).
    pub(crate) fn begin_shutdown(&self) -> bool {
        match self.get() {
            LinkState::Closed | LinkState::ShuttingDown => false,
            // Failed stays terminal, but its resources still need releasing.
            LinkState::Failed => true,
            LinkState::Connecting | LinkState::Active => {
                self.transition(|s| {
                    matches!(s, LinkState::Connecting | LinkState::Active)
                        .then_some(LinkState::ShuttingDown)
                }) || self.get() == LinkState::Failed
            }
        }
    }

    pub(crate) fn mark_closed(&self) -> bool {
        self.transition(|s| (s == LinkState::ShuttingDown).then_some(LinkState::Closed))
    }

    fn transition(&self, next: impl FnOnce(LinkState) -> Option<LinkState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(new_state) => {
                debug!(from = %state, to = %new_state, "link state change");
                *state = new_state;
                true
            }
            None => false,
        })
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

/// Handler for one tag.  Must parse every field before writing any channel.
pub type Handler = fn(&Dispatcher, &Frame<'_>) -> Result<(), LinkError>;

/// What happened to one inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// Unknown tag.
    Ignored,
    /// Empty first token: the stream is over.
    Closed,
}

/// Routes parsed lines to tag handlers that update the [`SensorStore`].
pub struct Dispatcher {
    store: Arc<SensorStore>,
    decoder: Arc<dyn FrameDecoder>,
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    /// Build a dispatcher with the standard tag handlers.
    pub fn new(store: Arc<SensorStore>, decoder: Arc<dyn FrameDecoder>) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("reward", on_reward);
        handlers.insert("gps", on_gps);
        handlers.insert("pos", on_pos);
        handlers.insert("sense", on_sense);
        handlers.insert("img", on_image);
        handlers.insert("btn", on_button);
        Self {
            store,
            decoder,
            handlers,
        }
    }

    pub fn store(&self) -> &Arc<SensorStore> {
        &self.store
    }

    /// Add or replace the handler for `tag`.
    pub fn register(&mut self, tag: &'static str, handler: Handler) {
        self.handlers.insert(tag, handler);
    }

    /// Parse and handle one raw line.
    pub fn dispatch_line(&self, raw: &str) -> Result<Dispatch, LinkError> {
        let frame = match codec::parse_line(raw)? {
            Inbound::Closed => return Ok(Dispatch::Closed),
            Inbound::Frame(frame) => frame,
        };
        match self.handlers.get(frame.tag()) {
            Some(handler) => {
                handler(self, &frame)?;
                Ok(Dispatch::Handled)
            }
            None => {
                trace!(tag = frame.tag(), "ignoring unknown telemetry tag");
                Ok(Dispatch::Ignored)
            }
        }
    }
}

/// `btn` state coercion: `0` and `false` (any case) are released, every other
/// non-empty token is pressed.
pub fn button_state(token: &str) -> bool {
    !(token.is_empty() || token == "0" || token.eq_ignore_ascii_case("false"))
}

fn on_reward(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    f.expect_args(1)?;
    d.store.set_reward(f.parse(0)?);
    Ok(())
}

fn on_gps(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    f.expect_args(7)?;
    // Positions 2, 4 and 6 are not kept but must still be numeric.
    let fields = (0..7)
        .map(|i| f.parse::<f64>(i))
        .collect::<Result<Vec<_>, _>>()?;
    d.store.set_gps(GpsFix {
        latitude: fields[0],
        longitude: fields[1],
        altitude: fields[3],
        heading: fields[5],
    });
    Ok(())
}

fn on_pos(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    f.expect_args(4)?;
    d.store.set_pos(LocalPose {
        x: f.parse(0)?,
        y: f.parse(1)?,
        z: f.parse(2)?,
        heading: f.parse(3)?,
    });
    Ok(())
}

fn on_sense(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    let ranges: Vec<f64> = f.parse_rest(0)?;
    let sensors = d.store.geometry().len();
    if ranges.len() < sensors {
        return Err(f.error(format!(
            "expected at least {sensors} ranges, got {}",
            ranges.len()
        )));
    }
    d.store.set_ranges(ranges);
    Ok(())
}

fn on_image(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    f.expect_args(1)?;
    let frame = decode_frame(f.args()[0], d.decoder.as_ref())?;
    d.store.set_image(frame);
    Ok(())
}

fn on_button(d: &Dispatcher, f: &Frame<'_>) -> Result<(), LinkError> {
    f.expect_args(2)?;
    let id: i64 = f.parse(0)?;
    d.store.set_button(id, button_state(f.args()[1]));
    Ok(())
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

/// Read and dispatch lines until the stream ends, a read fails, or `stop`
/// fires (or its sender is dropped).
pub async fn run<R>(
    mut reader: R,
    dispatcher: Dispatcher,
    status: Arc<LinkStatus>,
    mut stop: oneshot::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
{
    status.mark_active();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = &mut stop => {
                debug!("telemetry receiver stopping on request");
                return;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        if let Err(e) = read {
            let err = LinkError::Transport(e.to_string());
            if status.mark_failed() {
                error!(error = %err, "telemetry read failed");
            }
            return;
        }

        // End of input leaves `buf` empty, which dispatches as `Closed`.
        let outcome = match std::str::from_utf8(&buf) {
            Ok(line) => dispatcher.dispatch_line(line),
            Err(e) => Err(LinkError::protocol(
                String::from_utf8_lossy(&buf).trim_end_matches('\n'),
                format!("invalid UTF-8: {e}"),
            )),
        };
        match outcome {
            Ok(Dispatch::Closed) => {
                if status.mark_failed() {
                    warn!("Server seems to be down: telemetry stream closed");
                }
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "discarding telemetry line"),
        }
    }
}

/// A running receiver task and its stop signal.
pub(crate) struct ReceiverHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub(crate) fn spawn<R>(reader: R, dispatcher: Dispatcher, status: Arc<LinkStatus>) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(reader, dispatcher, status, stop_rx));
        Self { stop, task }
    }

    /// Signal the loop and wait for the task to drop the read half.
    pub(crate) async fn stop(self) -> Result<(), LinkError> {
        // The loop may already have exited on its own.
        let _ = self.stop.send(());
        self.task
            .await
            .map_err(|e| LinkError::Shutdown(format!("receiver task: {e}")))
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use rovlink_types::{RawImage, SensorGeometry};
    use tokio::io::{AsyncWriteExt, BufReader};

    struct StubDecoder;

    impl FrameDecoder for StubDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<RawImage, LinkError> {
            if bytes.starts_with(b"JPEG") {
                Ok(RawImage {
                    width: 1,
                    height: 1,
                    data: bytes[4..].to_vec(),
                })
            } else {
                Err(LinkError::ImageDecode("not a jpeg".to_string()))
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(SensorStore::default()), Arc::new(StubDecoder))
    }

    #[test]
    fn sense_line_fills_front_and_ultrasonic_channels() {
        let d = dispatcher();
        let outcome = d.dispatch_line("sense 0.1 0.2 0.3 0.4\n").unwrap();
        assert_eq!(outcome, Dispatch::Handled);

        let store = d.store();
        assert_eq!(store.sense().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(store.distance_front(), store.sense());
        let reading = store.ultrasonic(2).unwrap();
        assert_eq!(reading.distance, 0.3);
        let angle = SensorGeometry::default().angle(2);
        assert_eq!(Some(reading.angle_rad), angle);
    }

    #[test]
    fn short_sense_line_is_rejected_whole() {
        let d = dispatcher();
        assert!(matches!(
            d.dispatch_line("sense 0.1 0.2\n"),
            Err(LinkError::Protocol { .. })
        ));
        assert!(d.store().sense().is_none());
        assert!(d.store().ultrasonic(0).is_none());
    }

    #[test]
    fn gps_keeps_lat_lon_alt_heading() {
        let d = dispatcher();
        d.dispatch_line("gps 52.5 13.4 0 34.0 1 270.0 5\n").unwrap();
        assert_eq!(
            d.store().gps().unwrap(),
            GpsFix {
                latitude: 52.5,
                longitude: 13.4,
                altitude: 34.0,
                heading: 270.0,
            }
        );
    }

    #[test]
    fn malformed_gps_leaves_previous_fix() {
        let d = dispatcher();
        let err = d.dispatch_line("gps 1.0 2.0 x 3.0 0 4.0 0\n").unwrap_err();
        assert!(matches!(err, LinkError::Protocol { .. }));
        assert!(d.store().gps().is_none());

        d.dispatch_line("gps 1.0 2.0 0 3.0 0 4.0 0\n").unwrap();
        let before = d.store().gps();
        assert!(d.dispatch_line("gps 9 9 9 bad 9 9 9\n").is_err());
        assert!(d.dispatch_line("gps 9 9 9\n").is_err());
        assert_eq!(d.store().gps(), before);
    }

    #[test]
    fn pos_and_reward_lines() {
        let d = dispatcher();
        d.dispatch_line("pos 1 2 3 45\n").unwrap();
        d.dispatch_line("reward -3\n").unwrap();
        let pose = d.store().pos().unwrap();
        let coords = (pose.x, pose.y, pose.z, pose.heading);
        assert_eq!(coords, (1.0, 2.0, 3.0, 45.0));
        assert_eq!(d.store().reward(), Some(-3));
        assert!(d.dispatch_line("reward 1.5\n").is_err());
        assert_eq!(d.store().reward(), Some(-3));
    }

    #[test]
    fn image_failure_keeps_previous_frame() {
        let d = dispatcher();
        let good = STANDARD.encode(b"JPEGpx");
        d.dispatch_line(&format!("img {good}\n")).unwrap();
        assert_eq!(d.store().image().unwrap().data, b"px".to_vec());

        let corrupt = STANDARD.encode(b"garbage");
        assert!(matches!(
            d.dispatch_line(&format!("img {corrupt}\n")),
            Err(LinkError::ImageDecode(_))
        ));
        assert!(matches!(
            d.dispatch_line("img %%%\n"),
            Err(LinkError::ImageDecode(_))
        ));
        assert_eq!(d.store().image().unwrap().data, b"px".to_vec());
    }

    #[test]
    fn corrupt_first_image_leaves_channel_absent() {
        let d = dispatcher();
        assert!(d.dispatch_line("img !!!\n").is_err());
        assert!(d.store().image().is_none());
    }

    #[test]
    fn button_state_coercion() {
        assert!(button_state("1"));
        assert!(button_state("on"));
        assert!(button_state("True"));
        assert!(!button_state("0"));
        assert!(!button_state("false"));
        assert!(!button_state("FALSE"));
        assert!(!button_state(""));

        let d = dispatcher();
        d.dispatch_line("btn 4 1\n").unwrap();
        d.dispatch_line("btn 5 0\n").unwrap();
        assert_eq!(d.store().button(4), Some(true));
        assert_eq!(d.store().button(5), Some(false));
        assert!(d.dispatch_line("btn x 1\n").is_err());

        d.dispatch_line("btn -2 1\n").unwrap();
        assert_eq!(d.store().button(-2), Some(true));
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let d = dispatcher();
        assert_eq!(d.dispatch_line("battery 99\n").unwrap(), Dispatch::Ignored);
        assert_eq!(d.dispatch_line("\n").unwrap(), Dispatch::Closed);
    }

    #[test]
    fn registered_handler_extends_table() {
        fn on_ping(d: &Dispatcher, _f: &Frame<'_>) -> Result<(), LinkError> {
            d.store.set_reward(0);
            Ok(())
        }
        let mut d = dispatcher();
        d.register("ping", on_ping);
        assert_eq!(d.dispatch_line("ping\n").unwrap(), Dispatch::Handled);
        assert_eq!(d.store().reward(), Some(0));
    }

    #[test]
    fn failed_is_entered_once_and_blocks_closed() {
        let status = LinkStatus::new();
        assert!(status.mark_active());
        assert!(status.mark_failed());
        assert!(!status.mark_failed());
        assert_eq!(status.get(), LinkState::Failed);
        assert!(!status.mark_closed());
        assert_eq!(status.get(), LinkState::Failed);
    }

    #[test]
    fn shutdown_path_never_reports_failure() {
        let status = LinkStatus::new();
        status.mark_active();
        assert!(status.begin_shutdown());
        assert!(!status.begin_shutdown());
        assert!(!status.mark_failed());
        assert!(status.mark_closed());
        assert_eq!(status.get(), LinkState::Closed);
        assert!(!status.begin_shutdown());
    }

    #[tokio::test]
    async fn empty_line_fails_link_and_stops_reading() {
        let d = dispatcher();
        let store = Arc::clone(d.store());
        let status = Arc::new(LinkStatus::new());
        let mut states = status.subscribe();
        let (_stop_tx, stop_rx) = oneshot::channel();

        let mut input: &[u8] = b"reward 1\n\nreward 2\n";
        run(&mut input, d, Arc::clone(&status), stop_rx).await;

        assert_eq!(status.get(), LinkState::Failed);
        assert_eq!(store.reward(), Some(1));
        // The line after the empty one was never read.
        assert_eq!(input, b"reward 2\n");
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LinkState::Failed);
    }

    #[tokio::test]
    async fn malformed_lines_do_not_end_the_loop() {
        let d = dispatcher();
        let store = Arc::clone(d.store());
        let status = Arc::new(LinkStatus::new());
        let (_stop_tx, stop_rx) = oneshot::channel();

        let mut input: &[u8] =
            b"gps 1.0 2.0 x 3.0 0 4.0 0\nimg ###\nwhatever 1 2\npos 1 2 3 4\n";
        run(&mut input, d, Arc::clone(&status), stop_rx).await;

        assert!(store.gps().is_none());
        assert!(store.image().is_none());
        assert_eq!(store.pos().unwrap().heading, 4.0);
        // End of input dispatches as a closed stream.
        assert_eq!(status.get(), LinkState::Failed);
    }

    #[tokio::test]
    async fn closing_peer_unblocks_pending_read() {
        let (client, mut server) = tokio::io::duplex(1024);
        let d = dispatcher();
        let store = Arc::clone(d.store());
        let status = Arc::new(LinkStatus::new());
        let handle = ReceiverHandle::spawn(BufReader::new(client), d, Arc::clone(&status));

        let mut rewards = store.watch_reward();
        server.write_all(b"reward 5\n").await.unwrap();
        rewards.changed().await.unwrap();
        assert_eq!(status.get(), LinkState::Active);

        drop(server);
        let mut states = status.subscribe();
        states.wait_for(|s| *s == LinkState::Failed).await.unwrap();
        handle.stop().await.unwrap();
        assert_eq!(store.reward(), Some(5));
    }

    #[tokio::test]
    async fn stop_request_exits_without_failure() {
        let (client, mut server) = tokio::io::duplex(1024);
        let d = dispatcher();
        let store = Arc::clone(d.store());
        let status = Arc::new(LinkStatus::new());
        let handle = ReceiverHandle::spawn(BufReader::new(client), d, Arc::clone(&status));

        let mut rewards = store.watch_reward();
        server.write_all(b"reward 1\n").await.unwrap();
        rewards.changed().await.unwrap();

        // The read is pending on an idle stream; stop must still return.
        assert!(status.begin_shutdown());
        handle.stop().await.unwrap();
        assert_eq!(status.get(), LinkState::ShuttingDown);

        // Nothing reads the stream any more.
        let _ = server.write_all(b"reward 2\n").await;
        assert_eq!(store.reward(), Some(1));
    }

    async fn run_over(bytes: &[u8]) -> (LinkState, Arc<SensorStore>, Vec<u8>) {
        let d = dispatcher();
        let store = Arc::clone(d.store());
        let status = Arc::new(LinkStatus::new());
        let (_stop_tx, stop_rx) = oneshot::channel();

        let mut input = bytes;
        run(&mut input, d, Arc::clone(&status), stop_rx).await;
        (status.get(), store, input.to_vec())
    }

    #[tokio::test]
    async fn carriage_return_line_is_an_unknown_tag() {
        let (state, store, rest) = run_over(b"reward 1\n\r\nreward 2\n").await;
        assert_eq!(store.reward(), Some(2));
        assert!(rest.is_empty());
        assert_eq!(state, LinkState::Failed);
    }

    #[tokio::test]
    async fn leading_space_ends_the_stream() {
        let (state, store, rest) = run_over(b" reward 1\nreward 2\n").await;
        assert_eq!(state, LinkState::Failed);
        assert_eq!(store.reward(), None);
        assert_eq!(rest, b"reward 2\n");
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_discarded() {
        let (state, store, rest) = run_over(b"reward 1\nreward \xff\nreward 3\n").await;
        assert_eq!(store.reward(), Some(3));
        assert!(rest.is_empty());
        // Failed only at end of input.
        assert_eq!(state, LinkState::Failed);
    }
}
