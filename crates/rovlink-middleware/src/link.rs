//! [`RobotLink`] – one TCP connection to a robot or simulator.
//!
//! Connecting sends the `ai` handshake and spawns the telemetry receiver on
//! the read half.  The write half, together with the retained speed/turn
//! pair, sits behind one async mutex: every command call encodes and writes
//! exactly one line, in call order, even from several tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), rovlink_types::LinkError> {
//! use rovlink_middleware::RobotLink;
//!
//! let link = RobotLink::connect_to("localhost", 2323).await?;
//! link.set_speed(0.1).await?;
//! link.set_turn(0.5).await?; // sends `drive 0 20`
//! println!("{:?}", link.store().gps());
//! link.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use rovlink_hal::{DifferentialDrive, FrameDecoder, JpegDecoder};
use rovlink_types::{LinkError, LinkState, SensorGeometry};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::codec::Command;
use crate::receiver::{Dispatcher, LinkStatus, ReceiverHandle};
use crate::store::SensorStore;

/// Default simulator port.
pub const DEFAULT_PORT: u16 = 2323;

/// Connect-time parameters.
#[derive(Clone)]
pub struct LinkOptions {
    pub host: String,
    pub port: u16,
    /// Range sensor mounting angles; fixes `N` for the link's lifetime.
    pub geometry: SensorGeometry,
    /// Codec for `img` frames.
    pub decoder: Arc<dyn FrameDecoder>,
}

impl LinkOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            geometry: SensorGeometry::default(),
            decoder: Arc::new(JpegDecoder),
        }
    }

    pub fn with_geometry(mut self, geometry: SensorGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = decoder;
        self
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl std::fmt::Debug for LinkOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

/// Outbound half of the link plus the drive state it encodes from.
struct CommandPath {
    writer: Option<OwnedWriteHalf>,
    drive: DifferentialDrive,
}

/// A live connection to a robot.
pub struct RobotLink {
    host: String,
    port: u16,
    peer: Option<SocketAddr>,
    store: Arc<SensorStore>,
    status: Arc<LinkStatus>,
    command: Mutex<CommandPath>,
    receiver: Mutex<Option<ReceiverHandle>>,
}

impl RobotLink {
    /// Connect with the default geometry and JPEG decoder.
    pub async fn connect_to(host: &str, port: u16) -> Result<Self, LinkError> {
        Self::connect(LinkOptions::new(host, port)).await
    }

    /// Open the socket, send the handshake and start the telemetry receiver.
    ///
    /// # Errors
    ///
    /// [`LinkError::Connection`] if the socket cannot be established or the
    /// handshake cannot be written.
    pub async fn connect(options: LinkOptions) -> Result<Self, LinkError> {
        let LinkOptions {
            host,
            port,
            geometry,
            decoder,
        } = options;
        let connection_error = |reason: String| LinkError::Connection {
            host: host.clone(),
            port,
            reason,
        };

        debug!(host = %host, port, "connecting to robot");
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        // Commands are tiny; do not let Nagle hold them back.
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(Command::Handshake.encode().as_bytes())
            .await
            .map_err(|e| connection_error(format!("handshake failed: {e}")))?;

        let store = Arc::new(SensorStore::new(geometry));
        let status = Arc::new(LinkStatus::new());
        let dispatcher = Dispatcher::new(Arc::clone(&store), decoder);
        let receiver =
            ReceiverHandle::spawn(BufReader::new(read_half), dispatcher, Arc::clone(&status));

        info!(host = %host, port, "robot link established");
        Ok(Self {
            host,
            port,
            peer,
            store,
            status,
            command: Mutex::new(CommandPath {
                writer: Some(write_half),
                drive: DifferentialDrive::new(),
            }),
            receiver: Mutex::new(Some(receiver)),
        })
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Set the forward speed and send the resulting `drive` command.
    pub async fn set_speed(&self, speed: f64) -> Result<(), LinkError> {
        let mut path = self.command.lock().await;
        let cmd = path.drive.set_speed(speed);
        Self::write(&mut path, &Command::Drive(cmd)).await
    }

    /// Set the turn ratio and send the resulting `drive` command.
    pub async fn set_turn(&self, turn: f64) -> Result<(), LinkError> {
        let mut path = self.command.lock().await;
        let cmd = path.drive.set_turn(turn);
        Self::write(&mut path, &Command::Drive(cmd)).await
    }

    /// Zero the speed, keeping the turn ratio, and send `drive`.
    pub async fn stop(&self) -> Result<(), LinkError> {
        let mut path = self.command.lock().await;
        let cmd = path.drive.stop();
        Self::write(&mut path, &Command::Drive(cmd)).await
    }

    /// Send `led <id> <status>`.
    pub async fn set_led(&self, id: u32, status: impl AsRef<str>) -> Result<(), LinkError> {
        let cmd = Command::led(id, status)?;
        self.send_command(&cmd).await
    }

    /// Send a pre-built command line.
    pub async fn send_command(&self, cmd: &Command) -> Result<(), LinkError> {
        let mut path = self.command.lock().await;
        Self::write(&mut path, cmd).await
    }

    async fn write(path: &mut CommandPath, cmd: &Command) -> Result<(), LinkError> {
        let writer = path.writer.as_mut().ok_or(LinkError::NotConnected)?;
        let line = cmd.encode();
        tracing::trace!(command = line.trim_end(), "sending command");
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LinkError::Transport(format!("failed to send command: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| LinkError::Transport(format!("failed to flush command: {e}")))
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop the receiver and close the socket.
    ///
    /// Errors during teardown are logged, never returned: the robot may
    /// already be gone.  Calling this again is a no-op.
    pub async fn shutdown(&self) {
        if !self.status.begin_shutdown() {
            debug!(state = %self.state(), "shutdown: nothing to do");
            return;
        }

        if let Some(receiver) = self.receiver.lock().await.take()
            && let Err(e) = receiver.stop().await
        {
            warn!(error = %e, "error while stopping telemetry receiver");
        }

        if let Some(mut writer) = self.command.lock().await.writer.take()
            && let Err(e) = writer.shutdown().await
        {
            let err = LinkError::Shutdown(e.to_string());
            warn!(error = %err, "error while closing robot socket");
        }

        if self.status.mark_closed() {
            info!(host = %self.host, port = self.port, "robot link closed");
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> LinkState {
        self.status.get()
    }

    /// Await state changes, e.g. to notice `Failed`.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.status.subscribe()
    }

    pub fn store(&self) -> &Arc<SensorStore> {
        &self.store
    }

    /// Last commanded speed.
    pub async fn speed(&self) -> f64 {
        self.command.lock().await.drive.speed()
    }

    /// Last commanded turn ratio.
    pub async fn turn(&self) -> f64 {
        self.command.lock().await.drive.turn()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Drop for RobotLink {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get_mut().take() {
            receiver.abort();
        }
    }
}

impl std::fmt::Debug for RobotLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotLink")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
