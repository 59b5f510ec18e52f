//! Connection management for AMI

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    config::AmiSettings,
    constants::{
        ACTION_LOGIN, AUTH_TIMEOUT_MS, ERROR_QUEUE_SIZE, MESSAGE_QUEUE_SIZE, READER_SETTLE_MS,
        SOCKET_BUF_SIZE, WRITE_TIMEOUT_MS,
    },
    error::{AmiError, AmiResult},
    frame::Frame,
    headers::AmiHeader,
    metrics::AmiMetrics,
    protocol::{serialize, FrameDecoder},
    reader::{reader_loop, recv_frame, stop_requested, MessageStream, ReaderContext},
};

/// Lifecycle of an [`AmiClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Constructed, or the last connect attempt failed.
    Idle,
    /// TCP dial in progress.
    Dialing,
    /// Login sent, waiting for the reply.
    Authenticating,
    /// Authenticated; commands may be sent.
    Connected,
    /// The reader exited and closed the socket. `connect` again to resume.
    Disconnected,
    /// `disconnect()` was called. Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Dialing => write!(f, "dialing"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Write one frame in a single call under the fixed write deadline.
async fn write_frame<W>(writer: &mut W, frame: &Frame) -> AmiResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serialize(frame);
    let written = match timeout(
        Duration::from_millis(WRITE_TIMEOUT_MS),
        writer.write(&payload),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(AmiError::Timeout {
                timeout_ms: WRITE_TIMEOUT_MS,
            })
        }
    };

    if written != payload.len() {
        return Err(AmiError::PartialWrite {
            written,
            expected: payload.len(),
        });
    }
    Ok(())
}

/// Run `dial` under `budget`, giving up early if the caller cancels.
///
/// Failure, deadline and cancellation all come back as
/// [`AmiError::ConnectionFailed`]; the cause is only logged.
async fn dial_with_timeout<F, T>(
    dial: F,
    budget: Duration,
    shutdown: &mut watch::Receiver<bool>,
    target: &str,
) -> AmiResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let dial_result = tokio::select! {
        r = timeout(budget, dial) => r,
        _ = stop_requested(shutdown, false) => {
            warn!("[CONNECT] Dial to {} cancelled by caller", target);
            return Err(AmiError::ConnectionFailed);
        }
    };

    match dial_result {
        Ok(Ok(stream)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(stream)
        }
        Ok(Err(e)) => {
            error!("[CONNECT] Failed to connect to {}: {}", target, e);
            Err(AmiError::ConnectionFailed)
        }
        Err(_) => {
            error!(
                "[CONNECT] TCP connect to {} timed out after {}ms",
                target,
                budget.as_millis()
            );
            Err(AmiError::ConnectionFailed)
        }
    }
}

/// Log in on a freshly dialed stream.
///
/// Sends `Action: Login` and waits up to ten seconds for a frame that either
/// accepts (`Response: Success` or `Message: Authentication accepted`) or
/// rejects (`Response: Error`) the login. Anything else is ignored. Bytes
/// read past the reply stay in `decoder` for the reader task.
async fn authenticate<S>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    settings: &AmiSettings,
    metrics: &AmiMetrics,
) -> AmiResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let login = Frame::action(ACTION_LOGIN)
        .with_field(AmiHeader::Username, settings.username.as_str())
        .with_field(AmiHeader::Secret, settings.password.as_str());

    debug!("[AUTH] Sending Login for user {}", settings.username);
    write_frame(stream, &login).await?;
    metrics.store_sent_message();

    match timeout(
        Duration::from_millis(AUTH_TIMEOUT_MS),
        await_login_reply(stream, decoder, settings.read_timeout()),
    )
    .await
    {
        Ok(Ok(())) => {
            info!("[AUTH] Authentication accepted, user {}", settings.username);
            Ok(())
        }
        Ok(Err(e)) => {
            warn!("[AUTH] Login failed: {}", e);
            Err(e)
        }
        Err(_) => {
            warn!("[AUTH] No login reply within {}ms", AUTH_TIMEOUT_MS);
            Err(AmiError::AuthTimeout)
        }
    }
}

async fn await_login_reply<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    read_timeout: Option<Duration>,
) -> AmiResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    loop {
        let frame = match recv_frame(reader, decoder, &mut read_buffer, read_timeout).await {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => continue,
            Err(e) => return Err(e),
        };

        if frame.is_empty() {
            continue;
        }
        if frame.is_auth_success() {
            return Ok(());
        }
        if frame.is_error_response() {
            return Err(AmiError::auth_failed(
                frame
                    .message()
                    .unwrap_or_default(),
            ));
        }
        info!("[AUTH] Ignoring frame while waiting for login reply: {:?}", frame);
    }
}

/// Read half waiting for [`AmiClient::start_reader`].
struct ParkedReader {
    read_half: OwnedReadHalf,
    decoder: FrameDecoder,
    status_tx: watch::Sender<ConnectionState>,
}

/// Write half shared with the reader, which takes it when it exits.
type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Asterisk Manager Interface client.
///
/// Owns the socket's write half (shared with the background reader, which
/// closes the socket when it exits) and the channels fed by that reader.
/// Commands are written with [`send_command`](Self::send_command); whatever
/// the server sends arrives on the [`MessageStream`] returned by
/// [`take_messages`](Self::take_messages), and the reader's first fatal
/// error on [`take_errors`](Self::take_errors). There is no reconnect and
/// no reply correlation: match responses by `ActionID` yourself.
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{AmiClient, AmiSettings, Frame};
/// use tokio::sync::watch;
///
/// # async fn example() -> Result<(), asterisk_ami_tokio::AmiError> {
/// let (_shutdown_tx, shutdown) = watch::channel(false);
/// let mut client = AmiClient::new(AmiSettings::new("127.0.0.1", 5038, "admin", "secret"))?;
/// client.connect(shutdown, true).await?;
///
/// let mut messages = client.take_messages().expect("first take");
/// client.send_command(&Frame::action("Ping").with_field("ActionID", "1")).await?;
///
/// while let Some(frame) = messages.recv().await {
///     if frame.action_id() == Some("1") {
///         println!("pong: {:?}", frame);
///         break;
///     }
/// }
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct AmiClient {
    settings: AmiSettings,
    metrics: AmiMetrics,
    state: ConnectionState,
    writer: Option<SharedWriter>,
    /// Flips to `Disconnected` when the reader of this connection exits.
    status_rx: Option<watch::Receiver<ConnectionState>>,
    /// Read half waiting for `start_reader` when `connect` was told not to spawn it.
    parked_reader: Option<ParkedReader>,
    /// Stop signal of the running reader; replaced per connection.
    reader_stop: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    message_tx: Option<mpsc::Sender<Frame>>,
    message_rx: Option<mpsc::Receiver<Frame>>,
    error_tx: Option<mpsc::Sender<AmiError>>,
    error_rx: Option<mpsc::Receiver<AmiError>>,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl AmiClient {
    /// Build an idle client. No network activity happens until [`connect`](Self::connect).
    ///
    /// Fails only if the metrics sink cannot be built.
    pub fn new(settings: AmiSettings) -> AmiResult<Self> {
        let metrics = AmiMetrics::new(&settings.service_name)?;
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_QUEUE_SIZE);
        let (error_tx, error_rx) = mpsc::channel(ERROR_QUEUE_SIZE);

        Ok(Self {
            settings,
            metrics,
            state: ConnectionState::Idle,
            writer: None,
            status_rx: None,
            parked_reader: None,
            reader_stop: None,
            local_addr: None,
            remote_addr: None,
            message_tx: Some(message_tx),
            message_rx: Some(message_rx),
            error_tx: Some(error_tx),
            error_rx: Some(error_rx),
        })
    }

    /// Dial, log in and optionally start the reader.
    ///
    /// Any previous connection is dropped first. `shutdown` is the caller's
    /// cancellation scope: it aborts the dial while it is in flight, and is
    /// handed to the reader, which exits once it reads `true`. The login
    /// handshake has its own ten-second budget.
    ///
    /// Returns [`AmiError::ClientDisabled`] without touching the network when
    /// the settings disable the client.
    pub async fn connect(
        &mut self,
        shutdown: watch::Receiver<bool>,
        start_reader: bool,
    ) -> AmiResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(AmiError::ClientClosed);
        }

        self.close_connection();

        if self.disabled() {
            info!("[CONNECT] AMI client disabled by settings, skipping connect");
            return Err(AmiError::ClientDisabled);
        }

        let result = self
            .connect_inner(shutdown, start_reader)
            .await;
        if result.is_err() {
            self.close_connection();
            self.state = ConnectionState::Idle;
        }
        result
    }

    async fn connect_inner(
        &mut self,
        shutdown: watch::Receiver<bool>,
        start_reader: bool,
    ) -> AmiResult<()> {
        self.state = ConnectionState::Dialing;
        let mut stream = self
            .open_connection(shutdown.clone())
            .await?;

        self.state = ConnectionState::Authenticating;
        let mut decoder = FrameDecoder::new();
        authenticate(&mut stream, &mut decoder, &self.settings, &self.metrics).await?;

        self.local_addr = stream
            .local_addr()
            .ok();
        self.remote_addr = stream
            .peer_addr()
            .ok();

        let (read_half, write_half) = stream.into_split();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Connected);
        self.writer = Some(Arc::new(Mutex::new(Some(write_half))));
        self.status_rx = Some(status_rx);
        self.parked_reader = Some(ParkedReader {
            read_half,
            decoder,
            status_tx,
        });
        self.state = ConnectionState::Connected;

        info!(
            "[CONNECT] Client {} connected to {}",
            display_addr(self.local_addr),
            display_addr(self.remote_addr)
        );

        if start_reader {
            self.start_reader(shutdown)?;
            tokio::time::sleep(Duration::from_millis(READER_SETTLE_MS)).await;
        }

        Ok(())
    }

    /// Establish a TCP connection within the configured timeout.
    async fn open_connection(&self, mut shutdown: watch::Receiver<bool>) -> AmiResult<TcpStream> {
        self.metrics
            .store_connection_attempt();

        let budget = self
            .settings
            .connection_timeout();
        let host = self
            .settings
            .host
            .as_str();
        let port = self.settings.port;
        let target = format!("{}:{}", host, port);
        info!("[CONNECT] Connecting to Asterisk at {}", target);

        dial_with_timeout(
            TcpStream::connect((host, port)),
            budget,
            &mut shutdown,
            &target,
        )
        .await
    }

    /// Spawn the background reader on the current connection.
    ///
    /// Only needed when [`connect`](Self::connect) was called with
    /// `start_reader = false`. Fails with [`AmiError::NotConnected`] if there
    /// is no connection or its reader is already running.
    pub fn start_reader(&mut self, shutdown: watch::Receiver<bool>) -> AmiResult<()> {
        let (message_tx, error_tx) = match (&self.message_tx, &self.error_tx) {
            (Some(m), Some(e)) => (m.clone(), e.clone()),
            _ => return Err(AmiError::ClientClosed),
        };
        let writer = self
            .writer
            .clone()
            .ok_or(AmiError::NotConnected)?;
        let parked = self
            .parked_reader
            .take()
            .ok_or(AmiError::NotConnected)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.reader_stop = Some(stop_tx);

        let ctx = ReaderContext {
            message_tx,
            error_tx,
            stop_rx,
            shutdown_rx: shutdown,
            writer,
            status_tx: parked.status_tx,
            metrics: self
                .metrics
                .clone(),
            read_timeout: self
                .settings
                .read_timeout(),
        };
        tokio::spawn(reader_loop(parked.read_half, parked.decoder, ctx));
        debug!("[CONNECT] Reader task started");
        Ok(())
    }

    /// Write one command frame.
    ///
    /// The whole frame goes out in one write under a one-second deadline; a
    /// short write is reported as [`AmiError::PartialWrite`]. Fails with
    /// [`AmiError::NotConnected`] once the reader has exited and closed the
    /// socket.
    pub async fn send_command(&mut self, command: &Frame) -> AmiResult<()> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }
        let shared = self
            .writer
            .as_ref()
            .ok_or(AmiError::NotConnected)?;
        let mut guard = shared
            .lock()
            .await;
        let writer = guard
            .as_mut()
            .ok_or(AmiError::NotConnected)?;

        debug!("[SEND] {:?}", command);
        write_frame(writer, command).await?;
        drop(guard);
        self.metrics
            .store_sent_message();
        Ok(())
    }

    /// Tear down the connection and close the channels.
    ///
    /// Safe to call more than once. Receivers already handed out observe
    /// closure once the reader has exited.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Closed {
            debug!("[DISCONNECT] Client already closed, ignoring");
            return;
        }

        self.close_connection();
        self.message_tx = None;
        self.error_tx = None;
        self.state = ConnectionState::Closed;

        info!(
            "[DISCONNECT] AMI client disconnected from {}",
            display_addr(self.remote_addr)
        );
    }

    /// Drop the socket and stop its reader, keeping the channels.
    fn close_connection(&mut self) {
        if let Some(stop_tx) = self
            .reader_stop
            .take()
        {
            let _ = stop_tx.send(true);
        }
        if let Some(shared) = self
            .writer
            .take()
        {
            // A held lock means the reader is already closing the socket.
            if let Ok(mut writer) = shared.try_lock() {
                writer.take();
            }
            debug!(
                "[CONNECT] Closed previous connection to {}",
                display_addr(self.remote_addr)
            );
        }
        self.parked_reader = None;
        self.status_rx = None;
    }

    /// Take the incoming frame stream. Returns `None` after the first call.
    pub fn take_messages(&mut self) -> Option<MessageStream> {
        self.message_rx
            .take()
            .map(MessageStream::new)
    }

    /// Take the receiver of the reader's fatal error. Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<AmiError>> {
        self.error_rx
            .take()
    }

    /// Whether the settings disable this client.
    pub fn disabled(&self) -> bool {
        self.settings.disabled
    }

    /// Current lifecycle state.
    ///
    /// A connected client reports [`ConnectionState::Disconnected`] once its
    /// reader has exited.
    pub fn state(&self) -> ConnectionState {
        match (self.state, &self.status_rx) {
            (ConnectionState::Connected, Some(status)) => *status.borrow(),
            (state, _) => state,
        }
    }

    /// Authenticated and holding an open socket.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self
                .writer
                .is_some()
    }

    /// Address of the Asterisk server, once connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Local socket address, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Counters for registration with a prometheus registry.
    pub fn metrics(&self) -> &AmiMetrics {
        &self.metrics
    }

    /// Settings this client was built with.
    pub fn settings(&self) -> &AmiSettings {
        &self.settings
    }
}

fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|| "?".to_string())
}
