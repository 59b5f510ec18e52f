//! Background reader task and the socket read helpers it shares with the
//! login handshake.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{
    connection::ConnectionState,
    constants::SOCKET_BUF_SIZE,
    error::{AmiError, AmiResult},
    frame::Frame,
    metrics::AmiMetrics,
    protocol::FrameDecoder,
};

/// One socket read into the decoder, bounded by `read_timeout` when set.
///
/// An elapsed deadline surfaces as [`AmiError::Timeout`], which is transient;
/// EOF surfaces as [`AmiError::ConnectionClosed`].
async fn read_more<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    read_buffer: &mut [u8],
    read_timeout: Option<Duration>,
) -> AmiResult<()>
where
    R: AsyncRead + Unpin,
{
    let read_result = match read_timeout {
        Some(limit) => match timeout(limit, reader.read(read_buffer)).await {
            Ok(r) => r,
            Err(_) => {
                return Err(AmiError::Timeout {
                    timeout_ms: millis(limit),
                })
            }
        },
        None => {
            reader
                .read(read_buffer)
                .await
        }
    };

    match read_result {
        Ok(0) => Err(AmiError::ConnectionClosed),
        Ok(n) => {
            trace!("[RECV] Read {} bytes from socket", n);
            decoder.add_data(&read_buffer[..n])
        }
        Err(e) => Err(AmiError::Io(e)),
    }
}

/// Whole milliseconds in `limit`, saturating at `u64::MAX`.
fn millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

/// Read until the decoder yields a frame (possibly empty).
///
/// Cancel-safe: bytes are only moved into the decoder once a read completes.
pub(crate) async fn recv_frame<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    read_buffer: &mut [u8],
    read_timeout: Option<Duration>,
) -> AmiResult<Frame>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decoder.decode() {
            return Ok(frame);
        }
        read_more(reader, decoder, read_buffer, read_timeout).await?;
    }
}

/// Resolves once `rx` holds `true`.
///
/// A dropped sender counts as a stop when `closed_means_stop` is set (the
/// client's own signal); otherwise the wait never resolves (a caller scope
/// whose owner went away without cancelling).
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>, closed_means_stop: bool) {
    let closed = rx
        .wait_for(|stop| *stop)
        .await
        .is_err();
    if closed && !closed_means_stop {
        std::future::pending::<()>().await;
    }
}

/// Everything the reader task owns besides the read half.
pub(crate) struct ReaderContext<W> {
    pub(crate) message_tx: mpsc::Sender<Frame>,
    pub(crate) error_tx: mpsc::Sender<AmiError>,
    /// Client-owned stop signal for this connection.
    pub(crate) stop_rx: watch::Receiver<bool>,
    /// Caller-supplied cancellation scope.
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    /// Write half shared with the client; taken and shut down when the reader exits.
    pub(crate) writer: Arc<Mutex<Option<W>>>,
    /// Set to `Disconnected` when the reader exits.
    pub(crate) status_tx: watch::Sender<ConnectionState>,
    pub(crate) metrics: AmiMetrics,
    pub(crate) read_timeout: Option<Duration>,
}

/// Background reader loop.
///
/// Forwards every non-empty frame in wire order; blocks on a full message
/// queue. Read deadline expiries are retried. Never reconnects.
///
/// Whatever ends the loop (stop signal, caller cancellation, fatal error),
/// the socket is closed on the way out and the client sees `Disconnected`
/// before the fatal error, if any, is delivered.
pub(crate) async fn reader_loop<R, W>(
    reader: R,
    decoder: FrameDecoder,
    mut ctx: ReaderContext<W>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let fatal = pump(reader, decoder, &mut ctx).await;
    close_link(&ctx).await;
    if let Some(err) = fatal {
        deliver_error(&ctx.error_tx, err);
    }
}

/// Returns the fatal error that ended the loop, or `None` on a requested stop.
async fn pump<R, W>(
    mut reader: R,
    mut decoder: FrameDecoder,
    ctx: &mut ReaderContext<W>,
) -> Option<AmiError>
where
    R: AsyncRead + Unpin,
{
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

    loop {
        let stopped = *ctx
            .stop_rx
            .borrow()
            || *ctx
                .shutdown_rx
                .borrow();
        if stopped {
            debug!("[RECV] Stop requested, reader exiting");
            return None;
        }

        let result = tokio::select! {
            biased;
            _ = stop_requested(&mut ctx.stop_rx, true) => {
                debug!("[RECV] Client stop signal, reader exiting");
                return None;
            }
            _ = stop_requested(&mut ctx.shutdown_rx, false) => {
                debug!("[RECV] Caller cancelled, reader exiting");
                return None;
            }
            r = recv_frame(&mut reader, &mut decoder, &mut read_buffer, ctx.read_timeout) => r,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                trace!("[RECV] Read deadline elapsed, retrying");
                continue;
            }
            Err(e) => {
                warn!("[RECV] Read error, reader exiting: {}", e);
                return Some(e);
            }
        };

        ctx.metrics
            .store_received_message();

        if frame.is_empty() {
            trace!("[RECV] Dropping empty frame");
            continue;
        }

        trace!("[RECV] Frame: {:?}", frame);
        tokio::select! {
            biased;
            _ = stop_requested(&mut ctx.stop_rx, true) => {
                debug!("[RECV] Client stop signal while queue full, reader exiting");
                return None;
            }
            _ = stop_requested(&mut ctx.shutdown_rx, false) => {
                debug!("[RECV] Caller cancelled while queue full, reader exiting");
                return None;
            }
            sent = ctx.message_tx.send(frame) => {
                if sent.is_err() {
                    debug!("[RECV] Message channel closed, reader exiting");
                    return None;
                }
            }
        }
    }
}

/// Mark the connection down and shut the shared write half.
async fn close_link<W>(ctx: &ReaderContext<W>)
where
    W: AsyncWrite + Unpin,
{
    let _ = ctx
        .status_tx
        .send(ConnectionState::Disconnected);

    let writer = ctx
        .writer
        .lock()
        .await
        .take();
    if let Some(mut writer) = writer {
        if let Err(e) = writer
            .shutdown()
            .await
        {
            debug!("[DISCONNECT] Socket shutdown after reader exit: {}", e);
        }
        debug!("[DISCONNECT] Reader exited, socket closed");
    }
}

/// Hand the fatal error to the single-slot channel without ever blocking.
fn deliver_error(error_tx: &mpsc::Sender<AmiError>, err: AmiError) {
    match error_tx.try_send(err) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(e)) => {
            warn!("[RECV] Error slot already occupied, dropping: {}", e);
        }
        Err(mpsc::error::TrySendError::Closed(e)) => {
            debug!("[RECV] Error channel closed, dropping: {}", e);
        }
    }
}

/// Incoming frames from the reader task.
///
/// Yields `None` once the reader has exited and the client has been
/// disconnected (or dropped).
pub struct MessageStream {
    rx: mpsc::Receiver<Frame>,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("queued", &self.rx.len())
            .finish()
    }
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<Frame>) -> Self {
        Self { rx }
    }

    /// Receive the next frame, or `None` if the channel is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx
            .recv()
            .await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx
            .try_recv()
            .ok()
    }
}

impl futures_util::Stream for MessageStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
