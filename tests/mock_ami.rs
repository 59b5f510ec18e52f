//! Integration tests against an in-process mock AMI server.

use asterisk_ami_tokio::{
    logging::init_test_logging, AmiClient, AmiError, AmiSettings, ConnectionState, Frame,
    FrameDecoder,
};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const BANNER: &[u8] = b"Asterisk Call Manager/5.0.1\r\n";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum LoginReply {
    Accept,
    Reject,
}

/// What the mock server saw, one entry per received frame.
type Seen = mpsc::UnboundedReceiver<Frame>;

/// One entry per session that read EOF from the client.
type Closed = mpsc::UnboundedReceiver<()>;

/// Accepts connections forever. Each session answers the login, then on
/// `Action: GiveMeTest` sends `Count` (default 4) events, and on
/// `Action: Hangup` closes the socket.
async fn start_server(reply: LoginReply) -> (SocketAddr, Seen) {
    let (addr, seen, _closed) = start_server_watching_close(reply).await;
    (addr, seen)
}

async fn start_server_watching_close(reply: LoginReply) -> (SocketAddr, Seen, Closed) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener
        .local_addr()
        .unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::spawn(serve(socket, reply, seen_tx.clone(), closed_tx.clone()));
        }
    });

    (addr, seen_rx, closed_rx)
}

async fn serve(
    mut socket: TcpStream,
    reply: LoginReply,
    seen: mpsc::UnboundedSender<Frame>,
    closed: mpsc::UnboundedSender<()>,
) {
    let _ = socket
        .write_all(BANNER)
        .await;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut logged_in = false;

    loop {
        while let Some(frame) = decoder.decode() {
            if frame.is_empty() {
                continue;
            }
            let _ = seen.send(frame.clone());

            match frame.action_name() {
                Some("Login") if !logged_in => {
                    let answer: &[u8] = match reply {
                        LoginReply::Accept => {
                            b"Response: Success\r\nMessage: Authentication accepted\r\n\r\n"
                        }
                        LoginReply::Reject => {
                            b"Response: Error\r\nMessage: Authentication failed\r\n\r\n"
                        }
                    };
                    if socket
                        .write_all(answer)
                        .await
                        .is_err()
                    {
                        return;
                    }
                    logged_in = matches!(reply, LoginReply::Accept);
                }
                Some("GiveMeTest") => {
                    let count: usize = frame
                        .field("Count")
                        .and_then(|c| c.parse().ok())
                        .unwrap_or(4);
                    let mut out = Vec::new();
                    for i in 0..count {
                        out.extend_from_slice(
                            format!("Event: TestEvent\r\nSeq: {}\r\n\r\n", i).as_bytes(),
                        );
                    }
                    if socket
                        .write_all(&out)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some("Hangup") => return,
                _ => {}
            }
        }

        match socket.read(&mut buf).await {
            Ok(0) => {
                let _ = closed.send(());
                return;
            }
            Err(_) => return,
            Ok(n) => {
                if decoder
                    .add_data(&buf[..n])
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

fn settings(addr: SocketAddr) -> AmiSettings {
    let mut settings = AmiSettings::new(addr.ip().to_string(), addr.port(), "test", "test");
    settings.connection_timeout_ms = 2_000;
    settings
}

async fn next_seen(seen: &mut Seen) -> Frame {
    timeout(WAIT, seen.recv())
        .await
        .expect("server saw nothing")
        .expect("server gone")
}

#[tokio::test]
async fn connect_send_and_receive_events() {
    init_test_logging();
    let (addr, mut seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());
    assert_eq!(client.remote_addr(), Some(addr));
    assert!(client
        .local_addr()
        .is_some());

    let login = next_seen(&mut seen).await;
    assert_eq!(
        login,
        [("Action", "Login"), ("Username", "test"), ("Secret", "test")]
            .into_iter()
            .collect::<Frame>()
    );

    let mut messages = client
        .take_messages()
        .unwrap();
    client
        .send_command(&Frame::action("GiveMeTest"))
        .await
        .unwrap();

    for expected in 0..4 {
        let frame = timeout(WAIT, messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.event(), Some("TestEvent"));
        assert_eq!(frame.field("Seq"), Some(expected.to_string().as_str()));
    }

    let metrics = client.metrics();
    assert_eq!(metrics.connection_attempts(), 1);
    // Login plus GiveMeTest.
    assert_eq!(metrics.messages_sent(), 2);
    assert_eq!(metrics.messages_received(), 4);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn login_rejected_surfaces_server_message() {
    let (addr, _seen) = start_server(LoginReply::Reject).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    let err = client
        .connect(shutdown, true)
        .await
        .unwrap_err();
    match err {
        AmiError::AuthFailed { message } => assert_eq!(message, "Authentication failed"),
        other => panic!("expected AuthFailed, got {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn dial_failure_is_connection_failed() {
    // Grab a free port, then close it so nothing is listening.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener
        .local_addr()
        .unwrap();
    drop(listener);

    let (_shutdown_tx, shutdown) = watch::channel(false);
    let mut client = AmiClient::new(settings(addr)).unwrap();
    let err = client
        .connect(shutdown, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::ConnectionFailed));
    assert_eq!(client.metrics().connection_attempts(), 1);
}

#[tokio::test]
async fn cancelled_scope_aborts_dial() {
    let (addr, _seen) = start_server(LoginReply::Accept).await;
    let (shutdown_tx, shutdown) = watch::channel(false);
    shutdown_tx
        .send(true)
        .unwrap();

    let mut client = AmiClient::new(settings(addr)).unwrap();
    let err = client
        .connect(shutdown, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::ConnectionFailed));
}

#[tokio::test]
async fn disabled_client_does_not_dial() {
    let (addr, mut seen) = start_server(LoginReply::Accept).await;
    let mut settings = settings(addr);
    settings.disabled = true;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings).unwrap();
    let err = client
        .connect(shutdown, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::ClientDisabled));
    assert_eq!(client.metrics().connection_attempts(), 0);
    assert!(timeout(Duration::from_millis(200), seen.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn server_close_delivers_exactly_one_error() {
    let (addr, _seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    let mut errors = client
        .take_errors()
        .unwrap();

    client
        .send_command(&Frame::action("Hangup"))
        .await
        .unwrap();

    let err = timeout(WAIT, errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!err.is_transient());
    assert!(matches!(err, AmiError::ConnectionClosed | AmiError::Io(_)));
    // The reader closed the socket before reporting.
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client
            .send_command(&Frame::action("Ping"))
            .await,
        Err(AmiError::NotConnected)
    ));
    assert!(timeout(Duration::from_millis(200), errors.recv())
        .await
        .is_err());

    client.disconnect();
    assert!(timeout(WAIT, errors.recv())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn disconnect_closes_message_stream() {
    let (addr, _seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    let mut messages = client
        .take_messages()
        .unwrap();

    client.disconnect();
    client.disconnect();

    assert!(timeout(WAIT, messages.recv())
        .await
        .unwrap()
        .is_none());
    assert!(matches!(
        client
            .send_command(&Frame::action("Ping"))
            .await,
        Err(AmiError::NotConnected)
    ));
}

#[tokio::test]
async fn reader_started_later() {
    let (addr, _seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown.clone(), false)
        .await
        .unwrap();
    let mut messages = client
        .take_messages()
        .unwrap();

    client
        .send_command(&Frame::action("GiveMeTest").with_field("Count", "2"))
        .await
        .unwrap();
    // Nothing is read until the reader runs.
    assert!(timeout(Duration::from_millis(100), messages.recv())
        .await
        .is_err());

    client
        .start_reader(shutdown.clone())
        .unwrap();
    assert!(matches!(
        client.start_reader(shutdown),
        Err(AmiError::NotConnected)
    ));

    let seqs: Vec<String> = messages
        .by_ref()
        .take(2)
        .map(|f| {
            f.field("Seq")
                .unwrap_or_default()
                .to_string()
        })
        .collect()
        .await;
    assert_eq!(seqs, vec!["0", "1"]);
}

#[tokio::test]
async fn reconnect_replaces_connection() {
    let (addr, mut seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown.clone(), true)
        .await
        .unwrap();
    next_seen(&mut seen).await;

    client
        .connect(shutdown, true)
        .await
        .unwrap();
    assert_eq!(next_seen(&mut seen).await.action_name(), Some("Login"));
    assert_eq!(client.metrics().connection_attempts(), 2);

    let mut messages = client
        .take_messages()
        .unwrap();
    client
        .send_command(&Frame::action("GiveMeTest").with_field("Count", "1"))
        .await
        .unwrap();
    let frame = timeout(WAIT, messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.field("Seq"), Some("0"));
}

#[tokio::test]
async fn caller_shutdown_stops_reader_and_closes_socket() {
    let (addr, _seen, mut closed) = start_server_watching_close(LoginReply::Accept).await;
    let (shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    let mut errors = client
        .take_errors()
        .unwrap();
    assert!(client.is_connected());

    shutdown_tx
        .send(true)
        .unwrap();

    // The server reads EOF: the socket is closed, not just the read side.
    timeout(WAIT, closed.recv())
        .await
        .expect("server never saw EOF")
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());
    assert!(matches!(
        client
            .send_command(&Frame::action("GiveMeTest"))
            .await,
        Err(AmiError::NotConnected)
    ));
    // Cancellation is not an error.
    assert!(errors
        .try_recv()
        .is_err());
    assert_eq!(client.metrics().messages_sent(), 1);
}

#[tokio::test]
async fn reconnect_after_reader_exit() {
    let (addr, _seen, mut closed) = start_server_watching_close(LoginReply::Accept).await;
    let (shutdown_tx, shutdown) = watch::channel(false);

    let mut client = AmiClient::new(settings(addr)).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    shutdown_tx
        .send(true)
        .unwrap();
    timeout(WAIT, closed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let (_shutdown_tx, shutdown) = watch::channel(false);
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    let mut messages = client
        .take_messages()
        .unwrap();
    client
        .send_command(&Frame::action("GiveMeTest").with_field("Count", "1"))
        .await
        .unwrap();
    let frame = timeout(WAIT, messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.event(), Some("TestEvent"));
}

#[tokio::test]
async fn slow_consumer_keeps_order_past_queue_capacity() {
    let (addr, _seen) = start_server(LoginReply::Accept).await;
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut settings = settings(addr);
    settings.read_timeout_ms = 50;
    let mut client = AmiClient::new(settings).unwrap();
    client
        .connect(shutdown, true)
        .await
        .unwrap();
    let mut messages = client
        .take_messages()
        .unwrap();

    client
        .send_command(&Frame::action("GiveMeTest").with_field("Count", "250"))
        .await
        .unwrap();

    // Let the queue fill and the reader block before draining.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for expected in 0..250 {
        let frame = timeout(WAIT, messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.field("Seq"), Some(expected.to_string().as_str()));
    }

    // Idle reads hit the deadline and are retried, not reported.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut errors = client
        .take_errors()
        .unwrap();
    assert!(errors
        .try_recv()
        .is_err());
}
