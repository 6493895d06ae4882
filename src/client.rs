//! The client connection: owns the transport, drives the channel-0
//! handshake, and spawns the background tasks (write pump, read pump,
//! heartbeat watchdog) that keep the connection and channel engines
//! fed with frames.
//!
//! Transport ownership is generic over any `AsyncRead + AsyncWrite`
//! type so a caller can hand in a TLS-wrapped stream; this crate only
//! establishes the plain TCP case itself (see `connect`), matching the
//! teacher's own `TransportBuilder::connect`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::auth::{Authenticator, PlainAuthenticator};
use crate::channel::Channel;
use crate::connection::{self, reply_codes, ClientConfig, ConnectionState};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{read_frame, write_frame, Frame};
use crate::spec_tables::{class, connection as conn_method};
use crate::url::ConnectionUrl;

const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0x00, 0x00, 0x09, 0x01];
const HANDSHAKE_READ_CHUNK: usize = 4096;
const READ_PUMP_CHUNK: usize = 8192;

struct ConnectionInner {
    state: ConnectionState,
    channels: HashMap<u16, Channel>,
    next_channel_id: u16,
    max_channel_id: u16,
    close_tracker: Option<oneshot::Sender<AmqpResult<()>>>,
}

/// A connected, handshaken client. Channels opened from it share this
/// connection's single outbound frame queue and read pump.
pub struct Client {
    inner: Arc<Mutex<ConnectionInner>>,
    outbound: mpsc::UnboundedSender<Frame>,
    max_frame_size: u32,
    write_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect over plain TCP and authenticate with the URL's
    /// credentials via `PLAIN`.
    pub async fn connect(url: &ConnectionUrl, config: ClientConfig) -> AmqpResult<Self> {
        let authenticator = PlainAuthenticator::new(url.username.clone(), url.password.clone());
        Self::connect_with(url, config, &authenticator).await
    }

    /// Connect over plain TCP with a caller-supplied authenticator
    /// (e.g. `AmqplainAuthenticator`, or a custom SASL mechanism).
    pub async fn connect_with(url: &ConnectionUrl, mut config: ClientConfig, authenticator: &dyn Authenticator) -> AmqpResult<Self> {
        if url.tls {
            return Err(AmqpError::invalid_argument(
                "amqps:// requires a pre-established TLS stream; use Client::connect_stream",
            ));
        }
        config.vhost = url.vhost.clone();
        let addr = format!("{}:{}", url.host, url.port);
        let stream = tokio::time::timeout(config.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmqpError::timeout(format!("connecting to {}", addr)))??;
        let _ = stream.set_nodelay(true);
        Self::connect_stream(stream, config, authenticator).await
    }

    /// Run the handshake over an already-established stream. This is
    /// the escape hatch for TLS (or any other transport): wrap a
    /// `TcpStream` with a TLS connector and pass the result in here.
    pub async fn connect_stream<S>(stream: S, config: ClientConfig, authenticator: &dyn Authenticator) -> AmqpResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut read_half, mut write_half) = split(stream);
        write_half.write_all(&PROTOCOL_HEADER).await?;
        write_half.flush().await?;
        log::debug!("sent protocol header, awaiting Connection.Start");

        let mut read_buf = BytesMut::new();
        let initial_cap = config.max_frame_size_bytes;

        let mut start_args = match read_handshake_frame(&mut read_half, &mut read_buf, initial_cap).await? {
            Frame::Method { class_id, method_id, arguments, .. } if class_id == class::CONNECTION && method_id == conn_method::START => arguments,
            other => return Err(AmqpError::protocol(format!("expected Connection.Start, got {:?}", other))),
        };
        let mechanisms = connection::decode_start_mechanisms(&mut start_args)?;
        if !mechanisms.iter().any(|m| m == authenticator.mechanism_name()) {
            return Err(AmqpError::protocol(format!(
                "server offered {:?}, none matching authenticator mechanism {}",
                mechanisms,
                authenticator.mechanism_name()
            )));
        }
        log::debug!("negotiated SASL mechanism {}", authenticator.mechanism_name());

        let response = authenticator.response_bytes(&[]);
        let start_ok = connection::build_start_ok(&config, authenticator.mechanism_name(), &response, &config.locale)?;
        write_frame_now(&mut write_half, initial_cap, &start_ok).await?;

        let mut tune_args = match read_handshake_frame(&mut read_half, &mut read_buf, initial_cap).await? {
            Frame::Method { class_id, method_id, arguments, .. } if class_id == class::CONNECTION && method_id == conn_method::TUNE => arguments,
            other => return Err(AmqpError::protocol(format!("expected Connection.Tune, got {:?}", other))),
        };
        let (server_channel_max, server_frame_max, server_heartbeat) = connection::decode_tune(&mut tune_args)?;
        let tune = connection::negotiate_tune(server_channel_max, server_frame_max, server_heartbeat, &config);
        log::debug!(
            "negotiated tune: channel_max={} frame_max={} heartbeat_seconds={}",
            tune.channel_max,
            tune.frame_max,
            tune.heartbeat_seconds
        );

        let tune_ok = connection::build_tune_ok(tune)?;
        write_frame_now(&mut write_half, tune.frame_max, &tune_ok).await?;

        let open = connection::build_open(&config.vhost)?;
        write_frame_now(&mut write_half, tune.frame_max, &open).await?;

        match read_handshake_frame(&mut read_half, &mut read_buf, tune.frame_max).await? {
            Frame::Method { class_id, method_id, .. } if class_id == class::CONNECTION && method_id == conn_method::OPEN_OK => {}
            other => return Err(AmqpError::protocol(format!("expected Connection.OpenOk, got {:?}", other))),
        }
        log::debug!("connection opened on vhost '{}'", config.vhost);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(ConnectionInner {
            state: ConnectionState::Opened,
            channels: HashMap::new(),
            next_channel_id: 1,
            max_channel_id: tune.channel_max,
            close_tracker: None,
        }));

        let write_task = tokio::spawn(write_pump(write_half, outbound_rx, tune.frame_max));

        let last_traffic = Arc::new(Mutex::new(Instant::now()));
        let read_task = tokio::spawn(read_pump(
            read_half,
            read_buf,
            inner.clone(),
            outbound_tx.clone(),
            tune.frame_max,
            last_traffic.clone(),
        ));

        let heartbeat_task = if tune.heartbeat_seconds > 0 {
            Some(tokio::spawn(heartbeat_watchdog(
                inner.clone(),
                outbound_tx.clone(),
                last_traffic,
                tune.heartbeat_seconds,
            )))
        } else {
            None
        };

        Ok(Client { inner, outbound: outbound_tx, max_frame_size: tune.frame_max, write_task, read_task, heartbeat_task })
    }

    /// Open and return a new channel, allocating the next available ID.
    pub async fn channel_open(&self) -> AmqpResult<Channel> {
        let id = {
            let mut guard = self.inner.lock().await;
            if guard.state != ConnectionState::Opened {
                return Err(AmqpError::protocol("connection is not open"));
            }
            if guard.next_channel_id > guard.max_channel_id {
                return Err(AmqpError::invalid_argument("channel-max exhausted"));
            }
            let id = guard.next_channel_id;
            guard.next_channel_id += 1;
            id
        };

        let channel = Channel::new(id, self.outbound.clone(), self.max_frame_size);
        channel.open().await?;
        self.inner.lock().await.channels.insert(id, channel.clone());
        Ok(channel)
    }

    /// Close the connection gracefully, failing every in-flight
    /// channel future with the given reason.
    pub async fn close(&self, code: u16, reply_text: &str) -> AmqpResult<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.inner.lock().await;
            if guard.state == ConnectionState::Closed {
                return Ok(());
            }
            guard.state = ConnectionState::Closing;
            guard.close_tracker = Some(tx);
        }
        let frame = connection::build_close(code, reply_text)?;
        self.outbound.send(frame).map_err(|_| AmqpError::protocol("write pump is gone"))?;
        rx.await.map_err(|_| AmqpError::protocol("connection closed before CloseOk arrived"))??;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.write_task.abort();
        self.read_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }
    }
}

async fn read_handshake_frame<R: AsyncRead + Unpin>(read_half: &mut R, buf: &mut BytesMut, max_frame_size: u32) -> AmqpResult<Frame> {
    loop {
        if let Some(frame) = read_frame(buf, max_frame_size)? {
            return Ok(frame);
        }
        let mut chunk = [0u8; HANDSHAKE_READ_CHUNK];
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            return Err(AmqpError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "socket closed during handshake")));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_frame_now<W: AsyncWrite + Unpin>(write_half: &mut W, max_frame_size: u32, frame: &Frame) -> AmqpResult<()> {
    let mut buf = BytesMut::new();
    write_frame(&mut buf, max_frame_size, frame)?;
    write_half.write_all(&buf).await?;
    write_half.flush().await?;
    Ok(())
}

async fn write_pump<W>(mut write_half: WriteHalf<W>, mut outbound_rx: mpsc::UnboundedReceiver<Frame>, max_frame_size: u32)
where
    W: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut buf = BytesMut::new();
    while let Some(frame) = outbound_rx.recv().await {
        buf.clear();
        if let Err(e) = write_frame(&mut buf, max_frame_size, &frame) {
            log::warn!("dropping outbound frame that failed to encode: {}", e);
            continue;
        }
        if let Err(e) = write_half.write_all(&buf).await {
            log::warn!("write pump stopped: {}", e);
            return;
        }
        if let Err(e) = write_half.flush().await {
            log::warn!("write pump stopped: {}", e);
            return;
        }
    }
    log::debug!("write pump stopped: outbound queue closed");
}

async fn read_pump<R>(
    mut read_half: ReadHalf<R>,
    mut buf: BytesMut,
    inner: Arc<Mutex<ConnectionInner>>,
    outbound: mpsc::UnboundedSender<Frame>,
    max_frame_size: u32,
    last_traffic: Arc<Mutex<Instant>>,
) where
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut chunk = vec![0u8; READ_PUMP_CHUNK];
    loop {
        match read_frame(&mut buf, max_frame_size) {
            Ok(Some(frame)) => {
                *last_traffic.lock().await = Instant::now();
                if let Err(e) = dispatch_frame(&inner, &outbound, frame).await {
                    log::warn!("closing connection after dispatch error: {}", e);
                    teardown(&inner, e).await;
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("frame codec error, closing connection: {}", e);
                teardown(&inner, AmqpError::from(e)).await;
                return;
            }
        }

        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                log::debug!("peer closed the socket");
                teardown(&inner, AmqpError::connection_closed(0, "socket closed by peer")).await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::warn!("read pump I/O error: {}", e);
                teardown(&inner, AmqpError::Io(e)).await;
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn dispatch_frame(inner: &Arc<Mutex<ConnectionInner>>, outbound: &mpsc::UnboundedSender<Frame>, frame: Frame) -> AmqpResult<()> {
    let channel_id = frame.channel();
    if channel_id == 0 {
        return dispatch_connection_frame(inner, outbound, frame).await;
    }

    let channel = inner.lock().await.channels.get(&channel_id).cloned();
    let Some(channel) = channel else {
        log::debug!("frame for unknown channel {} dropped", channel_id);
        return Ok(());
    };
    match frame {
        Frame::Method { class_id, method_id, arguments, .. } => channel.handle_method(class_id, method_id, arguments).await,
        Frame::Header { content_size, properties, .. } => channel.handle_header(content_size, properties).await,
        Frame::Body { payload, .. } => channel.handle_body(payload).await,
        Frame::Heartbeat => Ok(()),
    }
}

async fn dispatch_connection_frame(inner: &Arc<Mutex<ConnectionInner>>, outbound: &mpsc::UnboundedSender<Frame>, frame: Frame) -> AmqpResult<()> {
    match frame {
        Frame::Method { class_id, method_id, mut arguments, .. } if class_id == class::CONNECTION && method_id == conn_method::CLOSE => {
            let (code, reply_text) = connection::decode_close_reason(&mut arguments)?;
            log::warn!("broker closed the connection: {} {}", code, reply_text);
            let _ = outbound.send(connection::build_close_ok());
            teardown(inner, AmqpError::connection_closed(code, reply_text)).await;
            Ok(())
        }
        Frame::Method { class_id, method_id, .. } if class_id == class::CONNECTION && method_id == conn_method::CLOSE_OK => {
            let mut guard = inner.lock().await;
            guard.state = ConnectionState::Closed;
            if let Some(tx) = guard.close_tracker.take() {
                let _ = tx.send(Ok(()));
            }
            Ok(())
        }
        Frame::Heartbeat => Ok(()),
        other => {
            log::debug!("dropping unexpected channel-0 frame {:?}", other);
            Ok(())
        }
    }
}

/// Send a heartbeat frame every `heartbeat_seconds/2` and close the
/// connection with code 500 if no inbound frame has been seen for
/// `2 * heartbeat_seconds`.
async fn heartbeat_watchdog(
    inner: Arc<Mutex<ConnectionInner>>,
    outbound: mpsc::UnboundedSender<Frame>,
    last_traffic: Arc<Mutex<Instant>>,
    heartbeat_seconds: u16,
) {
    let period = connection::heartbeat_period(heartbeat_seconds);
    let timeout = connection::heartbeat_timeout(heartbeat_seconds);
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if last_traffic.lock().await.elapsed() > timeout {
            log::warn!("no traffic for over {:?}, closing connection", timeout);
            let close = match connection::build_close(connection::MISSED_HEARTBEATS_CLOSE_CODE, "Missed heartbeats") {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("failed to build Connection.Close for missed heartbeats: {}", e);
                    return;
                }
            };
            let _ = outbound.send(close);
            teardown(&inner, AmqpError::connection_closed(connection::MISSED_HEARTBEATS_CLOSE_CODE, "Missed heartbeats")).await;
            return;
        }

        if outbound.send(Frame::Heartbeat).is_err() {
            log::debug!("heartbeat watchdog stopped: outbound queue closed");
            return;
        }
    }
}

/// Tear the connection down: mark it closed, fail every channel's
/// in-flight trackers, and wake a pending `close()` caller if there is
/// one. Shared by local close-completion, remote `Close`, and fatal
/// I/O/codec errors.
async fn teardown(inner: &Arc<Mutex<ConnectionInner>>, error: AmqpError) {
    let (channels, close_tracker) = {
        let mut guard = inner.lock().await;
        guard.state = ConnectionState::Closed;
        (std::mem::take(&mut guard.channels), guard.close_tracker.take())
    };
    let (code, reply_text) = match &error {
        AmqpError::ConnectionClosed { code, reply_text } => (*code, reply_text.clone()),
        other => (reply_codes::INTERNAL_ERROR, other.to_string()),
    };
    for channel in channels.into_values() {
        channel.fail_for_connection_close(code, &reply_text).await;
    }
    if let Some(tx) = close_tracker {
        let _ = tx.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// A minimal broker stub speaking just enough of the handshake to
    /// exercise `connect_stream` without a real server.
    async fn drive_minimal_handshake<S>(mut broker: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut header = [0u8; 8];
        broker.read_exact(&mut header).await.unwrap();
        assert_eq!(header, PROTOCOL_HEADER);

        let start = Frame::Method {
            channel: 0,
            class_id: class::CONNECTION,
            method_id: conn_method::START,
            arguments: {
                use crate::codec::{write_native_sequence, ArgKind};
                use crate::value::{FieldTable, FieldValue};
                let kinds = [ArgKind::Octet, ArgKind::Octet, ArgKind::Table, ArgKind::LongStr, ArgKind::LongStr];
                let values = [
                    FieldValue::ShortShortUInt(0),
                    FieldValue::ShortShortUInt(9),
                    FieldValue::Table(FieldTable::new()),
                    FieldValue::LongString(b"PLAIN".to_vec()),
                    FieldValue::LongString(b"en_US".to_vec()),
                ];
                let mut buf = BytesMut::new();
                write_native_sequence(&mut buf, &kinds, &values).unwrap();
                buf.freeze()
            },
        };
        let mut out = BytesMut::new();
        write_frame(&mut out, 131_072, &start).unwrap();
        broker.write_all(&out).await.unwrap();

        let mut buf = BytesMut::new();
        let _start_ok = read_handshake_frame(&mut broker, &mut buf, 131_072).await.unwrap();

        let tune = connection::build_tune_ok(connection::TuneParams { channel_max: 16, frame_max: 131_072, heartbeat_seconds: 0 }).unwrap();
        let tune_as_server = Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: conn_method::TUNE, arguments: match tune {
            Frame::Method { arguments, .. } => arguments,
            _ => unreachable!(),
        }};
        out.clear();
        write_frame(&mut out, 131_072, &tune_as_server).unwrap();
        broker.write_all(&out).await.unwrap();

        let _tune_ok = read_handshake_frame(&mut broker, &mut buf, 131_072).await.unwrap();
        let _open = read_handshake_frame(&mut broker, &mut buf, 131_072).await.unwrap();

        let open_ok = Frame::Method { channel: 0, class_id: class::CONNECTION, method_id: conn_method::OPEN_OK, arguments: bytes::Bytes::new() };
        out.clear();
        write_frame(&mut out, 131_072, &open_ok).unwrap();
        broker.write_all(&out).await.unwrap();

        use crate::spec_tables::channel as chan_method;
        let channel_open = read_handshake_frame(&mut broker, &mut buf, 131_072).await.unwrap();
        assert!(matches!(channel_open, Frame::Method { class_id, method_id, .. } if class_id == class::CHANNEL && method_id == chan_method::OPEN));
        let channel_open_ok = Frame::Method { channel: 1, class_id: class::CHANNEL, method_id: chan_method::OPEN_OK, arguments: bytes::Bytes::new() };
        out.clear();
        write_frame(&mut out, 131_072, &channel_open_ok).unwrap();
        broker.write_all(&out).await.unwrap();
    }

    #[tokio::test]
    async fn connect_stream_completes_handshake_against_a_stub_broker() {
        let (client_side, broker_side) = duplex(64 * 1024);
        let broker = tokio::spawn(drive_minimal_handshake(broker_side));

        let config = ClientConfig::builder().vhost("/").build();
        let authenticator = PlainAuthenticator::new("guest", "guest");
        let client = Client::connect_stream(client_side, config, &authenticator).await.unwrap();

        let channel = client.channel_open().await;
        assert!(channel.is_ok());
        broker.await.unwrap();
    }
}
