// Connection management for the radio bridge
// Owns the transport link and its receive buffer; every transition runs on the owning task

use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{self, Frame, FrameBuffer, LineTerminator};
use crate::error::{ConnectionError, ParseError};
use crate::models::Message;
use crate::transport::{BoxedLink, Transport};

const READ_CHUNK: usize = 1024;

/// Lifecycle of the transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Completion posted by a background I/O task, tagged with the session that produced it
pub enum LinkEvent {
    Opened { session: u64, link: BoxedLink },
    OpenFailed { session: u64, reason: String },
    Data { session: u64, bytes: Vec<u8> },
    IoFailed { session: u64, reason: String },
}

impl LinkEvent {
    fn session(&self) -> u64 {
        match self {
            LinkEvent::Opened { session, .. }
            | LinkEvent::OpenFailed { session, .. }
            | LinkEvent::Data { session, .. }
            | LinkEvent::IoFailed { session, .. } => *session,
        }
    }
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Opened { session, .. } => write!(f, "Opened({})", session),
            LinkEvent::OpenFailed { session, reason } => write!(f, "OpenFailed({}, {})", session, reason),
            LinkEvent::Data { session, bytes } => write!(f, "Data({}, {} bytes)", session, bytes.len()),
            LinkEvent::IoFailed { session, reason } => write!(f, "IoFailed({}, {})", session, reason),
        }
    }
}

/// One decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    /// Line that failed to decode, kept verbatim for display
    Raw { line: String, error: ParseError },
}

/// Notifications emitted by the state machine to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    ConnectFailed(ConnectionError),
    IoFailed(ConnectionError),
    Received(Inbound),
}

struct Writer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

pub struct Connection {
    transport: Arc<dyn Transport>,
    terminator: LineTerminator,
    connect_timeout: Duration,
    state: ConnectionState,
    session: u64,
    buffer: FrameBuffer,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    open_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    writer: Option<Writer>,
}

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        terminator: LineTerminator,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let connection = Self {
            transport,
            terminator,
            connect_timeout,
            state: ConnectionState::Disconnected,
            session: 0,
            buffer: FrameBuffer::new(),
            link_tx,
            link_rx,
            event_tx,
            open_task: None,
            reader_task: None,
            writer: None,
        };
        (connection, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn terminator(&self) -> LineTerminator {
        self.terminator
    }

    /// Bytes of an incomplete line currently held in the receive buffer
    pub fn buffered_len(&self) -> usize {
        self.buffer.pending_len()
    }

    /// Start opening the transport. Completion arrives later as a [`LinkEvent`].
    pub fn connect(&mut self, endpoint: &str) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Ignoring connect to {} while {:?}", endpoint, self.state);
            return Err(ConnectionError::AlreadyActive(self.state));
        }

        self.session += 1;
        let session = self.session;
        info!("Connecting to {} (session {})", endpoint, session);
        self.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let link_tx = self.link_tx.clone();
        let endpoint = endpoint.to_string();
        let timeout = self.connect_timeout;
        self.open_task = Some(tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, transport.open(&endpoint)).await {
                Ok(Ok(link)) => LinkEvent::Opened { session, link },
                Ok(Err(e)) => LinkEvent::OpenFailed { session, reason: e.to_string() },
                Err(_) => LinkEvent::OpenFailed {
                    session,
                    reason: format!("timed out after {:?}", timeout),
                },
            };
            // Receiver is gone only when the connection itself was dropped
            let _ = link_tx.send(event);
        }));
        Ok(())
    }

    /// Close the transport if a session is active. Never reconnects.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("No active connection to disconnect");
            return;
        }
        info!("Disconnecting (session {})", self.session);
        self.release();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Queue raw bytes for the transport; rejected unless connected
    pub fn write(&mut self, bytes: Vec<u8>) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        let writer = self.writer.as_ref().ok_or(ConnectionError::NotConnected)?;
        writer
            .tx
            .send(bytes)
            .map_err(|_| ConnectionError::TransportIo("writer task has stopped".to_string()))
    }

    /// Encode and queue a message using the configured terminator
    pub fn send_message(&mut self, message: &Message) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        self.write(codec::encode(message, self.terminator))
    }

    /// Wait for the next background completion
    pub async fn next_link_event(&mut self) -> Option<LinkEvent> {
        self.link_rx.recv().await
    }

    /// Apply a background completion. Stale sessions are dropped.
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        if event.session() != self.session {
            debug!("Dropping {:?} from stale session (current {})", event, self.session);
            return;
        }

        match (self.state, event) {
            (ConnectionState::Connecting, LinkEvent::Opened { session, link }) => {
                self.open_task = None;
                self.buffer.clear();
                let (reader, writer) = tokio::io::split(link);
                let link_tx = self.link_tx.clone();
                self.reader_task = Some(tokio::spawn(read_loop(reader, session, link_tx)));
                let (tx, rx) = mpsc::unbounded_channel();
                let link_tx = self.link_tx.clone();
                let task = tokio::spawn(write_loop(writer, rx, session, link_tx));
                self.writer = Some(Writer { tx, task });
                info!("Connected (session {})", session);
                self.set_state(ConnectionState::Connected);
            }
            (ConnectionState::Connecting, LinkEvent::OpenFailed { reason, .. }) => {
                error!("Failed to open transport: {}", reason);
                self.release();
                self.set_state(ConnectionState::Disconnected);
                self.emit(ConnectionEvent::ConnectFailed(ConnectionError::TransportConnect(reason)));
            }
            (ConnectionState::Connected, LinkEvent::Data { bytes, .. }) => {
                for frame in self.buffer.push(&bytes) {
                    let inbound = match frame {
                        Frame::Line(line) => match codec::decode(&line) {
                            Ok(message) => Inbound::Message(message),
                            Err(error) => {
                                warn!("Undecodable line ({}): {}", error, line);
                                Inbound::Raw { line, error }
                            }
                        },
                        Frame::Overflow(line) => Inbound::Raw {
                            line,
                            error: ParseError::LineTooLong { limit: codec::MAX_PENDING_BYTES },
                        },
                    };
                    self.emit(ConnectionEvent::Received(inbound));
                }
            }
            (ConnectionState::Connected, LinkEvent::IoFailed { reason, .. }) => {
                error!("Connection lost: {}", reason);
                self.release();
                self.set_state(ConnectionState::Disconnected);
                self.emit(ConnectionEvent::IoFailed(ConnectionError::TransportIo(reason)));
            }
            (state, event) => {
                debug!("Ignoring {:?} while {:?}", event, state);
            }
        }
    }

    fn release(&mut self) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.task.abort();
        }
        self.buffer.clear();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(ConnectionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Connection event receiver dropped");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

async fn read_loop(mut reader: ReadHalf<BoxedLink>, session: u64, link_tx: mpsc::UnboundedSender<LinkEvent>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = link_tx.send(LinkEvent::IoFailed {
                    session,
                    reason: "stream closed by peer".to_string(),
                });
                break;
            }
            Ok(n) => {
                if link_tx.send(LinkEvent::Data { session, bytes: buf[..n].to_vec() }).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = link_tx.send(LinkEvent::IoFailed { session, reason: e.to_string() });
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedLink>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    session: u64,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(bytes) = rx.recv().await {
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            let _ = link_tx.send(LinkEvent::IoFailed { session, reason: e.to_string() });
            return;
        }
    }
    let _ = writer.shutdown().await;
}
