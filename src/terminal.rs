// Emergency terminal: the single owning task
// All state transitions (connection, SOS gesture, pending location sends) run inside
// Terminal::run; background work reports back through channels

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, ConnectionState, Inbound};
use crate::error::{ConnectionError, LocationError, TerminalError};
use crate::location::{Fix, LocationPlatform, LocationProvider, RequestToken};
use crate::models::{validate_content, DeliveryStatus, Message, MessageType};
use crate::observer::{ObserverId, Observers};
use crate::sos::{GestureEvent, GestureState, SosGesture};
use crate::transport::Transport;

pub const SOS_CONTENT: &str = "SOS ALERT: Emergency assistance needed immediately!";

/// What observers see
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    State(ConnectionState),
    /// Human-readable status line
    Status(String),
    Sent { message: Message, status: DeliveryStatus },
    Received(Message),
    /// Raised in addition to `Received` for EMERGENCY and SOS traffic
    Emergency(Message),
    /// Inbound line that did not decode, verbatim
    Raw(String),
    Location { latitude: f64, longitude: f64 },
    Sos(GestureState),
}

type Reply<T> = oneshot::Sender<Result<T, TerminalError>>;

enum Command {
    Connect { endpoint: Option<String>, reply: Reply<()> },
    Disconnect,
    SendText { content: String, reply: Reply<()> },
    SendEmergency { content: String, reply: Reply<()> },
    SosPress,
    SosRelease,
    Subscribe { reply: oneshot::Sender<(ObserverId, mpsc::UnboundedReceiver<TerminalEvent>)> },
    Unsubscribe(ObserverId),
    State { reply: oneshot::Sender<ConnectionState> },
    Shutdown,
}

/// A send waiting for its location fix
#[derive(Debug)]
struct PendingSend {
    message_type: MessageType,
    content: String,
}

pub struct Terminal {
    config: Config,
    connection: Connection,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    gesture: SosGesture,
    location: LocationProvider,
    location_tx: mpsc::UnboundedSender<(RequestToken, Result<Fix, LocationError>)>,
    location_rx: mpsc::UnboundedReceiver<(RequestToken, Result<Fix, LocationError>)>,
    pending: HashMap<RequestToken, PendingSend>,
    observers: Observers<TerminalEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Cloneable front-end for the owning task
#[derive(Clone)]
pub struct TerminalHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Terminal {
    /// Build the terminal and start its owning task on the current runtime
    pub fn spawn(
        config: Config,
        transport: Arc<dyn Transport>,
        platform: Arc<dyn LocationPlatform>,
    ) -> (TerminalHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (connection, connection_events) =
            Connection::new(transport, config.line_terminator, config.connect_timeout());
        let (location_tx, location_rx) = mpsc::unbounded_channel();

        let terminal = Terminal {
            gesture: SosGesture::new(config.sos_hold(), config.sos_cooldown()),
            location: LocationProvider::with_limits(platform, config.location_max_age(), config.location_timeout()),
            observers: Observers::new(config.event_backlog),
            config,
            connection,
            connection_events,
            location_tx,
            location_rx,
            pending: HashMap::new(),
            commands,
        };
        let task = tokio::spawn(terminal.run());
        (TerminalHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("Terminal task started");
        loop {
            let deadline = self.gesture.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.connection.next_link_event() => {
                    self.connection.handle_link_event(event);
                }
                Some(event) = self.connection_events.recv() => self.on_connection_event(event),
                Some((token, result)) = self.location_rx.recv() => self.on_location(token, result),
                _ = sleep_until_deadline(deadline) => self.poll_gesture(),
            }
        }
        self.connection.disconnect();
        info!("Terminal task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint, reply } => {
                let _ = reply.send(self.connect(endpoint));
            }
            Command::Disconnect => {
                if self.connection.state() != ConnectionState::Disconnected {
                    self.connection.disconnect();
                    self.publish(TerminalEvent::Status("Disconnected".to_string()));
                }
            }
            Command::SendText { content, reply } => {
                let mut message = Message::new(MessageType::Regular, content);
                if let Some(sender) = &self.config.sender_id {
                    message = message.with_sender(sender.clone());
                }
                let _ = reply.send(self.transmit(message).map_err(TerminalError::from));
            }
            Command::SendEmergency { content, reply } => {
                let result = if self.connection.is_connected() {
                    self.send_with_location(MessageType::Emergency, content);
                    Ok(())
                } else {
                    Err(ConnectionError::NotConnected.into())
                };
                let _ = reply.send(result);
            }
            Command::SosPress => {
                if let Some(event) = self.gesture.press(Instant::now()) {
                    self.on_gesture_event(event);
                }
            }
            Command::SosRelease => {
                if let Some(event) = self.gesture.release(Instant::now()) {
                    self.on_gesture_event(event);
                }
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.observers.subscribe());
            }
            Command::Unsubscribe(id) => {
                // detaching never touches the transport
                self.observers.unsubscribe(id);
            }
            Command::State { reply } => {
                let _ = reply.send(self.connection.state());
            }
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, endpoint: Option<String>) -> Result<(), TerminalError> {
        let endpoint = endpoint
            .or_else(|| self.config.endpoint.clone())
            .ok_or_else(|| ConnectionError::TransportConnect("no endpoint configured".to_string()))?;
        self.connection.connect(&endpoint)?;
        self.publish(TerminalEvent::Status(format!("Connecting to {}...", endpoint)));
        Ok(())
    }

    fn transmit(&mut self, message: Message) -> Result<(), ConnectionError> {
        self.connection.send_message(&message)?;
        debug!("Queued {} message {}", message.message_type(), message.id());
        self.publish(TerminalEvent::Sent { message, status: DeliveryStatus::Sent });
        Ok(())
    }

    fn send_with_location(&mut self, message_type: MessageType, content: String) {
        let tx = self.location_tx.clone();
        let token = self.location.get_current_location(move |token, result| {
            let _ = tx.send((token, result));
        });
        debug!("Waiting on location request {:?} for {}", token, message_type);
        self.pending.insert(token, PendingSend { message_type, content });
    }

    fn on_location(&mut self, token: RequestToken, result: Result<Fix, LocationError>) {
        let Some(pending) = self.pending.remove(&token) else {
            debug!("Dropping response for finished location request {:?}", token);
            return;
        };

        let label = match pending.message_type {
            MessageType::Sos => "SOS alert",
            _ => "Emergency",
        };
        let mut message = Message::new(pending.message_type, pending.content);
        if let Some(sender) = &self.config.sender_id {
            message = message.with_sender(sender.clone());
        }
        let location_error = match result {
            Ok(fix) => {
                message = message.with_location(fix.latitude, fix.longitude);
                self.publish(TerminalEvent::Location { latitude: fix.latitude, longitude: fix.longitude });
                None
            }
            Err(e) => Some(e),
        };

        match self.transmit(message) {
            Ok(()) => match location_error {
                Some(e) => self.publish(TerminalEvent::Status(format!("{} sent without GPS: {}", label, e))),
                None => self.publish(TerminalEvent::Status(format!("{} sent with GPS coordinates", label))),
            },
            Err(e) => {
                error!("{} could not be sent: {}", label, e);
                self.publish(TerminalEvent::Status(format!("{} not sent: {}", label, e)));
            }
        }
    }

    fn poll_gesture(&mut self) {
        if let Some(event) = self.gesture.poll(Instant::now()) {
            self.on_gesture_event(event);
        }
    }

    fn on_gesture_event(&mut self, event: GestureEvent) {
        self.publish(TerminalEvent::Sos(self.gesture.state()));
        if event == GestureEvent::Fired {
            warn!("SOS triggered");
            self.publish(TerminalEvent::Status("SOS ALERT ACTIVATED".to_string()));
            self.send_with_location(MessageType::Sos, SOS_CONTENT.to_string());
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.publish(TerminalEvent::State(state));
                if state == ConnectionState::Connected {
                    self.publish(TerminalEvent::Status("Connected to emergency device".to_string()));
                }
            }
            ConnectionEvent::ConnectFailed(e) => {
                self.publish(TerminalEvent::Status(format!("Connection failed: {}", e)));
            }
            ConnectionEvent::IoFailed(e) => {
                self.publish(TerminalEvent::Status(format!("Connection lost: {}", e)));
            }
            ConnectionEvent::Received(Inbound::Message(message)) => {
                info!("Received {} message", message.message_type());
                self.publish(TerminalEvent::Received(message.clone()));
                if message.is_emergency() {
                    warn!("Emergency message received: {}", message.content());
                    if message.has_location() {
                        self.publish(TerminalEvent::Location {
                            latitude: message.latitude(),
                            longitude: message.longitude(),
                        });
                    }
                    self.publish(TerminalEvent::Emergency(message));
                }
            }
            ConnectionEvent::Received(Inbound::Raw { line, .. }) => {
                self.publish(TerminalEvent::Raw(line));
            }
        }
    }

    fn publish(&mut self, event: TerminalEvent) {
        self.observers.publish(event);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl TerminalHandle {
    fn send(&self, command: Command) -> Result<(), TerminalError> {
        self.tx.send(command).map_err(|_| TerminalError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, TerminalError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| TerminalError::Closed)?
    }

    /// Start connecting; `None` uses the configured endpoint
    pub async fn connect(&self, endpoint: Option<&str>) -> Result<(), TerminalError> {
        let endpoint = endpoint.map(str::to_string);
        self.request(|reply| Command::Connect { endpoint, reply }).await
    }

    pub fn disconnect(&self) -> Result<(), TerminalError> {
        self.send(Command::Disconnect)
    }

    pub async fn send_text(&self, content: &str) -> Result<(), TerminalError> {
        validate_content(content)?;
        let content = content.to_string();
        self.request(|reply| Command::SendText { content, reply }).await
    }

    /// Queue an emergency message; it goes out once a location attempt settles
    pub async fn send_emergency(&self, content: &str) -> Result<(), TerminalError> {
        validate_content(content)?;
        let content = content.to_string();
        self.request(|reply| Command::SendEmergency { content, reply }).await
    }

    pub fn sos_press(&self) -> Result<(), TerminalError> {
        self.send(Command::SosPress)
    }

    pub fn sos_release(&self) -> Result<(), TerminalError> {
        self.send(Command::SosRelease)
    }

    pub async fn subscribe(&self) -> Result<(ObserverId, mpsc::UnboundedReceiver<TerminalEvent>), TerminalError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { reply })?;
        rx.await.map_err(|_| TerminalError::Closed)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> Result<(), TerminalError> {
        self.send(Command::Unsubscribe(id))
    }

    pub async fn state(&self) -> Result<ConnectionState, TerminalError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State { reply })?;
        rx.await.map_err(|_| TerminalError::Closed)
    }

    pub fn shutdown(&self) -> Result<(), TerminalError> {
        self.send(Command::Shutdown)
    }
}
