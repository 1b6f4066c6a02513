//! Device link: exactly one logical connection to one device.
//!
//! Each link runs as its own Tokio task that owns every piece of link state:
//! the open channel, the connection state, the pending-ack table and the
//! reconnect counter.  The rest of the program talks to it through a cheap,
//! cloneable [`LinkHandle`] and hears from it through [`LinkEvent`]s on the
//! registry's event channel.  Nothing outside the task mutates link state.
//!
//! # State machine
//!
//! ```text
//!   disconnected ──connect()──▶ connecting ──opened──▶ connected
//!        ▲                          │                     │
//!        │                  open failed / timeout   closed / silent
//!      stop()                       ▼                     │
//!   (from any state)              error ◀─────────────────┘
//!                                   │
//!                         backoff elapsed (auto-reconnect)
//!                                   ▼
//!                               connecting
//! ```
//!
//! The task is driven by one `select!` loop per state.  Inbound frames are
//! polled before timers (`biased;`) so an ack that has already arrived wins
//! over a deadline expiring in the same instant.
//!
//! Ack deadlines and heartbeat liveness are independent: a request timing
//! out never changes the connection state, and a failed link does not fail
//! pending requests early.  They resolve at their own deadline, or with
//! `Cancelled` when the link is stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use lasertag_core::protocol::messages::{AckMessage, HeartbeatMessage};
use lasertag_core::protocol::RequestIds;
use lasertag_core::{
    decode_inbound_with_hook, encode_outbound, ConnectionState, DeviceId, EncodeError, Frame,
    InboundMessage, OutboundFrame, OutboundMessage,
};

use crate::application::transport::{Channel, Connector, TransportError};
use crate::application::unix_millis;
use crate::domain::{Endpoint, ReconnectPolicy};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timing parameters shared by every link of a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// How often a heartbeat is sent while connected.
    pub heartbeat_interval: Duration,
    /// Silence longer than this moves a connected link to `error`.
    pub heartbeat_timeout: Duration,
    /// Upper bound on a single open attempt.
    pub connect_timeout: Duration,
    /// Default ack deadline for requests.
    pub ack_timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ── Results and errors ────────────────────────────────────────────────────────

/// A device's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub device_id: DeviceId,
    /// `false` when the device understood the request but refused it.
    pub success: bool,
    pub message: Option<String>,
}

/// Why a command did not produce an [`Ack`].
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// The link was not `connected`; nothing was queued.
    #[error("device {0} is not connected")]
    NotConnected(DeviceId),

    #[error("device {0} did not acknowledge within {1:?}")]
    Timeout(DeviceId, Duration),

    #[error("could not encode command: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport failure while sending to {device_id}: {source}")]
    Transport {
        device_id: DeviceId,
        #[source]
        source: TransportError,
    },

    /// The link was stopped while the request was outstanding.
    #[error("link to {0} was stopped")]
    Cancelled(DeviceId),
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    /// Any transition except into `error`.
    StateChanged(ConnectionState),
    Message(InboundMessage),
    /// The link entered `error` for the given reason.
    Failed(String),
    /// A dropped frame or an out-of-range value; the link stays up.
    Warning(String),
}

/// Something that happened on one link.
///
/// `generation` identifies the link instance, so a registry that rebuilt its
/// links can discard events still in flight from the torn-down ones.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub device_id: DeviceId,
    pub generation: u64,
    pub kind: LinkEventKind,
}

// ── Handle ────────────────────────────────────────────────────────────────────

enum LinkCommand {
    Connect,
    Stop {
        done: oneshot::Sender<()>,
    },
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Request {
        message: OutboundMessage,
        timeout: Duration,
        reply: oneshot::Sender<Result<Ack, CommandError>>,
    },
}

/// Identity of a link instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub device_id: DeviceId,
    pub endpoint: Endpoint,
    pub generation: u64,
}

/// Cloneable handle to a running link task.
///
/// The task exits, releasing its transport, once every handle is dropped.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    device_id: DeviceId,
    generation: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for LinkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkCommand::Connect => f.write_str("Connect"),
            LinkCommand::Stop { .. } => f.write_str("Stop"),
            LinkCommand::Send { message, .. } => write!(f, "Send({})", message.op_code().name()),
            LinkCommand::Request { message, .. } => {
                write!(f, "Request({})", message.op_code().name())
            }
        }
    }
}

impl LinkHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every published state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the link reports `target`.
    ///
    /// Returns `false` if the link task has exited.  A state that is entered
    /// and left again before this task is scheduled may be missed.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|state| *state == target).await.is_ok();
        reached
    }

    /// Starts connecting from `disconnected`, or retries immediately from
    /// `error`.  Ignored in every other state.
    ///
    /// Returns `false` if the link task has exited.
    pub fn connect(&self) -> bool {
        self.commands.send(LinkCommand::Connect).is_ok()
    }

    /// Stops the link and waits until its transport has been released.
    ///
    /// Always succeeds.  Pending requests fail with `Cancelled`.
    pub async fn stop(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(LinkCommand::Stop { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Writes a message that expects no ack.  Resolves once it is written.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), CommandError> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Send { message, reply })
            .map_err(|_| self.cancelled())?;
        rx.await.unwrap_or_else(|_| Err(self.cancelled()))
    }

    /// Writes a message with a fresh request id and waits for its ack.
    ///
    /// Fails immediately with `NotConnected` unless the link is connected.
    pub async fn request(
        &self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> Result<Ack, CommandError> {
        self.ensure_connected()?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Request {
                message,
                timeout,
                reply,
            })
            .map_err(|_| self.cancelled())?;
        rx.await.unwrap_or_else(|_| Err(self.cancelled()))
    }

    fn ensure_connected(&self) -> Result<(), CommandError> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(CommandError::NotConnected(self.device_id.clone()))
        }
    }

    fn cancelled(&self) -> CommandError {
        CommandError::Cancelled(self.device_id.clone())
    }
}

/// Spawns the task for one link, initially `disconnected`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_link(
    spec: LinkSpec,
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> LinkHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let handle = LinkHandle {
        device_id: spec.device_id.clone(),
        generation: spec.generation,
        commands: command_tx,
        state: state_rx,
    };

    let actor = LinkActor {
        request_ids: RequestIds::new(spec.device_id.clone()),
        device_id: spec.device_id,
        endpoint: spec.endpoint,
        generation: spec.generation,
        connector,
        config,
        commands: command_rx,
        events,
        state_tx,
        state: ConnectionState::Disconnected,
        channel: None,
        pending: HashMap::new(),
        failed_attempts: 0,
    };
    tokio::spawn(actor.run());

    handle
}

// ── Link task ─────────────────────────────────────────────────────────────────

struct PendingAck {
    deadline: Instant,
    timeout: Duration,
    reply: oneshot::Sender<Result<Ack, CommandError>>,
}

enum Flow {
    Continue,
    /// The link was stopped; the sender is completed once the state loop
    /// has dropped everything the previous state held.
    Stopped(oneshot::Sender<()>),
    Exit,
}

struct LinkActor {
    device_id: DeviceId,
    endpoint: Endpoint,
    generation: u64,
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    channel: Option<Box<dyn Channel>>,
    pending: HashMap<String, PendingAck>,
    request_ids: RequestIds,
    /// Reconnect attempts since the link was last connected.
    failed_attempts: u32,
}

impl LinkActor {
    async fn run(mut self) {
        debug!(device = %self.device_id, endpoint = %self.endpoint, generation = self.generation, "link task started");
        loop {
            let flow = match self.state {
                ConnectionState::Disconnected => self.run_disconnected().await,
                ConnectionState::Connecting => self.run_connecting().await,
                ConnectionState::Connected => self.run_connected().await,
                ConnectionState::Error => self.run_error().await,
            };
            match flow {
                Flow::Continue => {}
                Flow::Stopped(done) => {
                    let _ = done.send(());
                }
                Flow::Exit => break,
            }
        }
        self.release().await;
        self.cancel_pending();
        debug!(device = %self.device_id, generation = self.generation, "link task exited");
    }

    async fn run_disconnected(&mut self) -> Flow {
        loop {
            let command = self.commands.recv().await;
            let flow = self.handle_command(command).await;
            if !matches!(flow, Flow::Continue) || self.state != ConnectionState::Disconnected {
                return flow;
            }
        }
    }

    async fn run_connecting(&mut self) -> Flow {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;
        // Dropping this future abandons the half-open connection.  It lives
        // until this function returns, so a stop is only acknowledged after that.
        let open = tokio::time::timeout(connect_timeout, async move {
            connector.open(&endpoint).await
        });
        tokio::pin!(open);

        loop {
            let ack_deadline = self.next_ack_deadline();
            tokio::select! {
                biased;

                opened = &mut open => {
                    match opened {
                        Ok(Ok(channel)) => {
                            self.channel = Some(channel);
                            self.failed_attempts = 0;
                            self.transition(ConnectionState::Connected);
                        }
                        Ok(Err(e)) => self.fail(e.to_string()).await,
                        Err(_) => {
                            self.fail(format!("connect timed out after {connect_timeout:?}")).await
                        }
                    }
                    return Flow::Continue;
                }

                command = self.commands.recv() => {
                    let flow = self.handle_command(command).await;
                    if !matches!(flow, Flow::Continue) || self.state != ConnectionState::Connecting {
                        return flow;
                    }
                }

                _ = sleep_until_opt(ack_deadline) => self.expire_acks(),
            }
        }
    }

    async fn run_connected(&mut self) -> Flow {
        let period = self.config.heartbeat_interval;
        let window = self.config.heartbeat_timeout;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut silent_until = Instant::now() + window;

        loop {
            let ack_deadline = self.next_ack_deadline();
            tokio::select! {
                biased;

                frame = recv_from(&mut self.channel) => match frame {
                    Some(Ok(bytes)) => {
                        if self.handle_frame(&bytes) {
                            silent_until = Instant::now() + window;
                        }
                    }
                    Some(Err(e)) => {
                        self.fail(e.to_string()).await;
                        return Flow::Continue;
                    }
                    None => {
                        self.fail("transport closed by device".to_string()).await;
                        return Flow::Continue;
                    }
                },

                command = self.commands.recv() => {
                    let flow = self.handle_command(command).await;
                    if !matches!(flow, Flow::Continue) || self.state != ConnectionState::Connected {
                        return flow;
                    }
                }

                _ = sleep_until_opt(ack_deadline) => self.expire_acks(),

                _ = sleep_until(silent_until) => {
                    self.fail(format!("no traffic from device for {window:?}")).await;
                    return Flow::Continue;
                }

                _ = heartbeat.tick() => {
                    let beat = OutboundMessage::Heartbeat(HeartbeatMessage {
                        timestamp_ms: Some(unix_millis()),
                        ..Default::default()
                    });
                    let sent = self.write(Frame::new(beat)).await;
                    if let Err(e) = sent {
                        debug!(device = %self.device_id, error = %e, "heartbeat not sent");
                        if self.state != ConnectionState::Connected {
                            return Flow::Continue;
                        }
                    }
                }
            }
        }
    }

    async fn run_error(&mut self) -> Flow {
        let retry_at = if self.config.auto_reconnect {
            let delay = self.config.reconnect.delay(self.failed_attempts);
            self.failed_attempts = self.failed_attempts.saturating_add(1);
            info!(
                device = %self.device_id,
                attempt = self.failed_attempts,
                ?delay,
                "reconnect scheduled"
            );
            Some(Instant::now() + delay)
        } else {
            None
        };

        loop {
            let ack_deadline = self.next_ack_deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let flow = self.handle_command(command).await;
                    if !matches!(flow, Flow::Continue) || self.state != ConnectionState::Error {
                        return flow;
                    }
                }

                _ = sleep_until_opt(ack_deadline) => self.expire_acks(),

                _ = sleep_until_opt(retry_at) => {
                    self.transition(ConnectionState::Connecting);
                    return Flow::Continue;
                }
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Option<LinkCommand>) -> Flow {
        let Some(command) = command else {
            // Every handle is gone.
            return Flow::Exit;
        };
        match command {
            LinkCommand::Connect => match self.state {
                ConnectionState::Disconnected | ConnectionState::Error => {
                    self.transition(ConnectionState::Connecting)
                }
                state => debug!(device = %self.device_id, %state, "connect ignored"),
            },
            LinkCommand::Stop { done } => {
                self.stop().await;
                return Flow::Stopped(done);
            }
            LinkCommand::Send { message, reply } => {
                let result = self.write(Frame::new(message)).await;
                let _ = reply.send(result);
            }
            LinkCommand::Request {
                message,
                timeout,
                reply,
            } => {
                let req_id = self.request_ids.next_id();
                let written = self
                    .write(Frame::with_request_id(req_id.clone(), message))
                    .await;
                match written {
                    Ok(()) => {
                        self.pending.insert(
                            req_id,
                            PendingAck {
                                deadline: Instant::now() + timeout,
                                timeout,
                                reply,
                            },
                        );
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
        Flow::Continue
    }

    async fn write(&mut self, frame: OutboundFrame) -> Result<(), CommandError> {
        if self.state != ConnectionState::Connected {
            return Err(CommandError::NotConnected(self.device_id.clone()));
        }
        let bytes = encode_outbound(&frame)?;
        let Some(channel) = self.channel.as_mut() else {
            return Err(CommandError::NotConnected(self.device_id.clone()));
        };
        debug!(
            device = %self.device_id,
            op = frame.message.op_code().name(),
            req_id = frame.req_id.as_deref().unwrap_or("-"),
            "sending frame"
        );
        let sent = channel.send(bytes).await;
        match sent {
            Ok(()) => Ok(()),
            Err(source) => {
                self.fail(format!("write failed: {source}")).await;
                Err(CommandError::Transport {
                    device_id: self.device_id.clone(),
                    source,
                })
            }
        }
    }

    async fn stop(&mut self) {
        self.release().await;
        self.cancel_pending();
        self.failed_attempts = 0;
        self.transition(ConnectionState::Disconnected);
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Returns `true` when the frame decoded, which counts as liveness.
    fn handle_frame(&mut self, bytes: &[u8]) -> bool {
        let mut warnings = Vec::new();
        let frame = match decode_inbound_with_hook(bytes, |w| warnings.push(w)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %self.device_id, error = %e, "dropping undecodable frame");
                self.emit(LinkEventKind::Warning(format!("dropped frame: {e}")));
                return false;
            }
        };
        for warning in warnings {
            warn!(device = %self.device_id, %warning, "device reported an out-of-range value");
            self.emit(LinkEventKind::Warning(warning.to_string()));
        }

        debug!(device = %self.device_id, op = frame.message.op_code().name(), "frame received");
        if let InboundMessage::Ack(ack) = &frame.message {
            self.resolve_ack(frame.req_id.as_deref(), ack);
        }
        self.emit(LinkEventKind::Message(frame.message));
        true
    }

    fn resolve_ack(&mut self, req_id: Option<&str>, ack: &AckMessage) {
        match req_id.and_then(|id| self.pending.remove(id)) {
            Some(pending) => {
                let _ = pending.reply.send(Ok(Ack {
                    device_id: self.device_id.clone(),
                    success: ack.success,
                    message: ack.message.clone(),
                }));
            }
            None => debug!(device = %self.device_id, ?req_id, "ack without a pending request"),
        }
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    fn next_ack_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    fn expire_acks(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for req_id in expired {
            if let Some(pending) = self.pending.remove(&req_id) {
                debug!(device = %self.device_id, %req_id, "request timed out");
                let _ = pending.reply.send(Err(CommandError::Timeout(
                    self.device_id.clone(),
                    pending.timeout,
                )));
            }
        }
    }

    fn cancel_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending
                .reply
                .send(Err(CommandError::Cancelled(self.device_id.clone())));
        }
    }

    async fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    async fn fail(&mut self, reason: String) {
        warn!(device = %self.device_id, %reason, "link failed");
        self.release().await;
        if self.set_state(ConnectionState::Error) {
            self.emit(LinkEventKind::Failed(reason));
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.set_state(next) {
            self.emit(LinkEventKind::StateChanged(next));
        }
    }

    /// Returns `false` if the link already was in `next`.
    fn set_state(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        info!(device = %self.device_id, from = %self.state, to = %next, "link state changed");
        self.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn emit(&self, kind: LinkEventKind) {
        // The registry may already be gone during teardown.
        let _ = self.events.send(LinkEvent {
            device_id: self.device_id.clone(),
            generation: self.generation,
            kind,
        });
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn recv_from(
    channel: &mut Option<Box<dyn Channel>>,
) -> Option<Result<Vec<u8>, TransportError>> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::MockConnector;
    use lasertag_core::protocol::messages::GameCommand;

    fn spawn_test_link(
        connector: &MockConnector,
    ) -> (LinkHandle, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = spawn_link(
            LinkSpec {
                device_id: "w1".to_string(),
                endpoint: Endpoint::Direct {
                    address: "10.0.0.1".to_string(),
                },
                generation: 1,
            },
            Arc::new(connector.clone()),
            LinkConfig::default(),
            events_tx,
        );
        (handle, events_rx)
    }

    #[test]
    fn test_link_config_defaults() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(10));
        assert!(cfg.auto_reconnect);
    }

    #[tokio::test]
    async fn test_new_link_is_disconnected_and_rejects_requests() {
        // Arrange
        let (connector, _devices) = MockConnector::new();
        let (link, _events) = spawn_test_link(&connector);

        // Act
        let result = link
            .request(OutboundMessage::game(GameCommand::Start), Duration::from_secs(1))
            .await;

        // Assert
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(result, Err(CommandError::NotConnected("w1".to_string())));
        assert_eq!(connector.open_count("10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn test_connect_emits_connecting_then_connected() {
        let (connector, mut devices) = MockConnector::new();
        let (link, mut events) = spawn_test_link(&connector);

        assert!(link.connect());
        let _device = devices.recv().await.expect("link opens a channel");
        assert!(link.wait_for_state(ConnectionState::Connected).await);

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.kind, LinkEventKind::StateChanged(ConnectionState::Connecting));
        assert_eq!(second.kind, LinkEventKind::StateChanged(ConnectionState::Connected));
        assert_eq!(second.generation, 1);
    }

    #[tokio::test]
    async fn test_stop_releases_channel_and_is_idempotent() {
        let (connector, mut devices) = MockConnector::new();
        let (link, _events) = spawn_test_link(&connector);
        link.connect();
        let mut device = devices.recv().await.unwrap();
        link.wait_for_state(ConnectionState::Connected).await;

        link.stop().await;
        link.stop().await;

        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(device.recv_frame().await.is_none(), "hub side must be closed");
    }

    #[tokio::test]
    async fn test_dropping_last_handle_ends_task() {
        let (connector, mut devices) = MockConnector::new();
        let (link, mut events) = spawn_test_link(&connector);
        link.connect();
        let mut device = devices.recv().await.unwrap();
        link.wait_for_state(ConnectionState::Connected).await;

        drop(link);

        assert!(device.recv_frame().await.is_none());
        // Drain what was emitted; the channel then closes with the task.
        while events.recv().await.is_some() {}
    }

    #[test]
    fn test_command_error_messages() {
        assert_eq!(
            CommandError::NotConnected("t3".into()).to_string(),
            "device t3 is not connected"
        );
        assert_eq!(
            CommandError::Cancelled("t3".into()).to_string(),
            "link to t3 was stopped"
        );
    }
}
