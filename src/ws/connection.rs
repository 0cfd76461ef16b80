// Connection state machine for the chat transport.
// One task owns the transport, the heartbeat and the reconnect timer, and
// reacts to commands, transport events and timer fires one at a time.

use log::{debug, error, info, warn};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::models::{ConnectionPhase, ConnectionState};
use crate::ws::frames::Frame;
use crate::ws::transport::{Connector, TransportError, TransportEvent, TransportLink};
use crate::ws::ConnectionError;

type Reply = oneshot::Sender<Result<(), ConnectionError>>;
type OpenResult = Result<TransportLink, TransportError>;

pub(crate) enum Command {
    Connect { reply: Reply },
    Disconnect { reply: oneshot::Sender<()> },
}

struct PendingOpen {
    task: JoinHandle<OpenResult>,
    waiters: Vec<Reply>,
    reconnect: bool,
}

pub(crate) struct ConnectionDriver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    link: Option<TransportLink>,
    pending_open: Option<PendingOpen>,
    heartbeat: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl ConnectionDriver {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            connector,
            dispatcher,
            commands,
            state_tx,
            state: ConnectionState::default(),
            link: None,
            pending_open: None,
            heartbeat: None,
            reconnect_timer: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                // Commands first so a disconnect wins over a timer that is due
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                opened = wait_open(&mut self.pending_open) => self.handle_opened(opened),
                event = next_event(&mut self.link) => self.handle_transport_event(event),
                _ = tick(&mut self.heartbeat) => self.send_heartbeat(),
                _ = fire(&mut self.reconnect_timer) => self.handle_reconnect_timer(),
            }
        }

        debug!("Connection manager handle dropped, shutting down");
        self.reset();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => match self.state.phase {
                ConnectionPhase::Disconnected | ConnectionPhase::Failed => {
                    self.start_open(vec![reply], false);
                }
                ConnectionPhase::Connecting => match self.pending_open.as_mut() {
                    Some(pending) => pending.waiters.push(reply),
                    None => {
                        let _ = reply.send(Err(ConnectionError::InvalidState(ConnectionPhase::Connecting)));
                    }
                },
                ConnectionPhase::Connected => {
                    debug!("Already connected to {}", self.config.server_url);
                    let _ = reply.send(Ok(()));
                }
                ConnectionPhase::Reconnecting => {
                    warn!("connect() ignored while a reconnect is in progress");
                    let _ = reply.send(Err(ConnectionError::InvalidState(ConnectionPhase::Reconnecting)));
                }
            },
            Command::Disconnect { reply } => {
                info!("Disconnecting from {}", self.config.server_url);
                self.reset();
                let _ = reply.send(());
            }
        }
    }

    fn start_open(&mut self, waiters: Vec<Reply>, reconnect: bool) {
        let connector = self.connector.clone();
        let url = self.config.server_url.clone();
        info!("Connecting to {}", url);

        let task = tokio::spawn(async move { connector.open(&url).await });
        self.pending_open = Some(PendingOpen {
            task,
            waiters,
            reconnect,
        });
        if !reconnect {
            self.state.phase = ConnectionPhase::Connecting;
        }
        self.publish();
    }

    fn handle_opened(&mut self, opened: Result<OpenResult, JoinError>) {
        let Some(pending) = self.pending_open.take() else {
            return;
        };

        let outcome = opened.unwrap_or_else(|e| {
            Err(TransportError::Open {
                url: self.config.server_url.clone(),
                reason: format!("connect task failed: {}", e),
            })
        });

        match outcome {
            Ok(link) => {
                info!("Connected to {}", self.config.server_url);
                self.link = Some(link);
                self.state.reconnect_attempts = 0;
                self.state.is_connected = true;
                self.state.is_reconnecting = false;
                self.state.phase = ConnectionPhase::Connected;
                self.start_heartbeat();
                self.publish();
                for waiter in pending.waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                error!("Connection to {} failed: {}", self.config.server_url, e);
                for waiter in pending.waiters {
                    let _ = waiter.send(Err(ConnectionError::Transport(e.clone())));
                }
                if pending.reconnect {
                    // A failed attempt closes like any other transport
                    self.state.is_reconnecting = false;
                    self.handle_close();
                } else {
                    self.state.phase = ConnectionPhase::Disconnected;
                    self.publish();
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.handle_text(&text),
            TransportEvent::Closed { reason } => {
                info!(
                    "Connection to {} closed{}",
                    self.config.server_url,
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.handle_close();
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::ChatMessage(payload)) => {
                let summary = self.dispatcher.dispatch(&payload);
                debug!(
                    "Dispatched message from {} to {} subscribers ({} failed)",
                    payload.from, summary.delivered, summary.failed
                );
            }
            Ok(Frame::Ping) => debug!("Received ping from server"),
            Ok(Frame::Unknown) => warn!("Ignoring frame without chat data: {}", text),
            Err(e) => warn!("Dropping frame: {} (data: {})", e, text),
        }
    }

    fn handle_close(&mut self) {
        self.heartbeat = None;
        self.link = None;
        self.state.is_connected = false;
        self.state.phase = ConnectionPhase::Disconnected;

        if self.state.reconnect_attempts < self.config.max_reconnect_attempts {
            self.schedule_reconnect();
        } else {
            error!(
                "Maximum reconnect attempts ({}) exceeded, giving up",
                self.config.max_reconnect_attempts
            );
            self.state.is_reconnecting = false;
            self.state.phase = ConnectionPhase::Failed;
        }
        self.publish();
    }

    fn schedule_reconnect(&mut self) {
        if self.state.is_reconnecting || self.state.reconnect_attempts >= self.config.max_reconnect_attempts {
            return;
        }

        self.state.is_reconnecting = true;
        self.state.reconnect_attempts += 1;
        self.state.phase = ConnectionPhase::Reconnecting;

        let delay = self.config.backoff_delay(self.state.reconnect_attempts);
        info!(
            "Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.state.reconnect_attempts,
            self.config.max_reconnect_attempts
        );
        self.reconnect_timer = Some(Box::pin(time::sleep(delay)));
    }

    fn handle_reconnect_timer(&mut self) {
        self.reconnect_timer = None;
        if self.state.is_reconnecting {
            self.start_open(Vec::new(), true);
        }
    }

    fn start_heartbeat(&mut self) {
        let period = self.config.ping_interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    fn send_heartbeat(&self) {
        let Some(link) = self.link.as_ref().filter(|link| link.is_open()) else {
            return;
        };
        let Some(ping) = Frame::Ping.to_json() else {
            return;
        };
        match link.outbound.send(ping) {
            Ok(()) => debug!("Sent heartbeat"),
            Err(e) => warn!("Failed to send heartbeat: {}", e),
        }
    }

    /// Cancel timers, abandon any open in flight, close the transport and
    /// return to a clean `Disconnected` state.
    fn reset(&mut self) {
        self.reconnect_timer = None;
        self.heartbeat = None;

        if let Some(pending) = self.pending_open.take() {
            pending.task.abort();
            for waiter in pending.waiters {
                let _ = waiter.send(Err(ConnectionError::Cancelled));
            }
        }
        // Dropping the link drops its sender, which closes the socket
        self.link = None;

        self.state = ConnectionState::default();
        self.publish();
    }
}

async fn wait_open(pending: &mut Option<PendingOpen>) -> Result<OpenResult, JoinError> {
    match pending {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link
            .inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
