// WebSocket connection management for murmur
// The ConnectionManager is a handle; the state machine itself runs in a
// spawned task (see connection.rs).

use log::warn;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::dispatcher::{DispatchFailure, Dispatcher, Subscription};
use crate::models::{ChatPayload, ConnectionPhase, ConnectionState};

mod connection;
pub mod frames;
pub mod transport;

pub use frames::{Frame, FrameError};
pub use transport::{Connector, TransportError, TransportEvent, TransportLink, WebSocketConnector};

use connection::{Command, ConnectionDriver};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Cannot connect while {0:?}")]
    InvalidState(ConnectionPhase),

    #[error("Connection manager has stopped")]
    Stopped,
}

/// Owns the chat transport and keeps it alive: heartbeats while connected,
/// reconnects with exponential backoff after the connection drops.
///
/// Dropping the manager stops its task and closes the transport.
pub struct ConnectionManager {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: Arc<Dispatcher>,
}

impl ConnectionManager {
    /// Manager using the WebSocket transport. Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::default());
        let dispatcher = Dispatcher::new();

        let driver = ConnectionDriver::new(config.clone(), connector, dispatcher.clone(), command_rx, state_tx);
        tokio::spawn(driver.run());

        Self {
            config,
            commands,
            state,
            dispatcher,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the transport. Resolves once connected, or with the open failure.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| ConnectionError::Stopped)?;
        response.await.map_err(|_| ConnectionError::Stopped)?
    }

    /// Cancel timers, close the transport and reset the attempt counter.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_err() {
            warn!("Disconnect requested after connection manager stopped");
            return;
        }
        let _ = done.await;
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Register a handler for inbound chat payloads.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    pub fn failure_reports(&self) -> mpsc::UnboundedReceiver<DispatchFailure> {
        self.dispatcher.failure_reports()
    }
}
