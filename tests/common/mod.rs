// Common test utilities for integration tests
// Provides an in-memory connector whose behaviour is scripted per open() call,
// and the server side of every link it hands out.

#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use murmur::ws::{Connector, TransportError, TransportEvent, TransportLink};
use murmur::ClientConfig;

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Defaults from the client, pointed at a fake URL.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        server_url: "ws://test.invalid:8181".to_string(),
        ..ClientConfig::default()
    }
}

/// Let every task that can make progress do so. On the paused clock this
/// only moves time once the runtime is otherwise idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accept,
    Refuse,
    Hang,
}

/// The server's half of an accepted link. Dropping it closes the link.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Text(text.to_string()));
    }

    pub fn send_chat(&self, from: &str, text: &str) {
        let frame = serde_json::json!({ "message": { "from": from, "message": text } });
        self.send_text(&frame.to_string());
    }

    pub fn close(&self) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: Some("server going away".to_string()),
        });
    }

    /// Stop accepting frames from the client while the link stays up, as a
    /// transport whose write half has died would.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    /// Frames the client has sent so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// True once the client has dropped its side of the link.
    pub async fn client_closed(&mut self) -> bool {
        loop {
            match self.from_client.recv().await {
                Some(_) => continue,
                None => return true,
            }
        }
    }
}

struct MockState {
    script: VecDeque<Step>,
    then: Step,
    opens: Vec<Instant>,
    servers: VecDeque<ServerEnd>,
}

pub struct MockConnector {
    state: Mutex<MockState>,
}

impl MockConnector {
    /// Follows `script` for the first opens, then repeats `then`.
    pub fn scripted(script: Vec<Step>, then: Step) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                script: script.into(),
                then,
                opens: Vec::new(),
                servers: VecDeque::new(),
            }),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new(), Step::Accept)
    }

    pub fn refusing() -> Arc<Self> {
        Self::scripted(Vec::new(), Step::Refuse)
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    /// Server end of the oldest accepted link not yet taken.
    pub fn take_server(&self) -> ServerEnd {
        self.state
            .lock()
            .unwrap()
            .servers
            .pop_front()
            .expect("no accepted link waiting")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.opens.push(Instant::now());
            let then = state.then;
            state.script.pop_front().unwrap_or(then)
        };

        match step {
            Step::Refuse => Err(TransportError::Open {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
            Step::Hang => std::future::pending().await,
            Step::Accept => {
                let (outbound, from_client) = mpsc::unbounded_channel();
                let (to_client, inbound) = mpsc::unbounded_channel();
                self.state.lock().unwrap().servers.push_back(ServerEnd { to_client, from_client });
                Ok(TransportLink { outbound, inbound })
            }
        }
    }
}
