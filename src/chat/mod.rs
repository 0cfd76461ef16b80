// Chat client for murmur
// Ties the connection manager to the chat store and exposes the state a
// presentation layer renders.

use log::{error, info};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::dispatcher::Subscription;
use crate::models::{Contact, ConnectionState, Dialog, Message};
use crate::ws::{ConnectionError, ConnectionManager};

pub mod demo;
pub mod format;
pub mod store;

pub use store::{ChatSession, ChatStore};

struct ChatState {
    store: ChatStore,
    session: ChatSession,
    is_loading: bool,
    error: Option<String>,
}

fn lock_state(state: &Mutex<ChatState>) -> MutexGuard<'_, ChatState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ChatClient {
    manager: ConnectionManager,
    state: Arc<Mutex<ChatState>>,
    subscription: Option<Subscription>,
}

impl ChatClient {
    pub fn new(manager: ConnectionManager) -> Self {
        Self::with_store(manager, ChatStore::new())
    }

    /// Build a client around an existing store. Inbound messages are routed
    /// into the store from here on.
    pub fn with_store(manager: ConnectionManager, store: ChatStore) -> Self {
        let state = Arc::new(Mutex::new(ChatState {
            store,
            session: ChatSession::new(),
            is_loading: false,
            error: None,
        }));

        let handler_state = state.clone();
        let subscription = manager.on_message(move |payload| {
            let mut guard = lock_state(&handler_state);
            let ChatState { store, session, .. } = &mut *guard;
            store.receive_remote_message(session, payload);
            Ok(())
        });

        Self {
            manager,
            state,
            subscription: Some(subscription),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        lock_state(&self.state)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Connect to the server, tracking progress in the loading/error flags.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        let result = self.manager.connect().await;

        let mut state = self.lock();
        match &result {
            Ok(()) => info!("Chat client connected to {}", self.manager.config().server_url),
            Err(e) => {
                error!("Failed to initialize connection: {}", e);
                state.error = Some(e.to_string());
            }
        }
        state.is_loading = false;
        result
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub fn select_contact(&self, contact_id: &str) {
        let mut guard = self.lock();
        let ChatState { store, session, .. } = &mut *guard;
        store.select_contact(session, contact_id);
    }

    /// Returns the stored message, or `None` if nothing was sent.
    pub fn send_local_message(&self, text: &str) -> Option<Message> {
        let mut guard = self.lock();
        let ChatState { store, session, .. } = &mut *guard;
        store.send_local_message(session, text).cloned()
    }

    pub fn seed_demo_data(&self) {
        let ids = self.lock().store.seed_demo_data();
        info!("Seeded {} demo contacts", ids.len());
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.lock().store.contacts().into_iter().cloned().collect()
    }

    pub fn active_contact_id(&self) -> Option<String> {
        self.lock().session.active_contact_id().map(str::to_string)
    }

    pub fn active_contact(&self) -> Option<Contact> {
        let state = self.lock();
        state.store.active_contact(&state.session).cloned()
    }

    pub fn active_dialog(&self) -> Option<Dialog> {
        let state = self.lock();
        state.store.active_dialog(&state.session).cloned()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
