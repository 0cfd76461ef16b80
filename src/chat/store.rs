//! Contacts, dialogs and unread bookkeeping.
//!
//! The store never tracks which contact is open; that lives in a
//! [`ChatSession`] passed into every operation that depends on it.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ChatPayload, Contact, Dialog, Message, LOCAL_SENDER};

/// Source of message timestamps, in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    active_contact_id: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_contact_id(&self) -> Option<&str> {
        self.active_contact_id.as_deref()
    }

    fn is_active(&self, contact_id: &str) -> bool {
        self.active_contact_id.as_deref() == Some(contact_id)
    }
}

pub struct ChatStore {
    contacts: Vec<Contact>, // Insertion order; indices never change
    dialogs: HashMap<String, Dialog>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    clock: Clock,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_clock))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            contacts: Vec::new(),
            dialogs: HashMap::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            clock,
        }
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Record a message from the server and return the id of its contact.
    ///
    /// Senders are matched by exact display name. The first message from an
    /// unknown name creates the contact and its dialog together.
    pub fn receive_remote_message(&mut self, session: &ChatSession, payload: &ChatPayload) -> String {
        let mut message = Message::new(&payload.from, &payload.text, self.now(), false);

        let Some(&index) = self.by_name.get(&payload.from) else {
            debug!("First message from {}, creating contact", payload.from);
            return self.insert_contact(&payload.from, vec![message], 1);
        };

        let contact = &mut self.contacts[index];
        if session.is_active(&contact.id) {
            message.mark_read();
        } else {
            contact.unread_count += 1;
        }
        contact.last_message_time = Some(message.timestamp);
        contact.last_message = Some(message.clone());

        let contact_id = contact.id.clone();
        match self.dialogs.get_mut(&contact_id) {
            Some(dialog) => dialog.messages.push(message),
            None => warn!("Contact {} has no dialog", contact_id),
        }
        contact_id
    }

    /// Append a message authored locally to the active dialog.
    ///
    /// Returns `None` without touching anything when no known contact is
    /// active or the text is blank.
    pub fn send_local_message(&mut self, session: &ChatSession, text: &str) -> Option<&Message> {
        let contact_id = session.active_contact_id()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let index = *self.by_id.get(contact_id)?;

        let message = Message::new(LOCAL_SENDER, text, self.now(), true);
        let contact = &mut self.contacts[index];
        contact.last_message_time = Some(message.timestamp);
        contact.last_message = Some(message.clone());

        let dialog = self.dialogs.get_mut(contact_id)?;
        dialog.messages.push(message);
        dialog.messages.last()
    }

    /// Make `contact_id` active and mark its whole dialog read.
    ///
    /// Unknown ids still become active; there is just nothing to mark.
    pub fn select_contact(&mut self, session: &mut ChatSession, contact_id: &str) {
        session.active_contact_id = Some(contact_id.to_string());

        let Some(&index) = self.by_id.get(contact_id) else {
            debug!("Selected unknown contact {}", contact_id);
            return;
        };

        let contact = &mut self.contacts[index];
        contact.unread_count = 0;
        if let Some(last) = contact.last_message.as_mut() {
            last.mark_read();
        }
        if let Some(dialog) = self.dialogs.get_mut(contact_id) {
            dialog.messages.iter_mut().for_each(Message::mark_read);
        }
    }

    /// Contacts, most recent conversation first. Ties keep insertion order.
    pub fn contacts(&self) -> Vec<&Contact> {
        let mut sorted: Vec<&Contact> = self.contacts.iter().collect();
        sorted.sort_by(|a, b| {
            let a = a.last_message_time.unwrap_or(0);
            let b = b.last_message_time.unwrap_or(0);
            b.cmp(&a)
        });
        sorted
    }

    pub fn contact(&self, contact_id: &str) -> Option<&Contact> {
        self.by_id.get(contact_id).map(|&index| &self.contacts[index])
    }

    pub fn contact_by_name(&self, name: &str) -> Option<&Contact> {
        self.by_name.get(name).map(|&index| &self.contacts[index])
    }

    pub fn dialog(&self, contact_id: &str) -> Option<&Dialog> {
        self.dialogs.get(contact_id)
    }

    pub fn active_contact(&self, session: &ChatSession) -> Option<&Contact> {
        session.active_contact_id().and_then(|id| self.contact(id))
    }

    pub fn active_dialog(&self, session: &ChatSession) -> Option<&Dialog> {
        session.active_contact_id().and_then(|id| self.dialog(id))
    }

    /// Add a contact with an existing history, e.g. for demo data.
    /// Returns the existing id unchanged if `name` is already known.
    pub fn import_contact(&mut self, name: &str, messages: Vec<Message>, unread_count: u32) -> String {
        if let Some(existing) = self.contact_by_name(name) {
            warn!("Contact {} already exists, not importing history", name);
            return existing.id.clone();
        }
        self.insert_contact(name, messages, unread_count)
    }

    fn insert_contact(&mut self, name: &str, messages: Vec<Message>, unread_count: u32) -> String {
        let last_message = messages.last().cloned();
        let contact = Contact {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            last_message_time: last_message.as_ref().map(|m| m.timestamp),
            last_message,
            unread_count,
        };
        let contact_id = contact.id.clone();

        let index = self.contacts.len();
        self.by_name.insert(contact.name.clone(), index);
        self.by_id.insert(contact_id.clone(), index);
        self.dialogs.insert(
            contact_id.clone(),
            Dialog {
                contact_id: contact_id.clone(),
                messages,
            },
        );
        self.contacts.push(contact);
        contact_id
    }
}
