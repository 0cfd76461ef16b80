// Demo conversations so a fresh client has something to show before the
// server sends anything.

use crate::chat::store::ChatStore;
use crate::models::{Message, LOCAL_SENDER};

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

impl ChatStore {
    /// Install the demo contacts "Anzhela" and "Marina". Timestamps are
    /// relative to the store's clock. Returns the new contact ids.
    pub fn seed_demo_data(&mut self) -> Vec<String> {
        let now = self.now();
        let ago = |ms: u64| now.saturating_sub(ms);

        let anzhela = vec![
            Message::new("Anzhela", "What's your name?", ago(HOUR_MS + 400_000), true),
            Message::new(LOCAL_SENDER, "h", ago(HOUR_MS + 300_000), true),
            Message::new("Anzhela", "can my smile make your day better?😉", ago(HOUR_MS), false),
        ];

        let marina = vec![
            Message::new("Marina", "Woman who looking only for date - it good or bad?", ago(2 * HOUR_MS + 200_000), true),
            Message::new(LOCAL_SENDER, "hu", ago(2 * HOUR_MS + 100_000), true),
            Message::new(LOCAL_SENDER, "he", ago(2 * HOUR_MS + 50_000), true),
            Message::new(LOCAL_SENDER, "ha", ago(2 * HOUR_MS), true),
            Message::new("Marina", "does that mean its good?", ago(2 * HOUR_MS - 50_000), true),
            Message::new("Marina", "would you go out with a woman like me?", ago(2 * HOUR_MS - 100_000), true),
            Message::new("Marina", "Don't tell me you're afraid :)", ago(2 * HOUR_MS - 150_000), true),
        ];

        vec![
            self.import_contact("Anzhela", anzhela, 1),
            self.import_contact("Marina", marina, 0),
        ]
    }
}
