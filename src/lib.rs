// Re-export needed modules for testing
pub mod chat;
pub mod config;
pub mod dispatcher;
pub mod models;
pub mod ws;

// Re-export main types for convenience
pub use chat::ChatClient;
pub use config::ClientConfig;
pub use models::*;
pub use ws::ConnectionManager;
