#![deny(dead_code)]
use anyhow::Result;
use chrono::Local;
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

mod utils;

use murmur::chat::format::{format_message_time, truncate_message, PREVIEW_LENGTH};
use murmur::chat::store::system_clock;
use murmur::{ChatClient, ClientConfig, ConnectionManager, ConnectionPhase, ConnectionState, Contact};

/// Command line arguments for murmur
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "murmur: a terminal client for WebSocket chat servers.",
    long_about = "murmur connects to a WebSocket chat server, keeps the connection alive and \
    collects incoming messages into per-contact dialogs.\n\n\
    Configuration is read from --config (or the default config file), then MURMUR_* \
    environment variables, then the flags below."
)]
struct Args {
    /// Server URL, e.g. ws://localhost:8181
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// JSON configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write debug logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Start with demo conversations
    #[arg(long)]
    demo: bool,
}

const HELP: &str = "\
Commands:
  /contacts             list contacts, most recent first
  /open <name|number>   open a conversation
  /dialog               show the open conversation
  /state                show the connection state
  /connect              connect (or retry after failure)
  /disconnect           close the connection
  /help                 show this help
  /quit                 exit
Anything else is sent to the open conversation.";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.log_file.is_some() { LevelFilter::Debug } else { LevelFilter::Warn };
    utils::setup_logging(args.log_file.as_deref(), level)?;

    let mut config = ClientConfig::resolve(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.server_url = url;
        config.validate()?;
    }
    info!("Using configuration: {:?}", config);
    let server_url = config.server_url.clone();

    let client = ChatClient::new(ConnectionManager::new(config));
    if args.demo {
        client.seed_demo_data();
    }

    // Registered after the store, so the store has the message by the time we print it
    let _printer = client.manager().on_message(|payload| {
        let time = format_message_time(system_clock(), &Local::now());
        println!("[{}] {}: {}", time, payload.from, payload.text);
        Ok(())
    });

    let mut states = client.watch_connection();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            println!("* {}", describe_state(&state));
        }
    });

    println!("Connecting to {}...", server_url);
    if let Err(e) = client.initialize().await {
        eprintln!("Could not connect to {}: {}", server_url, e);
        println!("Use /connect to try again.");
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/contacts" => print_contacts(&client),
            "/dialog" => print_dialog(&client),
            "/state" => println!("{}", describe_state(&client.connection_state())),
            "/open" => open_contact(&client, argument),
            "/connect" => {
                if let Err(e) = client.initialize().await {
                    eprintln!("Could not connect to {}: {}", server_url, e);
                }
            }
            "/disconnect" => client.disconnect().await,
            _ if command.starts_with('/') => println!("Unknown command {}. Type /help.", command),
            _ => {
                if client.send_local_message(line).is_none() {
                    println!("Open a conversation first (/contacts, /open <name>).");
                }
            }
        }
    }

    client.disconnect().await;
    info!("murmur shutting down");
    Ok(())
}

fn describe_state(state: &ConnectionState) -> String {
    match state.phase {
        ConnectionPhase::Disconnected => "disconnected".to_string(),
        ConnectionPhase::Connecting => "connecting".to_string(),
        ConnectionPhase::Connected => "connected".to_string(),
        ConnectionPhase::Reconnecting => format!("reconnecting (attempt {})", state.reconnect_attempts),
        ConnectionPhase::Failed => format!(
            "connection lost after {} reconnect attempts, use /connect to retry",
            state.reconnect_attempts
        ),
    }
}

fn print_contacts(client: &ChatClient) {
    let contacts = client.contacts();
    if contacts.is_empty() {
        println!("No conversations yet.");
        return;
    }

    let active = client.active_contact_id();
    let now = Local::now();
    for (index, contact) in contacts.iter().enumerate() {
        let marker = if active.as_deref() == Some(contact.id.as_str()) { '*' } else { ' ' };
        let unread = match contact.unread_count {
            0 => String::new(),
            n => format!(" ({} unread)", n),
        };
        let time = contact
            .last_message_time
            .map(|t| format_message_time(t, &now))
            .unwrap_or_default();
        let preview = contact
            .last_message
            .as_ref()
            .map(|m| truncate_message(&m.text, PREVIEW_LENGTH))
            .unwrap_or_default();
        println!("{}{:>3}. {}{} {} {}", marker, index + 1, contact.name, unread, time, preview);
    }
}

fn find_contact(contacts: &[Contact], query: &str) -> Option<String> {
    if let Ok(number) = query.parse::<usize>() {
        if let Some(contact) = number.checked_sub(1).and_then(|i| contacts.get(i)) {
            return Some(contact.id.clone());
        }
    }
    contacts.iter().find(|c| c.name == query).map(|c| c.id.clone())
}

fn open_contact(client: &ChatClient, query: &str) {
    match find_contact(&client.contacts(), query) {
        Some(id) => {
            client.select_contact(&id);
            print_dialog(client);
        }
        None => println!("No contact matches '{}'.", query),
    }
}

fn print_dialog(client: &ChatClient) {
    let (Some(contact), Some(dialog)) = (client.active_contact(), client.active_dialog()) else {
        println!("No conversation open.");
        return;
    };

    println!("--- {} ---", contact.name);
    let now = Local::now();
    for message in &dialog.messages {
        println!("[{}] {}: {}", format_message_time(message.timestamp, &now), message.from, message.text);
    }
}
