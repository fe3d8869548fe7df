/// anonchat - anonymous room chat on a local message store
use anonchat_core::ai::CannedAssistant;
use anonchat_core::identity::AnonymousIdentity;
use anonchat_core::sync::ViewSnapshot;
use anonchat_core::{ChatClient, ChatError, Config, LocalStore, MessageKind, RoomEvent};
use colored::*;
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let store = Arc::new(
        LocalStore::open(&data_dir).map_err(|e| anyhow::anyhow!("Store error: {}", e))?,
    );
    let identity = match &config.display_name {
        Some(name) => AnonymousIdentity::with_name(name.clone()),
        None => AnonymousIdentity::new(),
    };
    let room_id = config.room_id.clone();
    let seed = config.assistant_seed;
    info!("🚀 Starting anonchat in {}", data_dir.display());

    let mut client = ChatClient::new(config, store, Arc::new(identity))
        .with_assistant(Arc::new(CannedAssistant::new(seed)));
    let events = tokio::spawn(print_events(client.events()));

    client
        .join(&room_id)
        .await
        .map_err(|e| anyhow::anyhow!("Join error: {}", e))?;
    if let Some(me) = client.identity() {
        println!(
            "{} Joined {} as {}",
            "✓".green().bold(),
            room_id.bright_cyan(),
            me.display_name.bold()
        );
    }
    print_help();
    let mut printer = watch_room(&client);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => break,
            ("/help", _) => print_help(),
            ("/leave", _) => {
                client.leave();
                printer.abort();
                println!("{}", "Left the room. /join <room> to come back".yellow());
            }
            ("/retry", _) => {
                match client.retry().await {
                    Ok(()) => println!("{} Reconnected", "✓".green().bold()),
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
                }
                printer.abort();
                printer = watch_room(&client);
            }
            ("/join", room) => {
                match client.join(room).await {
                    Ok(()) => println!("{} Joined {}", "✓".green().bold(), room.bright_cyan()),
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
                }
                printer.abort();
                printer = watch_room(&client);
            }
            (command, _) if command.starts_with('/') => {
                eprintln!("{}", format!("Unknown command: {}", command).yellow());
            }
            _ => match client.send(line).await {
                Ok(_) => {}
                Err(ChatError::AutoBanned) => {
                    eprintln!("{}", "🚫 You have been banned from this session".red().bold());
                    break;
                }
                Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
            },
        }
    }

    client.leave();
    printer.abort();
    events.abort();
    Ok(())
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  /join <room>   Switch rooms");
    println!("  /leave         Leave the current room");
    println!("  /retry         Reconnect after an error");
    println!("  /quit          Exit");
}

/// Print confirmed messages of the current room as they arrive
fn watch_room(client: &ChatClient) -> JoinHandle<()> {
    let view = client.room().map(|room| room.watch_view());
    let me = client.identity().map(|i| i.uid.clone()).unwrap_or_default();
    tokio::spawn(async move {
        if let Some(view) = view {
            print_view(view, me).await;
        }
    })
}

async fn print_view(mut view: watch::Receiver<ViewSnapshot>, me: String) {
    let mut seen = HashSet::new();
    loop {
        let snapshot = view.borrow_and_update().clone();
        for message in snapshot.iter().filter(|m| !m.pending) {
            if !seen.insert(message.key.id.clone()) {
                continue;
            }
            let time = message.created_at.format("%H:%M");
            let author = match message.kind {
                MessageKind::Assistant => message.author_label().bright_magenta().bold(),
                MessageKind::System => message.author_label().dimmed(),
                MessageKind::User if message.author_id == me => message.author_label().green().bold(),
                MessageKind::User => message.author_label().bright_cyan().bold(),
            };
            println!("{} {} {}", time.to_string().dimmed(), author, message.content);
        }
        if view.changed().await.is_err() {
            break;
        }
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<RoomEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            RoomEvent::Warning {
                message,
                warning_count,
            } => eprintln!(
                "{} {} ({} warnings)",
                "⚠".yellow().bold(),
                message.yellow(),
                warning_count
            ),
            RoomEvent::Blocked {
                message,
                warning_count,
            } => eprintln!(
                "{} {} ({} warnings)",
                "✗".red().bold(),
                message.red(),
                warning_count
            ),
            RoomEvent::SendFailed {
                restored_text,
                reason,
                ..
            } => {
                eprintln!("{} Not sent: {}", "✗".red().bold(), reason);
                eprintln!("  {} {}", "restored:".dimmed(), restored_text);
            }
            RoomEvent::StreamError { reason, .. } => eprintln!(
                "{} Stream error: {} (type /retry)",
                "⚠".yellow().bold(),
                reason
            ),
            RoomEvent::ConnectionChanged { state } => {
                info!("Connection is now {:?}", state);
            }
            RoomEvent::ViewUpdated { .. } | RoomEvent::AutoBanned { .. } => {}
        }
    }
}
