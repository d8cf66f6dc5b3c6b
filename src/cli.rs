//! Chat Coordinator - CLI Tool
//!
//! Command-line chat against a running coordinator.

use anyhow::Result;
use chat_coordinator::client::ChatClient;
use chat_coordinator::session::{ExternalSessionState, MemoryNavigation, SessionId};
use chat_coordinator::stream::SanitizerKind;
use chat_coordinator::transcript::Role;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chatctl")]
#[command(about = "CLI for the Chat Coordinator")]
struct Cli {
    /// Coordinator server URL
    #[arg(long, env = "COORDINATOR_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Cookie header forwarded to the backend
    #[arg(long, env = "CHAT_COOKIE")]
    cookie: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and print the streamed reply
    Send {
        /// Message text
        message: String,

        /// Continue an existing session (a new one is created otherwise)
        #[arg(short, long)]
        session: Option<String>,

        /// Broker the message is routed to
        #[arg(short, long, env = "CHAT_BROKER_ID")]
        broker: Option<String>,

        /// Print the reply exactly as relayed (no client-side emoji stripping)
        #[arg(long)]
        raw: bool,
    },

    /// List sessions
    Sessions,

    /// Print the transcript of a session
    History {
        /// Session ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            message,
            session,
            broker,
            raw,
        } => {
            let initial = match session {
                Some(id) => ExternalSessionState::session(id),
                None => ExternalSessionState::new_chat(),
            };
            let mut builder = ChatClient::builder(&cli.server)
                .navigation(Arc::new(MemoryNavigation::new(initial)))
                .on_session_created(|id| eprintln!("[session {}]", id));
            if let Some(broker) = broker {
                builder = builder.broker_id(broker);
            }
            if let Some(cookie) = cli.cookie {
                builder = builder.cookie(cookie);
            }
            if raw {
                builder = builder.sanitizer(SanitizerKind::None.build());
            }
            let client = builder.build()?;

            let mut stdout = std::io::stdout();
            let reply = client
                .send_streaming(&message, |chunk| {
                    let _ = write!(stdout, "{}", chunk);
                    let _ = stdout.flush();
                })
                .await?;
            println!();
            eprintln!("[session {}]", reply.session_id);
        }

        Commands::Sessions => {
            let client = client_for(&cli.server, cli.cookie)?;
            let sessions = client.list_sessions().await?;

            println!("{:<40} {}", "SESSION", "STARTED");
            println!("{}", "-".repeat(72));
            for session in sessions {
                println!("{:<40} {}", session.session_id, session.started_at);
            }
        }

        Commands::History { id } => {
            let client = client_for(&cli.server, cli.cookie)?;
            let messages = client.open_session(&SessionId::from(id)).await?;

            if messages.is_empty() {
                println!("No messages");
            }
            for message in messages {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("[{}] {}: {}", message.seq, who, message.content);
            }
        }
    }

    Ok(())
}

fn client_for(server: &str, cookie: Option<String>) -> Result<ChatClient> {
    let mut builder = ChatClient::builder(server);
    if let Some(cookie) = cookie {
        builder = builder.cookie(cookie);
    }
    Ok(builder.build()?)
}
