//! Courier command-line client.
//!
//! # Usage
//!
//! ```bash
//! # Stay connected and keep the local directory in sync
//! courier --server chat.example.com:4433 --auth-token $TOKEN run
//!
//! # Send one message and exit
//! courier --auth-token $TOKEN send bob "see you at noon"
//!
//! # Inspect the local database
//! courier --db courier.redb status
//! ```

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use clap::{Parser, Subcommand};
use courier_client::{ClientConfig, PassthroughCodec, QuicConfig, QuicTransport, Session};
use courier_core::ConnectionState;
use courier_store::{DirectoryStore, MessageStore, RedbStorage};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type CliSession = Session<QuicTransport, RedbStorage, PassthroughCodec>;

/// Courier client
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Reliable directory sync and message delivery client")]
#[command(version)]
struct Args {
    /// Server address (`host:port`); repeat to configure failover
    #[arg(short, long = "server", default_value = "127.0.0.1:4433")]
    servers: Vec<String>,

    /// Name checked against the server certificate
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Credential presented during the handshake
    #[arg(long, env = "COURIER_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Path to the local database
    #[arg(long, default_value = "courier.redb")]
    db: String,

    /// Local account id used as the sender of outgoing messages
    #[arg(long, default_value = "me")]
    user_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Stay connected until interrupted
    Run,
    /// Send a text message and exit
    Send {
        /// Conversation to post into
        conversation: String,
        /// Message text
        body: String,
    },
    /// Print a summary of the local database
    Status,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            transport: QuicConfig {
                servers: self.servers.clone(),
                server_name: self.server_name.clone(),
                auth_token: self.auth_token.clone(),
                ..QuicConfig::default()
            },
            ..ClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let store = RedbStorage::open(&args.db)?;

    match &args.command {
        Command::Status => status(&store)?,
        Command::Run => {
            let session = start_session(&args, store)?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupted, shutting down");

            session.shutdown().await;
        },
        Command::Send { conversation, body } => {
            let session = start_session(&args, store)?;

            let mut states = session.subscribe_state();
            let connected = tokio::time::timeout(
                Duration::from_secs(30),
                states.wait_for(|s| *s == ConnectionState::Connected),
            )
            .await
            .is_ok_and(|state| state.is_ok());

            let result: Result<_, Box<dyn std::error::Error>> = if connected {
                let timestamp = unix_millis();
                session.router().send_text(conversation, body, timestamp).await.map_err(Into::into)
            } else {
                Err(format!("not connected: {}", session.state()).into())
            };

            session.shutdown().await;
            let record = result?;
            tracing::info!(message_id = %record.id, status = ?record.send_status, "message sent");
        },
    }

    Ok(())
}

fn start_session(
    args: &Args,
    store: RedbStorage,
) -> Result<CliSession, Box<dyn std::error::Error>> {
    let config = args.client_config();
    let (transport, events) = QuicTransport::new(config.transport.clone())?;

    tracing::info!(servers = ?config.transport.servers, "courier starting");

    let session = Session::start(
        &config,
        Arc::new(transport),
        events,
        store,
        Arc::new(PassthroughCodec),
        args.user_id.as_str(),
    )?;

    Ok(session)
}

fn status(store: &RedbStorage) -> Result<(), Box<dyn std::error::Error>> {
    let version = store.directory_version()?;
    let contacts = store.contacts()?.len();
    let conversations = store.conversations()?;

    tracing::info!(version, contacts, conversations = conversations.len(), "local database");
    for conversation in &conversations {
        tracing::info!(
            id = %conversation.id,
            last_active_at = conversation.last_active_at,
            unread = store.unread_count(&conversation.id)?,
            "conversation"
        );
    }

    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
