//! Challenge client - command line entry point
//!
//! Thin shell over the library: issue API calls through the authenticated
//! pipeline, join a chat room, or manage the stored token.

use clap::Parser;
use reqwest::Method;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use challenge_client::{
    config::{Args, Command},
    session::{FileTokenStore, LoginRedirect, MemoryTokenStore, SessionEvent, TokenStore},
    ApiClient, ChatConfig, ChatSocket, ClientConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("challenge_client={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn TokenStore> = match &args.token_store {
        Some(path) => Arc::new(FileTokenStore::open(path.clone())?),
        None => {
            warn!("TOKEN_STORE not set, credentials live in memory only");
            Arc::new(MemoryTokenStore::new())
        }
    };
    if let Some(device_id) = &args.device_id {
        store.set_device_id(device_id)?;
    }

    let config = ClientConfig::from_args(&args)?;
    let client = ApiClient::connect(config.clone(), store)?;
    let device_id = client.session().ensure_device_id()?;
    info!(api = %config.base_url, chat = %config.chat_url, device_id = %device_id, "Client ready");

    spawn_session_watcher(&client, &config);

    match args.command {
        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut request = client.request(method, &path)?;
            if let Some(body) = body {
                let value: serde_json::Value = serde_json::from_str(&body)?;
                request = request.json(&value)?;
            }
            let response = client.execute(request).await?;
            info!(status = %response.status, "Request completed");
            println!("{}", response.text());
        }
        Command::Chat { room } => {
            run_chat(&client, &config, room).await?;
        }
        Command::Login { token } => {
            client.session().login(&token)?;
            println!("Access token stored");
        }
        Command::Logout => {
            client.session().logout()?;
            println!("Logged out");
        }
    }

    Ok(())
}

/// Log session expiry and where the user would be sent to sign in again
fn spawn_session_watcher(client: &ApiClient, config: &ClientConfig) {
    let mut events = client.session().subscribe();
    let redirect = LoginRedirect::new(config.login_path.clone());

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Expired { reason, .. } => {
                    warn!(reason = %reason, "Session expired");
                    if let Some(target) = redirect.target("/") {
                        eprintln!("Session expired, please sign in again at {}", target);
                    }
                }
                SessionEvent::Refreshed { .. } => info!("Session refreshed"),
                SessionEvent::LoggedOut { .. } => info!("Session closed"),
            }
        }
    });
}

/// Relay stdin lines into the room and print inbound frames until EOF
async fn run_chat(client: &ApiClient, config: &ClientConfig, room: String) -> anyhow::Result<()> {
    let (socket, mut inbound) = ChatSocket::connect(
        ChatConfig::from_client_config(config, room),
        Arc::clone(client.session()),
    );

    let printer = tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            println!("{}", frame);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        socket.send(line);
    }

    socket.shutdown().await;
    let _ = printer.await;
    Ok(())
}
