use anyhow::{Context, Result};
use clap::Parser;
use matrix_sdk::{
    config::SyncSettings,
    event_handler::Ctx,
    ruma::events::room::message::{
        MessageType, OriginalSyncRoomMessageEvent, RoomMessageEventContent,
    },
    Room,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod client;
mod config;
mod metadata;
mod resolver;
mod session;

use config::BotConfig;
use metadata::{ImdsClient, InstanceMetadata};
use resolver::{IncomingMessage, Resolver};

#[derive(Parser, Debug)]
#[command(name = "ec2-metabot")]
#[command(about = "Matrix chat bot that answers keyword commands with EC2 instance metadata")]
struct Args {
    /// Env file holding the Matrix credentials
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Where the Matrix session is persisted between runs
    #[arg(long, default_value = "session.json")]
    session_file: PathBuf,

    /// Matrix sqlite store directory
    #[arg(long, default_value = "store")]
    store_path: PathBuf,

    /// Sync long-poll timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    sync_timeout_ms: u64,

    /// Base URL of the instance metadata service
    #[arg(long, default_value = "http://169.254.169.254")]
    imds_url: String,

    /// Per-request metadata timeout in milliseconds
    #[arg(long, default_value_t = 2_000)]
    imds_timeout_ms: u64,
}

/// Shared state handed to the event handler
struct BotState {
    resolver: Resolver,
    metadata: ImdsClient,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ec2_metabot=info,matrix_sdk=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting EC2 metadata bot");

    // Load environment variables from the env file, if present
    dotenvy::from_path(&args.env_file).ok();

    // Credentials must be complete before any connection is attempted
    let config = BotConfig::from_env()?;

    let imds = ImdsClient::new(&args.imds_url, Duration::from_millis(args.imds_timeout_ms))
        .context("Failed to build metadata client")?;
    probe_metadata(&imds).await;

    let table = resolver::default_table().context("Failed to register command table")?;
    info!("Registered {} commands", table.len());

    info!("Connecting to homeserver: {}", config.homeserver);
    let client = client::restore_or_login(&config, &args.session_file, &args.store_path).await?;

    let own_id = client
        .user_id()
        .context("Logged-in client has no user id")?
        .to_string();
    info!("Logged in as {}", own_id);

    let state = Arc::new(BotState {
        resolver: Resolver::new(table, own_id),
        metadata: imds,
    });
    client.add_event_handler_context(state);
    client.add_event_handler(on_room_message);

    info!("Starting sync loop...");

    let sync_settings =
        SyncSettings::default().timeout(Duration::from_millis(args.sync_timeout_ms));
    client
        .sync(sync_settings)
        .await
        .context("Sync loop failed")?;

    Ok(())
}

/// Log the instance identity once at boot. Unavailable metadata is a warning,
/// not a startup failure; the per-command apology covers it at reply time.
async fn probe_metadata(imds: &ImdsClient) {
    match tokio::try_join!(
        imds.get_region(),
        imds.get_instance_id(),
        imds.get_availability_zone(),
    ) {
        Ok((region, instance_id, zone)) => {
            info!("Region: {}", region);
            info!("Instance ID: {}", instance_id);
            info!("Availability Zone: {}", zone);
            info!(
                "The EC2 instance is located in {} within the {} region.",
                zone, region
            );
        }
        Err(e) => {
            warn!("Instance metadata unavailable at startup: {}", e);
        }
    }
}

/// Event handler for room messages
async fn on_room_message(
    event: OriginalSyncRoomMessageEvent,
    room: Room,
    Ctx(state): Ctx<Arc<BotState>>,
) {
    // Only text messages carry commands
    let MessageType::Text(text_content) = &event.content.msgtype else {
        return;
    };

    let message = IncomingMessage {
        author_id: event.sender.to_string(),
        channel_name: room.room_id().to_string(),
        raw_text: text_content.body.clone(),
    };

    info!(
        channel = %message.channel_name,
        sender = %message.author_id,
        message = %message.raw_text,
        "Received message"
    );

    let response = state.resolver.resolve(&message, &state.metadata).await;
    let Some(text) = response.into_text() else {
        return;
    };

    // A failed send is logged and dropped; it must not take down the handler
    if let Err(e) = room.send(RoomMessageEventContent::text_plain(text)).await {
        error!(
            room_id = %room.room_id(),
            error = %e,
            "Failed to send reply"
        );
    }
}
