use anyhow::{Context, Result};
use matrix_sdk::Client;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::session;

/// Build a Matrix client backed by a local sqlite store
pub async fn build_client(homeserver: &str, store_path: &PathBuf) -> Result<Client> {
    Client::builder()
        .homeserver_url(homeserver)
        .sqlite_store(store_path, None)
        .build()
        .await
        .context("Failed to create Matrix client")
}

/// Restore session from file or fall back to fresh login
pub async fn restore_or_login(
    config: &BotConfig,
    session_file: &PathBuf,
    store_path: &PathBuf,
) -> Result<Client> {
    if session_file.exists() {
        info!("Found saved session file, attempting to restore...");
        match session::load_session(session_file).await {
            Ok(full_session) => {
                info!(
                    user_id = %full_session.user_session.meta.user_id,
                    device_id = %full_session.user_session.meta.device_id,
                    "Session file loaded"
                );
                let client =
                    build_client(&full_session.client_session.homeserver, store_path).await?;
                client
                    .restore_session(full_session.user_session)
                    .await
                    .context("Failed to restore session")?;
                info!("✓ Session restored");
                return Ok(client);
            }
            Err(e) => {
                warn!("Failed to load session file, performing fresh login: {}", e);
            }
        }
    }

    fresh_login(config, session_file, store_path).await
}

/// Perform fresh login and save the session
pub async fn fresh_login(
    config: &BotConfig,
    session_file: &PathBuf,
    store_path: &PathBuf,
) -> Result<Client> {
    let client = build_client(&config.homeserver, store_path).await?;

    info!("Logging in as: {}", config.username);
    client
        .matrix_auth()
        .login_username(&config.username, &config.password)
        .initial_device_display_name("EC2 Metadata Bot")
        .await
        .context("Failed to login")?;

    info!("✓ Successfully logged in");

    let store_path = store_path.to_string_lossy().to_string();
    session::save_client_session(&client, session_file, &config.homeserver, &store_path).await?;

    Ok(client)
}
