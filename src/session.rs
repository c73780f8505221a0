use anyhow::{Context, Result};
use matrix_sdk::{authentication::matrix::MatrixSession, AuthSession, Client};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Client configuration for persistence
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSession {
    pub homeserver: String,
    pub db_path: String,
}

/// Full session data that we persist to disk
#[derive(Debug, Serialize, Deserialize)]
pub struct FullSession {
    pub client_session: ClientSession,
    pub user_session: MatrixSession,
}

/// Load session from file
pub async fn load_session(session_file: &PathBuf) -> Result<FullSession> {
    let data = tokio::fs::read_to_string(session_file).await?;
    let session: FullSession = serde_json::from_str(&data)?;
    Ok(session)
}

/// Save the current client session to file
pub async fn save_client_session(
    client: &Client,
    session_file: &PathBuf,
    homeserver: &str,
    store_path: &str,
) -> Result<()> {
    let Some(AuthSession::Matrix(user_session)) = client.session() else {
        anyhow::bail!("No active Matrix session to save");
    };

    let full_session = FullSession {
        client_session: ClientSession {
            homeserver: homeserver.to_string(),
            db_path: store_path.to_string(),
        },
        user_session,
    };

    let data = serde_json::to_string_pretty(&full_session)?;
    tokio::fs::write(session_file, data)
        .await
        .context("Failed to save session")?;
    info!("Session saved to: {:?}", session_file);
    Ok(())
}
