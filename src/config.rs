use anyhow::{bail, Context, Result};

/// Credentials the bot needs before it will attempt any connection.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub homeserver: String,
    pub username: String,
    pub password: String,
}

impl BotConfig {
    /// Reads the configuration from the environment. A missing or empty
    /// value is a fatal startup error with an explicit diagnostic.
    pub fn from_env() -> Result<Self> {
        let homeserver = required("MATRIX_HOMESERVER")?;
        let username = required("MATRIX_USER")?;
        let password = required("MATRIX_PASSWORD")?;
        Ok(Self {
            homeserver,
            username,
            password,
        })
    }
}

fn required(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .with_context(|| format!("{name} environment variable not set"))?;
    if value.trim().is_empty() {
        bail!("{name} environment variable is empty");
    }
    Ok(value)
}
