use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_TTL_SECONDS: &str = "21600";

/// One of the instance identity facts the bot can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fact {
    Region,
    PublicIpv4,
    AvailabilityZone,
    InstanceId,
    InstanceType,
}

impl Fact {
    /// Path under `latest/meta-data/` on the metadata service.
    pub fn path(&self) -> &'static str {
        match self {
            Fact::Region => "placement/region",
            Fact::PublicIpv4 => "public-ipv4",
            Fact::AvailabilityZone => "placement/availability-zone",
            Fact::InstanceId => "instance-id",
            Fact::InstanceType => "instance-type",
        }
    }

    /// Placeholder key used in composite reply templates.
    pub fn key(&self) -> &'static str {
        match self {
            Fact::Region => "region",
            Fact::PublicIpv4 => "public_ip",
            Fact::AvailabilityZone => "availability_zone",
            Fact::InstanceId => "instance_id",
            Fact::InstanceType => "instance_type",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metadata service returned {status} for {path}")]
    Status { status: StatusCode, path: &'static str },
    #[error("metadata service rejected the session token")]
    TokenRejected,
}

/// Read-only source of instance identity facts.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn fetch(&self, fact: Fact) -> Result<String, MetadataError>;

    async fn get_region(&self) -> Result<String, MetadataError> {
        self.fetch(Fact::Region).await
    }

    async fn get_public_ipv4(&self) -> Result<String, MetadataError> {
        self.fetch(Fact::PublicIpv4).await
    }

    async fn get_availability_zone(&self) -> Result<String, MetadataError> {
        self.fetch(Fact::AvailabilityZone).await
    }

    async fn get_instance_id(&self) -> Result<String, MetadataError> {
        self.fetch(Fact::InstanceId).await
    }

    async fn get_instance_type(&self) -> Result<String, MetadataError> {
        self.fetch(Fact::InstanceType).await
    }
}

/// IMDSv2 client: fetches a session token on first use, then reads facts
/// with it. The token is cached and refetched once if the service rejects it.
pub struct ImdsClient {
    http: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
}

impl ImdsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    fn meta_url(&self, path: &str) -> String {
        format!("{}/latest/meta-data/{}", self.base_url, path)
    }

    fn token_url(&self) -> String {
        format!("{}/latest/api/token", self.base_url)
    }

    async fn request_token(&self) -> Result<String, MetadataError> {
        let response = self
            .http
            .put(self.token_url())
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status {
                status: response.status(),
                path: "api/token",
            });
        }
        Ok(response.text().await?)
    }

    /// Returns the cached session token, fetching one if none is held yet.
    async fn session_token(&self) -> Result<String, MetadataError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        debug!("Requesting new IMDSv2 session token");
        let token = self.request_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn read_fact(&self, fact: Fact, token: &str) -> Result<String, MetadataError> {
        let response = self
            .http
            .get(self.meta_url(fact.path()))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::UNAUTHORIZED => Err(MetadataError::TokenRejected),
            status => Err(MetadataError::Status {
                status,
                path: fact.path(),
            }),
        }
    }
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    async fn fetch(&self, fact: Fact) -> Result<String, MetadataError> {
        let token = self.session_token().await?;
        match self.read_fact(fact, &token).await {
            Err(MetadataError::TokenRejected) => {
                // Expired token: drop it and retry once with a fresh one.
                self.token.lock().await.take();
                let token = self.session_token().await?;
                self.read_fact(fact, &token).await
            }
            other => other,
        }
    }
}
