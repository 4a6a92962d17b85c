use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use shared::domain::{ChannelName, ClientRole, ParticipantId};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign media token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
    #[error("token service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns `Ok(None)` when the media project does not require authentication.
    async fn fetch_token(
        &self,
        channel: &ChannelName,
        local_id: Option<ParticipantId>,
        role: ClientRole,
    ) -> Result<Option<String>, TokenError>;
}

pub struct NoTokenProvider;

#[async_trait]
impl TokenProvider for NoTokenProvider {
    async fn fetch_token(
        &self,
        _channel: &ChannelName,
        _local_id: Option<ParticipantId>,
        _role: ClientRole,
    ) -> Result<Option<String>, TokenError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct SharedSecretTokenProvider {
    pub app_id: String,
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MediaClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub channel: String,
    pub uid: u32,
    pub can_publish: bool,
}

impl SharedSecretTokenProvider {
    pub fn mint(
        &self,
        channel: &ChannelName,
        local_id: Option<ParticipantId>,
        role: ClientRole,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.ttl_seconds);
        let uid = local_id.map(|id| id.0).unwrap_or_default();
        let claims = MediaClaims {
            iss: self.app_id.clone(),
            sub: format!("uid:{uid}"),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            channel: channel.as_str().to_string(),
            uid,
            can_publish: role == ClientRole::Host,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }
}

#[async_trait]
impl TokenProvider for SharedSecretTokenProvider {
    async fn fetch_token(
        &self,
        channel: &ChannelName,
        local_id: Option<ParticipantId>,
        role: ClientRole,
    ) -> Result<Option<String>, TokenError> {
        self.mint(channel, local_id, role).map(Some)
    }
}

#[cfg(test)]
#[path = "tests/token_tests.rs"]
mod tests;
