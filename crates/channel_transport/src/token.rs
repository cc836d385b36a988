//! Short-lived channel access tokens.
//!
//! Clients hold the shared channel credential and mint an HS256 token scoped
//! to one identity and one channel; the relay verifies it with the same secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::{ChannelId, Identity};
use thiserror::Error;

pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelClaims {
    pub sub: String,
    pub channel: String,
    pub iat: i64,
    pub exp: i64,
}

impl ChannelClaims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone())
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId::new(self.channel.clone())
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign channel token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("channel token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
    #[error("channel token has an empty subject or channel")]
    IncompleteClaims,
}

pub fn mint_token(
    secret: &str,
    identity: &Identity,
    channel_id: &ChannelId,
    ttl_seconds: i64,
) -> Result<String, TokenError> {
    let now = Utc::now();
    let claims = ChannelClaims {
        sub: identity.to_string(),
        channel: channel_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Sign)
}

pub fn verify_token(
    secret: &str,
    token: &str,
    leeway_seconds: u64,
) -> Result<ChannelClaims, TokenError> {
    let mut validation = Validation::default();
    validation.leeway = leeway_seconds;
    let data = decode::<ChannelClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(TokenError::Rejected)?;
    if data.claims.sub.trim().is_empty() || data.claims.channel.trim().is_empty() {
        return Err(TokenError::IncompleteClaims);
    }
    Ok(data.claims)
}
