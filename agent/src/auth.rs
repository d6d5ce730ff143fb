//! Bearer token lifecycle for the HEC API.
//!
//! The token is fetched lazily: nothing happens until a caller asks for it,
//! and it is only exchanged again once the held token has expired. The
//! check-and-refresh runs under one async lock so concurrent callers never
//! issue duplicate exchanges or see a token without its expiry.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

pub const AUTH_PATH: &str = "/auth/external";

#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    access_key: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_key: access_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    client_id: &'a str,
    access_key: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    data: AuthData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthData {
    token: String,
    expires_in: f64,
}

pub struct TokenManager {
    http: Client,
    auth_url: String,
    credentials: Credentials,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    /// `http` should already carry the request timeout.
    pub fn new(http: Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            auth_url: format!("{}{}", base_url.trim_end_matches('/'), AUTH_PATH),
            credentials,
            current: Mutex::new(None),
        }
    }

    /// Returns the held token, exchanging credentials first if there is none
    /// or it has expired.
    pub async fn get_valid_token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref() {
            if !token.is_expired_at(Utc::now()) {
                return Ok(token.clone());
            }
            debug!("Bearer token expired at {}, refreshing", token.expires_at);
        }

        let token = self.refresh().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// Drops the held token so the next call exchanges credentials again.
    pub async fn invalidate(&self) {
        if self.current.lock().await.take().is_some() {
            debug!("Bearer token invalidated");
        }
    }

    async fn refresh(&self) -> Result<Token> {
        // Sampled before the request so latency shortens the token's life
        // instead of extending it.
        let requested_at = Utc::now();

        let request = AuthRequest {
            client_id: &self.credentials.client_id,
            access_key: &self.credentials.access_key,
        };

        let response = self.http
            .post(&self.auth_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to retrieve bearer token: {}", e);
                Error::Auth(format!("token request failed: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("failed to read token response: {}", e)))?;

        if !status.is_success() {
            warn!("Token exchange rejected with status {}", status);
            return Err(Error::Auth(format!("token endpoint returned status {}", status.as_u16())));
        }

        let parsed: AuthResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Auth(format!("malformed token response: {}", e)))?;

        let data = parsed.data;
        if data.token.is_empty() {
            return Err(Error::Auth("token response carried an empty token".to_string()));
        }
        if !data.expires_in.is_finite() || data.expires_in < 0.0 {
            return Err(Error::Auth(format!("invalid expiresIn {}", data.expires_in)));
        }

        let lifetime = TimeDelta::try_milliseconds((data.expires_in * 1000.0) as i64)
            .ok_or_else(|| Error::Auth(format!("expiresIn {} out of range", data.expires_in)))?;
        let expires_at = requested_at
            .checked_add_signed(lifetime)
            .ok_or_else(|| Error::Auth(format!("expiresIn {} out of range", data.expires_in)))?;

        info!("Bearer token retrieved successfully (expires {})", expires_at);

        Ok(Token {
            value: data.token,
            expires_at,
        })
    }
}
