//! Service account authentication for Google APIs.
//!
//! Signs an RS256 JWT assertion with the service account key and exchanges
//! it for a short-lived bearer token.

use std::path::Path;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

pub const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Fields of a service account key file that the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| EtlError::Config(format!("invalid service account key {}: {e}", path.display())))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleAuth {
    http: reqwest::Client,
    key: ServiceAccountKey,
}

impl GoogleAuth {
    pub fn new(http: reqwest::Client, key: ServiceAccountKey) -> Self {
        Self { http, key }
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            iss: self.key.client_email.clone(),
            scope: SCOPES.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| EtlError::Auth(format!("invalid private key: {e}")))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| EtlError::Auth(format!("cannot sign assertion: {e}")))
    }

    /// Exchanges a signed assertion for a bearer token.
    pub async fn fetch_token(&self) -> Result<String> {
        let assertion = self.assertion(Utc::now())?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EtlError::Auth(format!("token exchange failed ({status}): {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| EtlError::Auth(format!("token response parse failed: {e}")))?;
        tracing::debug!(client_email = %self.key.client_email, "obtained Google access token");
        Ok(token.access_token)
    }
}
