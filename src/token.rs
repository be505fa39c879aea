// ABOUTME: Credential provider capability: service-account bearer tokens
// ABOUTME: Signs an RS256 JWT and exchanges it at Google's token endpoint

use crate::config::DriveConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google caps service-account JWTs at one hour
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// Tokens are considered stale this long before their actual expiry
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Total timeout on the token exchange call
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability boundary: "get a bearer token for scope X"
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self, scopes: &str) -> Result<String>;
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

impl CachedToken {
    fn is_fresh(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }
}

pub struct ServiceAccountTokenProvider {
    http: reqwest::Client,
    client_email: String,
    encoding_key: EncodingKey,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenProvider")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenProvider {
    /// Parses the private key up front so a malformed PEM fails at startup
    pub fn new(http: reqwest::Client, config: &DriveConfig) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes())
            .map_err(|e| {
                RelayError::Configuration(format!("GDRIVE_PRIVATE_KEY is not a valid RSA PEM: {}", e))
            })?;
        Ok(Self {
            http,
            client_email: config.client_email.clone(),
            encoding_key,
            cache: Mutex::new(None),
        })
    }

    fn signed_assertion(&self, scopes: &str, now: u64) -> Result<String> {
        let claims = Claims {
            iss: &self.client_email,
            scope: scopes,
            aud: TOKEN_ENDPOINT,
            iat: now,
            exp: now + ASSERTION_LIFETIME.as_secs(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| RelayError::Configuration(format!("Failed to sign assertion: {}", e)))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn bearer_token(&self, scopes: &str) -> Result<String> {
        let now = SystemTime::now();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh(now) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let epoch_secs = now.duration_since(UNIX_EPOCH).unwrap().as_secs();
        let assertion = self.signed_assertion(scopes, epoch_secs)?;

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .timeout(EXCHANGE_TIMEOUT)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| RelayError::upstream(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::upstream_status(
                format!("Token endpoint returned {}: {}", status.as_u16(), body),
                status.as_u16(),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            RelayError::upstream(format!("Token endpoint returned an unexpected shape: {}", e))
        })?;

        debug!("obtained bearer token, expires in {}s", token.expires_in);

        let expires_at =
            now + Duration::from_secs(token.expires_in.saturating_sub(EXPIRY_SLACK.as_secs()));
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_wire_shape() {
        let claims = Claims {
            iss: "svc@proj.iam.gserviceaccount.com",
            scope: "https://www.googleapis.com/auth/drive",
            aud: TOKEN_ENDPOINT,
            iat: 1000,
            exp: 4600,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["iss"], "svc@proj.iam.gserviceaccount.com");
        assert_eq!(json["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(json["exp"], 4600);
    }

    #[test]
    fn test_cached_token_freshness() {
        let now = SystemTime::now();
        let fresh = CachedToken {
            token: "t".into(),
            expires_at: now + Duration::from_secs(10),
        };
        let stale = CachedToken {
            token: "t".into(),
            expires_at: now - Duration::from_secs(10),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }

    #[test]
    fn test_rejects_malformed_private_key_at_construction() {
        let config = DriveConfig {
            client_email: "svc@proj.iam.gserviceaccount.com".into(),
            private_key_pem: "not a pem".into(),
            folder_id: None,
        };
        let err = ServiceAccountTokenProvider::new(reqwest::Client::new(), &config).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
