// mot-summary-rs/src/mot_client.rs
//
// HTTP client for the MOT history trade API
//
// This module provides:
// - OAuth2 client-credentials token acquisition
// - Vehicle MOT history retrieval by registration number
// - Error classification that keeps upstream causes out of client responses
//
// Configuration (.env file):
// - MOT_TOKEN_URL: OAuth2 token endpoint
// - MOT_CLIENT_ID / MOT_CLIENT_SECRET: client-credentials pair
// - MOT_SCOPE_URL: scope requested in the token grant
// - MOT_API_KEY: X-Api-Key header value for the history endpoint
// - MOT_API_URL: base URL of the history API (defaults to the gov.uk host)

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Timeout applied to every outbound call (token fetch and history GET).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound calls are fail-fast: a failed token fetch or history GET is
/// reported, never retried.
pub const MAX_RETRIES: u32 = 0;

const DEFAULT_API_URL: &str = "https://history.mot.api.gov.uk";

// Custom error type for MOT API operations
#[derive(Debug)]
pub enum MotApiError {
    Config(String),   // Missing or malformed credentials in the environment
    Auth(String),     // Token acquisition failed or the token is unusable
    Upstream(String), // History API returned non-2xx or the network failed
    Parse(String),    // Response body did not match the expected shape
}

impl std::fmt::Display for MotApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MotApiError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MotApiError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            MotApiError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            MotApiError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for MotApiError {}

/// Credentials for the MOT API, loaded once and immutable afterwards.
/// Field values are secrets and must never appear in logs.
#[derive(Debug, Clone)]
pub struct MotCredentials {
    client_id: String,
    client_secret: String,
    scope: String,
    token_url: String,
    api_key: String,
}

impl MotCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        token_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            token_url: token_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Load credentials from environment variables.
    pub fn from_env() -> Result<Self, MotApiError> {
        let require = |name: &str| {
            env::var(name)
                .map_err(|_| MotApiError::Config(format!("{} is not set", name)))
        };

        Ok(Self {
            client_id: require("MOT_CLIENT_ID")?,
            client_secret: require("MOT_CLIENT_SECRET")?,
            scope: require("MOT_SCOPE_URL")?,
            token_url: require("MOT_TOKEN_URL")?,
            api_key: require("MOT_API_KEY")?,
        })
    }
}

/// Opaque bearer token for the history API. Fetched fresh for every
/// fetch session, never cached.
#[derive(Debug, Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    scope: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Vehicle record as returned by the history endpoint. Header fields are
/// optional and default to "Unknown" at render time; individual MOT tests
/// stay raw JSON here so one malformed record can be dropped during
/// validation without failing the whole fetch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VehicleRecord {
    pub registration: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub first_used_date: Option<String>,
    pub mot_tests: Vec<serde_json::Value>,
}

#[derive(Debug)]
pub struct MotClient {
    client: Client,
    credentials: MotCredentials,
    base_url: String,
}

impl MotClient {
    /// Creates a client with credentials from the environment.
    pub fn new() -> Result<Self, MotApiError> {
        let credentials = MotCredentials::from_env()?;
        let base_url = env::var("MOT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::with_credentials(credentials, base_url)
    }

    pub fn with_credentials(
        credentials: MotCredentials,
        base_url: String,
    ) -> Result<Self, MotApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| MotApiError::Config(format!("failed to build HTTP client: {}", err)))?;

        Ok(Self {
            client,
            credentials,
            base_url,
        })
    }

    /// Exchange client credentials for a bearer token.
    ///
    /// A response without a usable `access_token` field is treated as an
    /// auth failure here rather than handing an empty token to the caller.
    pub async fn obtain_token(&self) -> Result<AccessToken, MotApiError> {
        let body = TokenRequest {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            scope: &self.credentials.scope,
            grant_type: "client_credentials",
        };

        let response = self
            .client
            .post(&self.credentials.token_url)
            .form(&body)
            .send()
            .await
            .map_err(|err| {
                log::error!("Error obtaining access token: {}", err);
                MotApiError::Auth("token request failed".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            log::error!("Token endpoint returned status {}", status);
            return Err(MotApiError::Auth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token_data: TokenResponse = response.json().await.map_err(|err| {
            log::error!("Failed to parse token response: {}", err);
            MotApiError::Auth("token response was not valid JSON".to_string())
        })?;

        match token_data.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => {
                log::error!("Token response did not contain an access_token");
                Err(MotApiError::Auth(
                    "token response missing access_token".to_string(),
                ))
            }
        }
    }

    /// Fetch the MOT history for a registration number.
    ///
    /// An empty token fails immediately with an auth error; no GET is
    /// attempted.
    pub async fn fetch_vehicle(
        &self,
        registration: &str,
        token: &AccessToken,
    ) -> Result<VehicleRecord, MotApiError> {
        if token.is_empty() {
            log::error!("No access token available. Unable to fetch vehicle data.");
            return Err(MotApiError::Auth("access token is empty".to_string()));
        }

        let url = format!(
            "{}/v1/trade/vehicles/registration/{}",
            self.base_url, registration
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token.as_str()))
            .header("Accept", "application/json")
            .header("X-Api-Key", &self.credentials.api_key)
            .send()
            .await
            .map_err(|err| {
                log::error!("Error fetching vehicle data: {}", err);
                MotApiError::Upstream("vehicle history request failed".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            log::error!("Vehicle history endpoint returned status {}", status);
            return Err(MotApiError::Upstream(format!(
                "vehicle history endpoint returned {}",
                status
            )));
        }

        response.json::<VehicleRecord>().await.map_err(|err| {
            log::error!("Failed to parse vehicle history response: {}", err);
            MotApiError::Parse("vehicle history response was not valid JSON".to_string())
        })
    }
}
