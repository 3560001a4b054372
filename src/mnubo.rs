use async_trait::async_trait;
use base64::prelude::*;
use http::header::{AUTHORIZATION, USER_AGENT};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ForwarderError;

pub type DynSmartObjectsApi = Arc<dyn SmartObjectsApi + Send + Sync>;

/// Operations of the SmartObjects ingestion API used by the forwarder.
#[async_trait]
pub trait SmartObjectsApi {
    async fn object_exists(&self, device_id: &str) -> Result<bool, ForwarderError>;

    async fn owner_exists(&self, username: &str) -> Result<bool, ForwarderError>;

    /// Fails with [`ForwarderError::AlreadyExists`] when the device id is taken.
    async fn create_object(&self, object: Map<String, Value>) -> Result<(), ForwarderError>;

    async fn send_events(
        &self,
        events: Vec<Map<String, Value>>,
    ) -> Result<Option<Vec<EventResult>>, ForwarderError>;
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventResult {
    pub id: Option<String>,
    pub result: String,
    #[serde(rename = "objectExists")]
    pub object_exists: Option<bool>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

// RFC 3986 unreserved characters stay as they are.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// Tokens this close to expiry are requested again.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub struct MnuboClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl MnuboClient {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ForwarderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(MnuboClient {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ForwarderError> {
        MnuboClient::new(
            config.endpoint.clone(),
            config.client_id.clone().unwrap_or_default(),
            config.client_secret.clone().unwrap_or_default(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn access_token(&self) -> Result<String, ForwarderError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(current.value.clone());
            }
        }

        debug!("requesting a new mnubo access token");
        let credentials =
            BASE64_STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .http
            .post(self.url("/oauth/token"))
            .query(&[("grant_type", "client_credentials"), ("scope", "ALL")])
            .header(AUTHORIZATION, format!("Basic {}", credentials))
            .header(USER_AGENT, user_agent())
            .send()
            .await?;
        let response = check_status(response).await?;
        let granted: TokenResponse = response.json().await?;

        let value = granted.access_token.clone();
        *token = Some(AccessToken {
            value: granted.access_token,
            expires_at: Instant::now() + Duration::from_secs(granted.expires_in),
        });
        Ok(value)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ForwarderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .header(USER_AGENT, user_agent())
            .send()
            .await?;
        Ok(response)
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ForwarderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .header(USER_AGENT, user_agent())
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn exists(&self, collection: &str, key: &str) -> Result<bool, ForwarderError> {
        let path = format!("/api/v3/{}/exists/{}", collection, encode_segment(key));
        let response = check_status(self.get(&path).await?).await?;
        let answer: HashMap<String, bool> = response.json().await?;
        Ok(answer.get(key).copied().unwrap_or(false))
    }
}

#[async_trait]
impl SmartObjectsApi for MnuboClient {
    async fn object_exists(&self, device_id: &str) -> Result<bool, ForwarderError> {
        self.exists("objects", device_id).await
    }

    async fn owner_exists(&self, username: &str) -> Result<bool, ForwarderError> {
        self.exists("owners", username).await
    }

    async fn create_object(&self, object: Map<String, Value>) -> Result<(), ForwarderError> {
        let device_id = object
            .get("x_device_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let response = self.post("/api/v3/objects", &object).await?;
        let status = response.status();
        if status.is_success() {
            info!("created smart object {}", device_id);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_already_exists(status, &body) {
            return Err(ForwarderError::AlreadyExists(device_id));
        }
        Err(ForwarderError::Platform { status, body })
    }

    async fn send_events(
        &self,
        events: Vec<Map<String, Value>>,
    ) -> Result<Option<Vec<EventResult>>, ForwarderError> {
        let number_of_events = events.len();
        let start_time = Instant::now();
        let response = self
            .post("/api/v3/events?report_results=true", &events)
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;

        info!(
            "Delivered {} events to mnubo in {}ms.",
            number_of_events,
            start_time.elapsed().as_millis()
        );

        if body.trim().is_empty() {
            return Ok(None);
        }
        let results: Vec<EventResult> = serde_json::from_str(&body)?;
        for failed in results.iter().filter(|r| r.result != "success") {
            warn!(
                "mnubo rejected event {:?}: {}",
                failed.id,
                failed.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(Some(results))
    }
}

fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn is_already_exists(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::CONFLICT
        || (status == reqwest::StatusCode::BAD_REQUEST
            && body.to_lowercase().contains("already exists"))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ForwarderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ForwarderError::Platform { status, body })
}
