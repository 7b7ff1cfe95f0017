//! Backend API client.
//!
//! Three call families, mirroring the product backend:
//!
//! | Call | Shape |
//! |------|-------|
//! | realtime token | `POST {speech_auth_url}/v1/api_keys?type=rt`, bearer API key, body `{"ttl": 3600}` |
//! | persist transcript | `PUT {base_url}/conversations/{id}`, bearer access token, body `{"id", "transcript"}` |
//! | prediction stream | `POST {base_url}/conversations/{id}/prediction_stream`, same body, NDJSON response |
//!
//! The client holds no per-recording state; it is shared (`Arc`) between the
//! recording session and the prediction controller.

pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{HeardError, Result};
use crate::reconcile::TranscriptSegment;
use stream::api_error;

/// Endpoints and credentials for the backend and the realtime service.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Product backend base URL.
    pub base_url: String,
    /// Realtime speech service key-exchange base URL.
    pub speech_auth_url: String,
    /// Long-lived realtime service API key, exchanged for short-lived
    /// session tokens.
    pub speech_api_key: Option<String>,
    /// Bearer token for the product backend, when the user is signed in.
    pub access_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://heard.onrender.com".into(),
            speech_auth_url: "https://mp.speechmatics.com".into(),
            speech_api_key: None,
            access_token: None,
        }
    }
}

/// A stored conversation as echoed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptSegment>,
}

/// Body shared by the persistence update and the prediction request.
#[derive(Debug, Serialize)]
struct TranscriptPayload<'a> {
    id: i64,
    transcript: &'a [TranscriptSegment],
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    key_value: String,
}

/// HTTP client for the product backend and the realtime token exchange.
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(HeardError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Replace the backend bearer token (sign-in / refresh is handled by
    /// the embedding application).
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.config.access_token = token;
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Exchange the long-lived realtime API key for a short-lived session
    /// token.
    ///
    /// # Errors
    /// `HeardError::TokenFetch` when no key is configured or the exchange
    /// is rejected; setup errors are fatal to starting a recording.
    pub async fn fetch_speech_token(&self) -> Result<String> {
        let api_key = self
            .config
            .speech_api_key
            .as_deref()
            .ok_or_else(|| HeardError::TokenFetch("realtime API key not configured".into()))?;

        let url = format!("{}/v1/api_keys?type=rt", self.config.speech_auth_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "ttl": 3600 }))
            .send()
            .await
            .map_err(|e| HeardError::TokenFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HeardError::TokenFetch(format!(
                "status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| HeardError::TokenFetch(e.to_string()))?;
        debug!("realtime session token issued");
        Ok(token.key_value)
    }

    /// Persist the full segment list for a conversation. The response
    /// echoes the stored conversation.
    pub async fn update_transcript(
        &self,
        conversation_id: i64,
        segments: &[TranscriptSegment],
    ) -> Result<Conversation> {
        let url = format!("{}/conversations/{conversation_id}", self.config.base_url);
        let response = self
            .authed(self.http.put(&url))
            .json(&TranscriptPayload {
                id: conversation_id,
                transcript: segments,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        Ok(response.json().await?)
    }

    /// Open the prediction stream for a conversation and deliver its
    /// newline-delimited JSON payloads through the callbacks. See
    /// [`stream::stream_json_lines`] for the callback contract.
    pub async fn stream_prediction<D, E, C>(
        &self,
        conversation_id: i64,
        segments: &[TranscriptSegment],
        on_data: D,
        on_error: E,
        on_complete: C,
    ) where
        D: FnMut(Value),
        E: FnOnce(HeardError),
        C: FnOnce(),
    {
        let url = format!(
            "{}/conversations/{conversation_id}/prediction_stream",
            self.config.base_url
        );
        let request = self
            .authed(self.http.post(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&TranscriptPayload {
                id: conversation_id,
                transcript: segments,
            });

        stream::stream_json_lines(request, on_data, on_error, on_complete).await;
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}
