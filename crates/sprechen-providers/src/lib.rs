//! Gemini client for the vocabulary trainer.
//!
//! A single [`GeminiClient`] holds the API key and HTTP connection pool. It is
//! built once at startup and handed to both the realtime provider
//! ([`gemini_live::GeminiLiveProvider`]) and the request/response media client
//! ([`gemini_media::GeminiMediaClient`]).

pub mod gemini_live;
pub mod gemini_media;
mod wire;

use std::fmt;

use sprechen_core::config::Config;

pub use gemini_live::GeminiLiveProvider;
pub use gemini_media::GeminiMediaClient;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const LIVE_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Connection details shared by every Gemini call.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Build from config: the `google` provider entry, or the API key env vars.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.google_api_key().ok_or_else(|| {
            anyhow::anyhow!(
                "No Gemini API key found. Set GEMINI_API_KEY or configure the 'google' provider."
            )
        })?;
        let base_url = config
            .provider("google")
            .and_then(|p| p.base_url.as_deref());
        Ok(Self::new(api_key, base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// WebSocket URL of the Live (`BidiGenerateContent`) endpoint.
    pub fn live_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}{LIVE_PATH}?key={}", self.api_key)
    }

    /// URL of `models/{model}:generateContent`.
    pub fn generate_content_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url,
            model.trim_start_matches("models/"),
            self.api_key
        )
    }
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}
