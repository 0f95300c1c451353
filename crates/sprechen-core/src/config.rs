//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SprechenError};
use crate::protocol::{LiveConfig, Modality};

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_LIVE_VOICE: &str = "Zephyr";
pub const DEFAULT_TUTOR_INSTRUCTION: &str = "You are a friendly German tutor helping a student practice pronunciation. Speak clearly and simply in German. If the user makes a mistake, gently correct them in Turkish but then switch back to German. Keep sentences short.";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_TTS_VOICE: &str = "Kore";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gemini-2.5-flash";

/// Top-level Sprechen configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Typed provider config ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single AI provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Live voice tutor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSettings {
    #[serde(default = "default_live_model")]
    pub model: String,

    #[serde(default = "default_live_voice")]
    pub voice: String,

    #[serde(default = "default_tutor_instruction")]
    pub system_instruction: String,

    /// Microphone sample rate sent to the provider (default: 16000).
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    /// Sample rate of reply audio (default: 24000).
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Samples per captured frame (default: 4096).
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            model: default_live_model(),
            voice: default_live_voice(),
            system_instruction: default_tutor_instruction(),
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            frame_size: default_frame_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl LiveSettings {
    /// Provider-facing session config. Audio replies only.
    pub fn to_live_config(&self) -> LiveConfig {
        LiveConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            response_modalities: vec![Modality::Audio],
            system_instruction: self.system_instruction.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_live_model() -> String {
    DEFAULT_LIVE_MODEL.into()
}

fn default_live_voice() -> String {
    DEFAULT_LIVE_VOICE.into()
}

fn default_tutor_instruction() -> String {
    DEFAULT_TUTOR_INSTRUCTION.into()
}

fn default_input_sample_rate() -> u32 {
    16_000
}

fn default_output_sample_rate() -> u32 {
    24_000
}

fn default_frame_size() -> usize {
    4096
}

fn default_connect_timeout_secs() -> u64 {
    15
}

/// Image, speech and transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Where generated images and audio are written (default: `~/.sprechen/media`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image_model: default_image_model(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            transcription_model: default_transcription_model(),
            output_dir: None,
        }
    }
}

fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.into()
}

fn default_tts_model() -> String {
    DEFAULT_TTS_MODEL.into()
}

fn default_tts_voice() -> String {
    DEFAULT_TTS_VOICE.into()
}

fn default_transcription_model() -> String {
    DEFAULT_TRANSCRIPTION_MODEL.into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "sprechen_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            warn!(var = %var_name, "Config references an unset environment variable");
            String::new()
        })
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| SprechenError::Config(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Live settings, falling back to defaults.
    pub fn live(&self) -> LiveSettings {
        self.live.clone().unwrap_or_default()
    }

    /// Media settings, falling back to defaults.
    pub fn media(&self) -> MediaConfig {
        self.media.clone().unwrap_or_default()
    }

    /// Directory for generated images and audio.
    pub fn media_dir(&self) -> PathBuf {
        self.media
            .as_ref()
            .and_then(|m| m.output_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("media"))
    }

    /// Find a provider config by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.iter().find(|pc| pc.id == id))
    }

    /// Google API key: the configured provider first, then `GEMINI_API_KEY`, then `API_KEY`.
    pub fn google_api_key(&self) -> Option<String> {
        self.provider("google")
            .and_then(|p| p.resolve_api_key())
            .or_else(|| resolve_secret_field(&None, &Some("GEMINI_API_KEY".into())))
            .or_else(|| resolve_secret_field(&None, &Some("API_KEY".into())))
    }

    /// Get a config value by dotted path (e.g. "live.voice", "media.tts_model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(SprechenError::Config("Empty path".into()));
        };

        // Navigate to the parent of the target key
        let mut current = &mut json;
        for segment in parents {
            if !current.get(*segment).is_some_and(|v| v.is_object()) {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| SprechenError::Config(format!("Cannot descend into '{segment}'")))?;
        }

        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| SprechenError::Config(format!("Invalid value for '{path}': {e}")))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.google_api_key().is_none() {
            warnings.push(
                "No Google API key configured (models.providers[google] or GEMINI_API_KEY)"
                    .to_string(),
            );
        }

        if let Some(live) = &self.live {
            if live.input_sample_rate == 0 || live.output_sample_rate == 0 {
                errors.push("Live sample rates must be non-zero".to_string());
            }
            if live.frame_size == 0 {
                errors.push("Live frame_size must be non-zero".to_string());
            }
            if live.connect_timeout_secs == 0 {
                warnings.push("Live connect_timeout_secs is 0; sessions will time out immediately".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "" | "plain" | "json") {
                errors.push(format!("Unknown logging format: {}", logging.format));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Sprechen data: `~/.sprechen/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sprechen")
}
