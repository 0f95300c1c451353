//! Request/response media generation: vocabulary illustrations, image edits,
//! text-to-speech and transcription via `generateContent`.
//!
//! Every call returns `Ok(None)` when the model answered without the
//! expected media, and `Err` on transport or API failures. Nothing is retried.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sprechen_core::config::MediaConfig;
use sprechen_core::protocol::Modality;
use sprechen_core::types::AspectRatio;

use crate::GeminiClient;
use crate::wire::{Content, InlineData, Part, SpeechConfig, first_inline_data};

const TRANSCRIBE_PROMPT: &str = "Please transcribe this German audio exactly.";

const DATA_URL_PREFIXES: [&str; 3] = [
    "data:image/png;base64,",
    "data:image/jpeg;base64,",
    "data:image/jpg;base64,",
];

pub struct GeminiMediaClient {
    client: GeminiClient,
    config: MediaConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<MediaGenerationConfig>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<Modality>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: AspectRatio,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        first_inline_data(self.parts())
    }

    /// Concatenated text of the first candidate.
    fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Prompt used to illustrate a vocabulary word.
pub fn vocab_image_prompt(word: &str) -> String {
    format!(
        "A clear, educational illustration representing the German word \"{word}\". Minimalist vector art style."
    )
}

/// Strip a `data:image/(png|jpeg|jpg);base64,` prefix if present.
pub fn strip_data_url_prefix(image: &str) -> &str {
    DATA_URL_PREFIXES
        .iter()
        .find_map(|prefix| image.strip_prefix(prefix))
        .unwrap_or(image)
}

pub fn png_data_url(base64: &str) -> String {
    format!("data:image/png;base64,{base64}")
}

impl GeminiMediaClient {
    pub fn new(client: GeminiClient, config: MediaConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> anyhow::Result<GenerateContentResponse> {
        let url = self.client.generate_content_url(model);
        debug!(%model, "Calling Gemini generateContent");

        let response = self
            .client
            .http()
            .post(&url)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status}: {body}");
        }

        Ok(response.json().await?)
    }

    /// Illustrate a German word. Returns a PNG data URL.
    pub async fn generate_vocab_image(
        &self,
        word: &str,
        aspect_ratio: AspectRatio,
    ) -> anyhow::Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![Part::text(vocab_image_prompt(word))])],
            generation_config: Some(MediaGenerationConfig {
                image_config: Some(ImageConfig { aspect_ratio }),
                ..Default::default()
            }),
        };
        let response = self.generate(&self.config.image_model, &request).await?;
        let image = response.first_inline_data().map(|d| png_data_url(&d.data));
        info!(%word, aspect = %aspect_ratio, found = image.is_some(), "Vocabulary image generated");
        Ok(image)
    }

    /// Edit an image (bare base64 or data URL) following `prompt`. Returns a PNG data URL.
    pub async fn edit_image(&self, image: &str, prompt: &str) -> anyhow::Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![
                Part::inline("image/png", strip_data_url_prefix(image)),
                Part::text(prompt),
            ])],
            generation_config: None,
        };
        let response = self.generate(&self.config.image_model, &request).await?;
        let image = response.first_inline_data().map(|d| png_data_url(&d.data));
        info!(found = image.is_some(), "Image edited");
        Ok(image)
    }

    /// Synthesize `text`. Returns base64 16-bit PCM, 24 kHz mono.
    pub async fn speech_base64(&self, text: &str) -> anyhow::Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![Part::text(text)])],
            generation_config: Some(MediaGenerationConfig {
                response_modalities: Some(vec![Modality::Audio]),
                speech_config: Some(SpeechConfig::voice(&self.config.tts_voice)),
                ..Default::default()
            }),
        };
        let response = self.generate(&self.config.tts_model, &request).await?;
        let audio = response.first_inline_data().map(|d| d.data.clone());
        info!(chars = text.len(), voice = %self.config.tts_voice, found = audio.is_some(), "Speech generated");
        Ok(audio)
    }

    /// Transcribe base64 WAV audio of German speech.
    pub async fn transcribe_audio(&self, base64_wav: &str) -> anyhow::Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![
                Part::inline("audio/wav", base64_wav),
                Part::text(TRANSCRIBE_PROMPT),
            ])],
            generation_config: None,
        };
        let response = self
            .generate(&self.config.transcription_model, &request)
            .await?;
        let text = response.text();
        info!(found = text.is_some(), "Audio transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_image_prompt() {
        assert_eq!(
            vocab_image_prompt("Apfel"),
            "A clear, educational illustration representing the German word \"Apfel\". Minimalist vector art style."
        );
    }

    #[test]
    fn test_strip_data_url_prefix() {
        assert_eq!(strip_data_url_prefix("data:image/png;base64,AAA"), "AAA");
        assert_eq!(strip_data_url_prefix("data:image/jpeg;base64,BBB"), "BBB");
        assert_eq!(strip_data_url_prefix("data:image/jpg;base64,CCC"), "CCC");
        assert_eq!(strip_data_url_prefix("DDD"), "DDD");
        assert_eq!(
            strip_data_url_prefix("data:image/gif;base64,EEE"),
            "data:image/gif;base64,EEE"
        );
    }

    #[test]
    fn test_image_request_shape() {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![Part::text("x")])],
            generation_config: Some(MediaGenerationConfig {
                image_config: Some(ImageConfig {
                    aspect_ratio: AspectRatio::Landscape,
                }),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert!(json["generationConfig"].get("speechConfig").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["text"], "x");
        assert!(json["contents"][0].get("role").is_none());
    }

    #[test]
    fn test_speech_request_shape() {
        let request = GenerateContentRequest {
            contents: vec![Content::new(vec![Part::text("Guten Tag")])],
            generation_config: Some(MediaGenerationConfig {
                response_modalities: Some(vec![Modality::Audio]),
                speech_config: Some(SpeechConfig::voice("Kore")),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        let config = &json["generationConfig"];
        assert_eq!(config["responseModalities"][0], "AUDIO");
        assert_eq!(
            config["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn test_inline_part_serializes_camel_case() {
        let json = serde_json::to_value(Part::inline("audio/wav", "UklGRg==")).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "audio/wav");
        assert_eq!(json["inlineData"]["data"], "UklGRg==");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_response_first_inline_data() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"Here you go"},
                {"inlineData":{"mimeType":"image/png","data":"iVBOR"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.first_inline_data().unwrap().data, "iVBOR");
        assert_eq!(png_data_url("iVBOR"), "data:image/png;base64,iVBOR");
    }

    #[test]
    fn test_response_text_concatenates_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Ich heiße "},{"text":"Ayşe."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Ich heiße Ayşe."));
        assert!(response.first_inline_data().is_none());
    }

    #[test]
    fn test_empty_response_has_no_media() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(response.first_inline_data().is_none());
        assert!(response.text().is_none());

        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(blocked.parts().is_empty());
    }
}
