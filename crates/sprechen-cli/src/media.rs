//! One-shot media commands: vocabulary images, image edits, speech and transcription.

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

use sprechen_core::config::Config;
use sprechen_core::types::AspectRatio;
use sprechen_media::codec::pcm_to_wav;
use sprechen_providers::gemini_media::strip_data_url_prefix;
use sprechen_providers::{GeminiClient, GeminiMediaClient};

/// Gemini TTS replies are 24 kHz mono PCM16.
const TTS_SAMPLE_RATE: u32 = 24_000;

/// `{prefix}_{timestamp}_{short id}.{ext}`
pub fn output_filename(prefix: &str, ext: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{ts}_{}.{ext}", &id[..8])
}

fn output_path(config: &Config, out: Option<PathBuf>, prefix: &str, ext: &str) -> PathBuf {
    out.unwrap_or_else(|| config.media_dir().join(output_filename(prefix, ext)))
}

async fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("cannot write {}", path.display()))
}

fn media_client(config: &Config) -> anyhow::Result<GeminiMediaClient> {
    Ok(GeminiMediaClient::new(
        GeminiClient::from_config(config)?,
        config.media(),
    ))
}

fn decode_image(data_url: &str) -> anyhow::Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_url_prefix(data_url))
        .context("image payload is not valid base64")
}

pub async fn image(
    config: &Config,
    word: &str,
    aspect: AspectRatio,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let media = media_client(config)?;
    let Some(url) = media.generate_vocab_image(word, aspect).await? else {
        println!("No image returned for '{word}'.");
        return Ok(());
    };

    let path = output_path(config, out, "image", "png");
    write_output(&path, &decode_image(&url)?).await?;
    info!(path = %path.display(), "Image saved");
    println!("{}", path.display());
    Ok(())
}

pub async fn edit_image(
    config: &Config,
    source: &Path,
    prompt: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(source)
        .await
        .with_context(|| format!("cannot read {}", source.display()))?;
    let media = media_client(config)?;
    let Some(url) = media.edit_image(&STANDARD.encode(bytes), prompt).await? else {
        println!("No edited image returned.");
        return Ok(());
    };

    let path = output_path(config, out, "edit", "png");
    write_output(&path, &decode_image(&url)?).await?;
    println!("{}", path.display());
    Ok(())
}

pub async fn speak(config: &Config, text: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let media = media_client(config)?;
    let Some(audio) = media.speech_base64(text).await? else {
        println!("No audio returned.");
        return Ok(());
    };

    let pcm = STANDARD
        .decode(audio)
        .context("speech payload is not valid base64")?;
    let path = output_path(config, out, "tts", "wav");
    let wav = pcm_to_wav(&pcm, TTS_SAMPLE_RATE, 1)?;
    write_output(&path, &wav).await?;
    println!("{}", path.display());
    Ok(())
}

pub async fn transcribe(config: &Config, source: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(source)
        .await
        .with_context(|| format!("cannot read {}", source.display()))?;
    let media = media_client(config)?;
    match media.transcribe_audio(&STANDARD.encode(bytes)).await? {
        Some(text) => println!("{text}"),
        None => println!("No transcription returned."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_filename_shape() {
        let name = output_filename("tts", "wav");
        assert!(name.starts_with("tts_"));
        assert!(name.ends_with(".wav"));
        // tts_ + YYYYmmdd_HHMMSS + _ + 8 hex chars + .wav
        assert_eq!(name.len(), 4 + 15 + 1 + 8 + 4);
        assert_ne!(name, output_filename("tts", "wav"));
    }

    #[test]
    fn test_output_path_prefers_explicit() {
        let config = Config::default();
        let explicit = PathBuf::from("/tmp/apfel.png");
        assert_eq!(
            output_path(&config, Some(explicit.clone()), "image", "png"),
            explicit
        );
        let generated = output_path(&config, None, "image", "png");
        assert!(generated.starts_with(config.media_dir()));
    }

    #[test]
    fn test_decode_image_accepts_data_url() {
        assert_eq!(decode_image("data:image/png;base64,AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_image("AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_image("data:image/png;base64,***").is_err());
    }

    #[tokio::test]
    async fn test_write_output_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        write_output(&path, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}
