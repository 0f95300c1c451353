mod live;
mod logging;
mod media;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sprechen_core::config::Config;
use sprechen_core::types::AspectRatio;

#[derive(Parser)]
#[command(
    name = "sprechen",
    about = "German vocabulary trainer for Turkish speakers, with a live voice tutor",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Practice speaking with the live tutor
    Live {
        /// Replay a WAV file as microphone input
        #[arg(long)]
        input: Option<PathBuf>,

        /// Record the tutor's replies to this WAV file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Capture from the default microphone (needs the `device` feature)
        #[arg(long)]
        mic: bool,

        /// Play replies on the default speaker (needs the `device` feature)
        #[arg(long)]
        speaker: bool,

        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,

        /// Hang up after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Illustrate a German vocabulary word
    Image {
        word: String,

        /// Aspect ratio: 1:1, 16:9 or 9:16
        #[arg(long, default_value = "1:1")]
        aspect: AspectRatio,

        /// Output PNG path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Edit an image with a text prompt
    EditImage {
        path: PathBuf,
        prompt: String,

        /// Output PNG path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Read German text aloud
    Speak {
        text: String,

        /// Output WAV path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Transcribe a German WAV recording
    Transcribe { path: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value (JSON, or a plain string)
    Set { key: String, value: String },
}

/// Interpret a `config set` value: JSON when it parses, otherwise a string.
fn parse_config_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let mut config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Live {
            input,
            output,
            mic,
            speaker,
            muted,
            duration,
        } => {
            let opts = live::LiveOptions {
                input,
                output,
                mic,
                speaker,
                muted,
                duration,
            };
            live::run(&config, opts).await?;
        }
        Commands::Image { word, aspect, out } => {
            media::image(&config, &word, aspect, out).await?;
        }
        Commands::EditImage { path, prompt, out } => {
            media::edit_image(&config, &path, &prompt, out).await?;
        }
        Commands::Speak { text, out } => {
            media::speak(&config, &text, out).await?;
        }
        Commands::Transcribe { path } => {
            media::transcribe(&config, &path).await?;
        }
        Commands::Status => {
            let live = config.live();
            println!("Sprechen v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Media: {}", config.media_dir().display());
            println!("Live model: {} (voice {})", live.model, live.voice);
            println!(
                "API key: {}",
                if config.google_api_key().is_some() {
                    "configured"
                } else {
                    "missing"
                }
            );

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                println!("warning: {warning}");
            }
            for error in &errors {
                println!("error: {error}");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{key} is not set"),
            },
            ConfigAction::Set { key, value } => {
                config.set_path(&key, parse_config_value(&value))?;
                let (_, errors) = config.validate();
                if !errors.is_empty() {
                    anyhow::bail!("Invalid config: {}", errors.join("; "));
                }
                config.save(&config_path)?;
                tracing::info!(%key, path = %config_path.display(), "Config updated");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_image_command() {
        let cli = Cli::try_parse_from(["sprechen", "image", "Apfel", "--aspect", "16:9"]).unwrap();
        match cli.command {
            Commands::Image { word, aspect, out } => {
                assert_eq!(word, "Apfel");
                assert_eq!(aspect, AspectRatio::Landscape);
                assert!(out.is_none());
            }
            _ => panic!("expected image command"),
        }
        assert!(Cli::try_parse_from(["sprechen", "image", "Apfel", "--aspect", "4:3"]).is_err());
    }

    #[test]
    fn test_parse_live_command() {
        let cli = Cli::try_parse_from([
            "sprechen", "-v", "live", "--input", "hallo.wav", "--muted", "--duration", "30",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Live {
                input,
                muted,
                duration,
                mic,
                ..
            } => {
                assert_eq!(input, Some(PathBuf::from("hallo.wav")));
                assert!(muted);
                assert!(!mic);
                assert_eq!(duration, Some(30));
            }
            _ => panic!("expected live command"),
        }
    }

    #[test]
    fn test_parse_config_value() {
        assert_eq!(parse_config_value("16000"), serde_json::json!(16000));
        assert_eq!(parse_config_value("true"), serde_json::json!(true));
        assert_eq!(parse_config_value("Zephyr"), serde_json::json!("Zephyr"));
        assert_eq!(parse_config_value(r#"["a=debug"]"#), serde_json::json!(["a=debug"]));
    }
}
