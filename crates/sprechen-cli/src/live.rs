//! `sprechen live`: talk to the tutor from a terminal.
//!
//! Input is a WAV file replayed in real time or, with the `device` feature,
//! the default microphone. Replies go to a WAV recording or the speaker.
//! Typing `m` toggles mute and `q` hangs up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sprechen_core::config::{Config, LiveSettings};
use sprechen_media::capture::AudioInput;
use sprechen_media::live_session::{LiveSession, SessionEvent};
use sprechen_media::mixer::{MixerRenderer, mixer};
use sprechen_media::wav::{WavFileInput, WavRecorder};
use sprechen_providers::{GeminiClient, GeminiLiveProvider};

use crate::media::output_filename;

pub struct LiveOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub mic: bool,
    pub speaker: bool,
    pub muted: bool,
    pub duration: Option<u64>,
}

/// A keyboard command typed during a session.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    ToggleMute,
    Quit,
    Empty,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    match line.trim().to_lowercase().as_str() {
        "m" | "mute" => Command::ToggleMute,
        "q" | "quit" | "exit" => Command::Quit,
        "" => Command::Empty,
        _ => Command::Unknown,
    }
}

fn open_input(settings: &LiveSettings, opts: &LiveOptions) -> anyhow::Result<Box<dyn AudioInput>> {
    if let Some(path) = &opts.input {
        return Ok(Box::new(WavFileInput::new(
            path,
            settings.frame_size,
            settings.input_sample_rate,
        )));
    }
    if opts.mic {
        #[cfg(feature = "device")]
        return Ok(Box::new(sprechen_media::device::MicrophoneInput::new(
            settings.input_sample_rate,
            settings.frame_size,
        )));
        #[cfg(not(feature = "device"))]
        anyhow::bail!("--mic needs a build with the `device` feature");
    }
    anyhow::bail!("No audio input: pass --input <WAV> or --mic")
}

/// Where reply audio ends up.
enum ReplySink {
    Recording {
        path: PathBuf,
        cancel: CancellationToken,
        task: JoinHandle<anyhow::Result<u64>>,
    },
    #[cfg(feature = "device")]
    Speaker(sprechen_media::device::SpeakerOutput),
}

impl ReplySink {
    fn open(config: &Config, opts: &LiveOptions, renderer: MixerRenderer) -> anyhow::Result<Self> {
        if opts.speaker {
            #[cfg(feature = "device")]
            return Ok(Self::Speaker(sprechen_media::device::SpeakerOutput::open(
                renderer,
            )?));
            #[cfg(not(feature = "device"))]
            anyhow::bail!("--speaker needs a build with the `device` feature");
        }

        let path = opts
            .output
            .clone()
            .unwrap_or_else(|| config.media_dir().join(output_filename("live", "wav")));
        let cancel = CancellationToken::new();
        let task = WavRecorder::spawn(renderer, &path, cancel.clone());
        Ok(Self::Recording { path, cancel, task })
    }

    async fn finish(self) -> anyhow::Result<()> {
        match self {
            Self::Recording { path, cancel, task } => {
                cancel.cancel();
                let frames = task.await??;
                println!("Reply audio: {} ({frames} frames)", path.display());
            }
            #[cfg(feature = "device")]
            Self::Speaker(mut speaker) => speaker.stop(),
        }
        Ok(())
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => debug!(?state, "Session state changed"),
        SessionEvent::ChunkScheduled(chunk) => {
            debug!(id = chunk.id, start_at = chunk.start_at, duration = chunk.duration, "Reply chunk scheduled")
        }
        SessionEvent::ChunkFinished(id) => debug!(id, "Reply chunk finished"),
        SessionEvent::Interrupted { stopped } => info!(stopped, "Tutor interrupted"),
        SessionEvent::DecodeFailed(reason) => warn!(%reason, "Skipped undecodable reply chunk"),
    }
}

pub async fn run(config: &Config, opts: LiveOptions) -> anyhow::Result<()> {
    let settings = config.live();
    let provider = Arc::new(GeminiLiveProvider::new(GeminiClient::from_config(config)?));
    let input = open_input(&settings, &opts)?;
    let (output, renderer) = mixer(settings.output_sample_rate, 1);
    let sink = ReplySink::open(config, &opts, renderer)?;

    info!(model = %settings.model, voice = %settings.voice, "Starting live session");
    let (session, mut events) =
        LiveSession::from_settings(&settings, provider, input, Box::new(output)).start();
    session.set_muted(opts.muted);

    let mut snapshots = session.subscribe();
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut stdin_open = true;
    let mut interrupted = false;
    let mut deadline_armed = opts.duration.is_some();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = tokio::time::sleep(Duration::from_secs(opts.duration.unwrap_or(0)));
    tokio::pin!(deadline);

    println!("{}", session.status());
    println!("m + Enter: mute on/off, q + Enter: quit");

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                info!("Ctrl-C received, closing session");
                session.close();
            }
            _ = &mut deadline, if deadline_armed => {
                deadline_armed = false;
                info!("Duration elapsed, closing session");
                session.close();
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                println!("{}", snapshot.status);
                if snapshot.state.is_terminal() {
                    break;
                }
            }
            Some(event) = events.recv() => log_event(&event),
            line = lines.next(), if stdin_open => match line {
                Some(Ok(line)) => match parse_command(&line) {
                    Command::ToggleMute => {
                        let muted = session.toggle_mute();
                        println!("{}", if muted { "Mikrofon kapalı." } else { "Mikrofon açık." });
                    }
                    Command::Quit => session.close(),
                    Command::Empty => {}
                    Command::Unknown => println!("m: mute on/off, q: quit"),
                },
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
                None => stdin_open = false,
            },
        }
    }

    let snapshot = session.closed().await;
    info!(state = ?snapshot.state, status = %snapshot.status, "Live session ended");
    sink.finish().await
}
