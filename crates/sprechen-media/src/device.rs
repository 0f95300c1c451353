//! Sound card backends via cpal.
//!
//! cpal streams are not `Send`, so each one lives on a dedicated thread that
//! builds it, plays it, and drops it when told to stop.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capture::{AudioInput, CaptureStream};
use crate::error::{CaptureError, PlaybackError};
use crate::mixer::MixerRenderer;

/// Keeps a cpal stream alive on its own thread until stopped or dropped.
struct StreamGuard {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamGuard {
    fn spawn<F>(name: &str, build: F) -> Result<Self, String>
    where
        F: FnOnce() -> Result<Stream, String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until a stop is sent or the guard is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| e.to_string())?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err("audio thread exited during setup".into()),
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The default input device, captured as mono f32 at a fixed rate.
pub struct MicrophoneInput {
    sample_rate: u32,
    frame_size: usize,
}

impl MicrophoneInput {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size: frame_size.max(1),
        }
    }
}

impl AudioInput for MicrophoneInput {
    fn acquire(&mut self) -> Result<CaptureStream, CaptureError> {
        let (tx, rx) = mpsc::channel::<Vec<f32>>(32);
        let sample_rate = self.sample_rate;
        let frame_size = self.frame_size;

        let mut guard = StreamGuard::spawn("sprechen-mic", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| "no input device".to_string())?;
            let config = StreamConfig {
                channels: 1,
                sample_rate: SampleRate(sample_rate),
                buffer_size: BufferSize::Default,
            };

            let mut frame = Vec::with_capacity(frame_size);
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        for &sample in data {
                            frame.push(sample);
                            if frame.len() == frame_size {
                                let full = std::mem::replace(&mut frame, Vec::with_capacity(frame_size));
                                if tx.try_send(full).is_err() {
                                    warn!("Capture consumer lagging, dropping frame");
                                }
                            }
                        }
                    },
                    |e| error!(error = %e, "Input stream error"),
                    None,
                )
                .map_err(|e| e.to_string())
        })
        .map_err(CaptureError::PermissionDenied)?;

        info!(sample_rate, frame_size, "Microphone opened");
        Ok(CaptureStream::new(rx, sample_rate).on_release(move || {
            guard.stop();
            debug!("Microphone released");
        }))
    }
}

/// Plays a mixer through the default output device.
///
/// Dropping it stops the device; pair it with the [`crate::mixer::MixerOutput`]
/// that schedules into the same mixer.
pub struct SpeakerOutput {
    guard: StreamGuard,
}

impl SpeakerOutput {
    pub fn open(renderer: MixerRenderer) -> Result<Self, PlaybackError> {
        let sample_rate = renderer.sample_rate();
        let channels = renderer.channels();

        let guard = StreamGuard::spawn("sprechen-speaker", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| "no output device".to_string())?;
            let config = StreamConfig {
                channels: channels as u16,
                sample_rate: SampleRate(sample_rate),
                buffer_size: BufferSize::Default,
            };
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| renderer.render(data),
                    |e| error!(error = %e, "Output stream error"),
                    None,
                )
                .map_err(|e| e.to_string())
        })
        .map_err(PlaybackError::Device)?;

        info!(sample_rate, channels, "Speaker opened");
        Ok(Self { guard })
    }

    pub fn stop(&mut self) {
        self.guard.stop();
    }
}
