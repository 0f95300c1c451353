//! WAV file stand-ins for the microphone and speaker.
//!
//! [`WavFileInput`] replays a recording at real-time cadence, followed by a
//! short silence tail so the model's turn detection sees the user stop
//! talking. [`WavRecorder`] renders a mixer into a WAV file at real-time
//! cadence, which keeps the playback clock honest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{AudioInput, CaptureStream};
use crate::error::CaptureError;
use crate::mixer::MixerRenderer;

const SILENCE_TAIL: Duration = Duration::from_secs(2);

pub struct WavFileInput {
    path: PathBuf,
    frame_size: usize,
    expected_rate: u32,
}

impl WavFileInput {
    pub fn new(path: impl Into<PathBuf>, frame_size: usize, expected_rate: u32) -> Self {
        Self {
            path: path.into(),
            frame_size: frame_size.max(1),
            expected_rate,
        }
    }
}

/// Read a WAV file as mono f32, averaging channels.
pub fn read_mono(path: &Path) -> anyhow::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

impl AudioInput for WavFileInput {
    fn acquire(&mut self) -> Result<CaptureStream, CaptureError> {
        let (samples, sample_rate) =
            read_mono(&self.path).map_err(|e| CaptureError::PermissionDenied(format!("{e:#}")))?;
        if sample_rate != self.expected_rate {
            warn!(
                path = %self.path.display(),
                sample_rate,
                expected = self.expected_rate,
                "WAV input rate differs from the configured input rate; sending as-is"
            );
        }

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let frame_size = self.frame_size;
        let frame_period = Duration::from_secs_f64(frame_size as f64 / sample_rate.max(1) as f64)
            .max(Duration::from_millis(1));
        let tail_frames = (SILENCE_TAIL.as_secs_f64() / frame_period.as_secs_f64()).ceil() as usize;
        let path = self.path.display().to_string();

        info!(%path, sample_rate, seconds = samples.len() as f64 / sample_rate.max(1) as f64, "Replaying WAV input");

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            let silence = vec![0.0f32; frame_size];
            let frames = samples
                .chunks(frame_size)
                .map(|c| c.to_vec())
                .chain(std::iter::repeat_n(silence, tail_frames));
            for frame in frames {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            debug!(%path, "WAV input exhausted");
        });

        Ok(CaptureStream::new(rx, sample_rate).on_release(move || cancel.cancel()))
    }
}

pub struct WavRecorder;

impl WavRecorder {
    /// Render `renderer` into `path` until `cancel` fires. Resolves to the number of frames written.
    pub fn spawn(
        renderer: MixerRenderer,
        path: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> JoinHandle<anyhow::Result<u64>> {
        let path = path.into();
        tokio::spawn(async move {
            let channels = renderer.channels();
            let spec = hound::WavSpec {
                channels: channels as u16,
                sample_rate: renderer.sample_rate(),
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut writer = hound::WavWriter::create(&path, spec)
                .with_context(|| format!("cannot create {}", path.display()))?;

            // 20 ms blocks
            let block_frames = (spec.sample_rate / 50).max(1) as usize;
            let mut block = vec![0.0f32; block_frames * channels];
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            let mut written: u64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        renderer.render(&mut block);
                        for &sample in &block {
                            writer.write_sample((sample * i16::MAX as f32) as i16)?;
                        }
                        written += block_frames as u64;
                    }
                }
            }

            writer.finalize()?;
            info!(path = %path.display(), frames = written, "Reply audio recorded");
            Ok(written)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::mixer;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_read_mono_downmixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16_000, 2, &[16384, 0, -16384, -16384]);
        let (mono, rate) = read_mono(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(mono, vec![0.25, -0.5]);
    }

    #[test]
    fn test_missing_file_is_permission_denied() {
        let mut input = WavFileInput::new("/nonexistent/sprechen/input.wav", 4096, 16_000);
        assert!(matches!(
            input.acquire(),
            Err(CaptureError::PermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wav_input_streams_frames_then_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hallo.wav");
        write_wav(&path, 16_000, 1, &[8192; 10]);

        let mut input = WavFileInput::new(&path, 4, 16_000);
        let mut stream = input.acquire().unwrap();
        assert_eq!(stream.sample_rate(), 16_000);
        assert_eq!(stream.next_frame().await.unwrap(), vec![0.25; 4]);
        assert_eq!(stream.next_frame().await.unwrap(), vec![0.25; 4]);
        assert_eq!(stream.next_frame().await.unwrap(), vec![0.25; 2]);
        assert_eq!(stream.next_frame().await.unwrap(), vec![0.0; 4]);
        stream.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_writes_rendered_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.wav");
        let (_output, renderer) = mixer(24_000, 1);
        let cancel = CancellationToken::new();
        let task = WavRecorder::spawn(renderer, &path, cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let frames = task.await.unwrap().unwrap();
        assert!(frames > 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len() as u64, frames);
    }
}
