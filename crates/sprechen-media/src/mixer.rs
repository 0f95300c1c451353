//! Software mixer: an [`AudioOutput`] whose clock is the number of frames
//! rendered so far.
//!
//! The scheduling half ([`MixerOutput`]) and the rendering half
//! ([`MixerRenderer`]) share state behind a mutex, since rendering usually
//! runs on an audio device thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::codec::AudioBuffer;
use crate::error::PlaybackError;
use crate::playback::{AudioOutput, ChunkId, EndedSignal};

struct Voice {
    id: ChunkId,
    /// First output frame the voice is audible on.
    start_frame: u64,
    buffer: AudioBuffer,
    /// Source frames consumed per output frame.
    step: f64,
    ended: Option<EndedSignal>,
}

impl Voice {
    fn source_index(&self, frame: u64) -> Option<usize> {
        let offset = frame.checked_sub(self.start_frame)?;
        Some((offset as f64 * self.step) as usize)
    }

    fn last_frame(&self) -> u64 {
        let frames = (self.buffer.frames() as f64 / self.step).ceil() as u64;
        self.start_frame + frames
    }
}

struct MixerState {
    sample_rate: u32,
    channels: usize,
    frames_rendered: u64,
    voices: Vec<Voice>,
    closed: bool,
}

#[derive(Clone)]
pub struct MixerOutput {
    state: Arc<Mutex<MixerState>>,
}

#[derive(Clone)]
pub struct MixerRenderer {
    state: Arc<Mutex<MixerState>>,
}

/// Create a mixer running at `sample_rate` with `channels` interleaved output channels.
pub fn mixer(sample_rate: u32, channels: usize) -> (MixerOutput, MixerRenderer) {
    let state = Arc::new(Mutex::new(MixerState {
        sample_rate: sample_rate.max(1),
        channels: channels.max(1),
        frames_rendered: 0,
        voices: Vec::new(),
        closed: false,
    }));
    (
        MixerOutput {
            state: state.clone(),
        },
        MixerRenderer { state },
    )
}

fn lock(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MixerOutput {
    /// Chunks currently scheduled or playing, in start order.
    pub fn active_chunks(&self) -> Vec<ChunkId> {
        let state = lock(&self.state);
        let mut voices: Vec<(u64, ChunkId)> =
            state.voices.iter().map(|v| (v.start_frame, v.id)).collect();
        voices.sort_unstable();
        voices.into_iter().map(|(_, id)| id).collect()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl AudioOutput for MixerOutput {
    fn current_time(&self) -> f64 {
        let state = lock(&self.state);
        state.frames_rendered as f64 / state.sample_rate as f64
    }

    fn start(
        &mut self,
        buffer: AudioBuffer,
        start_at: f64,
        ended: EndedSignal,
    ) -> Result<(), PlaybackError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(PlaybackError::Closed);
        }
        if buffer.frames() == 0 {
            // Nothing to play; report it finished straight away.
            ended.fire();
            return Ok(());
        }

        let start_frame = ((start_at * state.sample_rate as f64).round() as u64)
            .max(state.frames_rendered);
        let step = buffer.sample_rate as f64 / state.sample_rate as f64;
        state.voices.push(Voice {
            id: ended.id(),
            start_frame,
            buffer,
            step,
            ended: Some(ended),
        });
        Ok(())
    }

    fn stop(&mut self, id: ChunkId) {
        lock(&self.state).voices.retain(|v| v.id != id);
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.voices.clear();
    }
}

impl MixerRenderer {
    pub fn sample_rate(&self) -> u32 {
        lock(&self.state).sample_rate
    }

    pub fn channels(&self) -> usize {
        lock(&self.state).channels
    }

    pub fn current_time(&self) -> f64 {
        let state = lock(&self.state);
        state.frames_rendered as f64 / state.sample_rate as f64
    }

    /// Mix the next `out.len() / channels` frames into `out` (interleaved) and advance the clock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }

        let channels = state.channels;
        let frames = (out.len() / channels) as u64;
        let first = state.frames_rendered;

        for voice in &state.voices {
            let source_channels = voice.buffer.channel_count();
            for i in 0..frames {
                let Some(index) = voice.source_index(first + i) else {
                    continue;
                };
                if index >= voice.buffer.frames() {
                    break;
                }
                for c in 0..channels {
                    let source = &voice.buffer.channels[c.min(source_channels - 1)];
                    out[i as usize * channels + c] += source[index];
                }
            }
        }

        state.frames_rendered = first + frames;
        let now = state.frames_rendered;

        let mut finished = Vec::new();
        state.voices.retain_mut(|voice| {
            if voice.last_frame() <= now {
                finished.extend(voice.ended.take());
                false
            } else {
                true
            }
        });
        drop(state);

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        for signal in finished {
            trace!(chunk = signal.id(), "Chunk finished");
            signal.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bytes_to_audio_buffer;
    use crate::playback::PlaybackScheduler;

    fn pcm(value: i16, frames: usize) -> Vec<u8> {
        std::iter::repeat_n(value.to_le_bytes(), frames)
            .flatten()
            .collect()
    }

    #[test]
    fn test_clock_advances_with_rendering() {
        let (output, renderer) = mixer(24_000, 1);
        assert_eq!(output.current_time(), 0.0);
        let mut out = vec![0.0; 2400];
        renderer.render(&mut out);
        assert!((output.current_time() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scheduled_chunks_render_gaplessly() {
        let (output, renderer) = mixer(24_000, 1);
        let mut sched = PlaybackScheduler::new(Box::new(output.clone()), 24_000, 1);
        sched.enqueue(&pcm(16384, 100)).unwrap();
        sched.enqueue(&pcm(-16384, 100)).unwrap();
        assert_eq!(output.active_chunks(), vec![0, 1]);

        let mut out = vec![0.0; 250];
        renderer.render(&mut out);
        assert!(out[..100].iter().all(|&s| s == 0.5));
        assert!(out[100..200].iter().all(|&s| s == -0.5));
        assert!(out[200..].iter().all(|&s| s == 0.0));

        assert!(output.active_chunks().is_empty());
        let first = sched.next_ended().await.unwrap();
        let second = sched.next_ended().await.unwrap();
        assert!(sched.on_ended(first));
        assert!(sched.on_ended(second));
        assert_eq!(sched.tracked_len(), 0);
    }

    #[test]
    fn test_stop_silences_voice() {
        let (mut output, renderer) = mixer(24_000, 1);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let signal = EndedSignal::for_test(7, tx);
        let buffer = bytes_to_audio_buffer(&pcm(8192, 48), 24_000, 1).unwrap();
        output.start(buffer, 0.0, signal).unwrap();
        output.stop(7);

        let mut out = vec![1.0; 48];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_tagged_rate_is_honoured() {
        // 12 kHz buffer on a 24 kHz mixer lasts twice as many output frames.
        let (mut output, renderer) = mixer(24_000, 2);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let buffer = bytes_to_audio_buffer(&pcm(16384, 10), 12_000, 1).unwrap();
        output
            .start(buffer, 0.0, EndedSignal::for_test(1, tx))
            .unwrap();

        let mut out = vec![0.0; 2 * 30];
        renderer.render(&mut out);
        let audible = out.chunks_exact(2).filter(|f| f[0] == 0.5 && f[1] == 0.5).count();
        assert_eq!(audible, 20);
    }

    #[test]
    fn test_closed_mixer_rejects_start() {
        let (mut output, _renderer) = mixer(24_000, 1);
        output.close();
        assert!(output.is_closed());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let buffer = bytes_to_audio_buffer(&pcm(1, 4), 24_000, 1).unwrap();
        assert!(matches!(
            output.start(buffer, 0.0, EndedSignal::for_test(0, tx)),
            Err(PlaybackError::Closed)
        ));
    }
}
