//! Playback scheduling. Chains reply chunks back-to-back on an output clock
//! and cancels everything in flight on interruption.
//!
//! Decoding is synchronous, so each `enqueue` reserves its slot and advances
//! the cursor before returning. Callers must enqueue in arrival order; the
//! session controller does so by handling one provider message at a time.
//! Every chunk also gets a monotonic sequence number which doubles as its
//! playback handle id.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::codec::{AudioBuffer, bytes_to_audio_buffer};
use crate::error::PlaybackError;

pub type ChunkId = u64;

/// Completion callback handed to the output with each chunk.
#[derive(Debug, Clone)]
pub struct EndedSignal {
    id: ChunkId,
    tx: mpsc::UnboundedSender<ChunkId>,
}

impl EndedSignal {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Report that the chunk played to its end.
    pub fn fire(self) {
        let _ = self.tx.send(self.id);
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: ChunkId, tx: mpsc::UnboundedSender<ChunkId>) -> Self {
        Self { id, tx }
    }
}

/// An audio output with its own playback clock.
pub trait AudioOutput: Send {
    /// Current playback clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` on the output clock.
    fn start(
        &mut self,
        buffer: AudioBuffer,
        start_at: f64,
        ended: EndedSignal,
    ) -> Result<(), PlaybackError>;

    /// Stop a chunk immediately, whether or not it has started.
    fn stop(&mut self, id: ChunkId);

    /// Release the output graph. Further `start` calls fail.
    fn close(&mut self);
}

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    channels: usize,
    cursor: f64,
    next_id: ChunkId,
    tracked: BTreeMap<ChunkId, ScheduledChunk>,
    ended_tx: mpsc::UnboundedSender<ChunkId>,
    ended_rx: mpsc::UnboundedReceiver<ChunkId>,
    closed: bool,
}

impl PlaybackScheduler {
    /// `sample_rate`/`channels` describe the provider's reply audio (24 kHz mono for Gemini).
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32, channels: usize) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            output,
            sample_rate,
            channels,
            cursor: 0.0,
            next_id: 0,
            tracked: BTreeMap::new(),
            ended_tx,
            ended_rx,
            closed: false,
        }
    }

    /// Decode a reply chunk and schedule it right after the previous one.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<ScheduledChunk, PlaybackError> {
        if self.closed {
            return Err(PlaybackError::Closed);
        }

        let buffer = bytes_to_audio_buffer(bytes, self.sample_rate, self.channels)?;
        let duration = buffer.duration();
        let start_at = self.cursor.max(self.output.current_time());
        let id = self.next_id;

        self.output.start(
            buffer,
            start_at,
            EndedSignal {
                id,
                tx: self.ended_tx.clone(),
            },
        )?;

        self.next_id += 1;
        self.cursor = start_at + duration;
        let chunk = ScheduledChunk {
            id,
            start_at,
            duration,
        };
        self.tracked.insert(id, chunk);
        trace!(chunk = id, start_at, duration, "Chunk scheduled");
        Ok(chunk)
    }

    /// Forget a chunk that finished playing. Returns whether it was still tracked.
    pub fn on_ended(&mut self, id: ChunkId) -> bool {
        self.tracked.remove(&id).is_some()
    }

    /// Wait for the next chunk to finish.
    pub async fn next_ended(&mut self) -> Option<ChunkId> {
        self.ended_rx.recv().await
    }

    /// Stop everything in flight and restart the cursor. Returns how many chunks were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.tracked.len();
        for id in std::mem::take(&mut self.tracked).into_keys() {
            self.output.stop(id);
        }
        self.cursor = 0.0;
        if stopped > 0 {
            debug!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Interrupt and release the output. Idempotent.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.interrupt();
        self.output.close();
        self.closed = true;
        debug!("Playback torn down");
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn tracked(&self) -> impl Iterator<Item = &ScheduledChunk> {
        self.tracked.values()
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        now: f64,
        started: Vec<(ChunkId, f64)>,
        stopped: Vec<ChunkId>,
        pending: Vec<EndedSignal>,
        closed: u32,
    }

    /// Output whose clock only moves when the test says so.
    #[derive(Clone, Default)]
    struct ManualOutput(Arc<Mutex<Recorded>>);

    impl ManualOutput {
        fn set_now(&self, now: f64) {
            self.0.lock().unwrap().now = now;
        }

        fn finish_all(&self) {
            let pending = std::mem::take(&mut self.0.lock().unwrap().pending);
            for signal in pending {
                signal.fire();
            }
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn start(
            &mut self,
            _buffer: AudioBuffer,
            start_at: f64,
            ended: EndedSignal,
        ) -> Result<(), PlaybackError> {
            let mut rec = self.0.lock().unwrap();
            if rec.closed > 0 {
                return Err(PlaybackError::Closed);
            }
            rec.started.push((ended.id(), start_at));
            rec.pending.push(ended);
            Ok(())
        }

        fn stop(&mut self, id: ChunkId) {
            let mut rec = self.0.lock().unwrap();
            rec.stopped.push(id);
            rec.pending.retain(|s| s.id() != id);
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    /// `seconds` of 24 kHz mono silence.
    fn chunk(seconds: f64) -> Vec<u8> {
        vec![0u8; (24_000.0 * seconds) as usize * 2]
    }

    fn scheduler() -> (PlaybackScheduler, ManualOutput) {
        let output = ManualOutput::default();
        (
            PlaybackScheduler::new(Box::new(output.clone()), 24_000, 1),
            output,
        )
    }

    #[test]
    fn test_chunks_play_back_to_back() {
        let (mut sched, _out) = scheduler();
        let a = sched.enqueue(&chunk(0.5)).unwrap();
        let b = sched.enqueue(&chunk(0.25)).unwrap();
        assert_eq!(a.start_at, 0.0);
        assert!(b.start_at >= a.end());
        assert!((b.start_at - 0.5).abs() < 1e-9);
        assert!((sched.cursor() - 0.75).abs() < 1e-9);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_stale_cursor_snaps_to_now() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk(0.5)).unwrap();
        out.set_now(2.0);
        let next = sched.enqueue(&chunk(0.5)).unwrap();
        assert_eq!(next.start_at, 2.0);
    }

    #[test]
    fn test_interrupt_stops_all_and_resets_cursor() {
        let (mut sched, out) = scheduler();
        let a = sched.enqueue(&chunk(1.0)).unwrap();
        let b = sched.enqueue(&chunk(1.0)).unwrap();
        out.set_now(0.5);

        assert_eq!(sched.interrupt(), 2);
        assert_eq!(sched.tracked_len(), 0);
        assert_eq!(sched.cursor(), 0.0);
        let stopped = out.0.lock().unwrap().stopped.clone();
        assert_eq!(stopped, vec![a.id, b.id]);

        // Next chunk starts now, not at the stale 2.0s cursor.
        let c = sched.enqueue(&chunk(0.1)).unwrap();
        assert_eq!(c.start_at, 0.5);
    }

    #[tokio::test]
    async fn test_ended_chunks_leave_tracked_set() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk(0.1)).unwrap();
        sched.enqueue(&chunk(0.1)).unwrap();
        assert_eq!(sched.tracked_len(), 2);

        out.finish_all();
        for _ in 0..2 {
            let id = sched.next_ended().await.unwrap();
            assert!(sched.on_ended(id));
        }
        assert_eq!(sched.tracked_len(), 0);
        assert!(!sched.on_ended(0));
    }

    #[test]
    fn test_bad_chunk_does_not_poison_scheduler() {
        let (mut sched, _out) = scheduler();
        assert!(matches!(
            sched.enqueue(&[1, 2, 3]),
            Err(PlaybackError::Codec(_))
        ));
        assert_eq!(sched.cursor(), 0.0);
        let ok = sched.enqueue(&chunk(0.2)).unwrap();
        assert_eq!(ok.start_at, 0.0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk(0.2)).unwrap();
        sched.teardown();
        sched.teardown();
        assert!(sched.is_closed());
        assert_eq!(sched.tracked_len(), 0);
        assert_eq!(out.0.lock().unwrap().closed, 1);
        assert!(matches!(
            sched.enqueue(&chunk(0.2)),
            Err(PlaybackError::Closed)
        ));
    }
}
