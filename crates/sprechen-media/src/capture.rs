//! Microphone capture. Pulls fixed-size frames, encodes them and forwards
//! them to the session while the mute flag is clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use sprechen_core::protocol::OutboundFrame;

use crate::codec::encode_outgoing;
use crate::error::CaptureError;

/// Software mute shared between the UI (writer) and the capture tap (reader).
#[derive(Debug, Clone, Default)]
pub struct MuteFlag(Arc<AtomicBool>);

impl MuteFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.0.store(muted, Ordering::SeqCst);
    }

    /// Flip the flag, returning the new value.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::SeqCst)
    }
}

/// An exclusively held input stream.
///
/// The hold is released exactly once: on [`CaptureStream::release`] or on drop.
pub struct CaptureStream {
    frames: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureStream {
    pub fn new(frames: mpsc::Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            release: None,
        }
    }

    /// Run `release` when the stream is let go (stops a device, closes a file, ...).
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    pub fn release(&mut self) {
        self.frames.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// A source of microphone audio.
pub trait AudioInput: Send {
    /// Acquire exclusive access to the input. May block; the session calls it
    /// on the blocking pool.
    fn acquire(&mut self) -> Result<CaptureStream, CaptureError>;
}

/// Input fed programmatically through a channel.
///
/// Used to embed the session in hosts that own their own audio graph, and in tests.
pub struct ChannelInput {
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    sample_rate: u32,
    released: Arc<AtomicBool>,
}

/// Producer side of a [`ChannelInput`].
#[derive(Clone)]
pub struct ChannelInputHandle {
    tx: mpsc::Sender<Vec<f32>>,
    released: Arc<AtomicBool>,
}

impl ChannelInput {
    pub fn new(sample_rate: u32) -> (Self, ChannelInputHandle) {
        let (tx, rx) = mpsc::channel(64);
        let released = Arc::new(AtomicBool::new(false));
        (
            Self {
                frames: Some(rx),
                sample_rate,
                released: released.clone(),
            },
            ChannelInputHandle { tx, released },
        )
    }

    /// An input whose acquisition is always declined.
    pub fn denied(sample_rate: u32) -> Self {
        Self {
            frames: None,
            sample_rate,
            released: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl AudioInput for ChannelInput {
    fn acquire(&mut self) -> Result<CaptureStream, CaptureError> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| CaptureError::PermissionDenied("input not available".into()))?;
        let released = self.released.clone();
        Ok(CaptureStream::new(frames, self.sample_rate)
            .on_release(move || released.store(true, Ordering::SeqCst)))
    }
}

impl ChannelInputHandle {
    /// Push one frame. Returns false once the stream has been released.
    pub async fn push(&self, frame: Vec<f32>) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Per-frame decision: drop while muted, otherwise encode.
#[derive(Debug, Clone)]
pub struct CaptureTap {
    mute: MuteFlag,
    sample_rate: u32,
}

impl CaptureTap {
    pub fn new(mute: MuteFlag, sample_rate: u32) -> Self {
        Self { mute, sample_rate }
    }

    pub fn on_frame(&self, samples: &[f32]) -> Option<OutboundFrame> {
        if self.mute.is_muted() {
            return None;
        }
        Some(encode_outgoing(samples, self.sample_rate))
    }
}

/// Drives a [`CaptureStream`] into the session's outbound sink.
///
/// Sends are fire-and-forget: a slow network never holds up the next frame.
pub struct CapturePipeline {
    mute: MuteFlag,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// `parent` cancels the pipeline together with the owning session.
    pub fn new(mute: MuteFlag, parent: &CancellationToken) -> Self {
        Self {
            mute,
            cancel: parent.child_token(),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn start(&mut self, mut stream: CaptureStream, sink: mpsc::UnboundedSender<OutboundFrame>) {
        if self.task.is_some() || self.cancel.is_cancelled() {
            warn!("Capture pipeline already started or stopped; releasing input");
            stream.release();
            return;
        }

        let tap = CaptureTap::new(self.mute.clone(), stream.sample_rate());
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            debug!(sample_rate = stream.sample_rate(), "Capture started");
            let mut forwarded: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = stream.next_frame() => {
                        let Some(samples) = frame else { break };
                        let Some(encoded) = tap.on_frame(&samples) else {
                            trace!("Muted, dropping frame");
                            continue;
                        };
                        if sink.send(encoded).is_err() {
                            debug!("Capture sink closed");
                            break;
                        }
                        forwarded += 1;
                    }
                }
            }
            stream.release();
            debug!(forwarded, "Capture stopped");
        }));
    }

    /// Stop pulling frames and release the input. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        self.cancel.cancel();
    }

    /// Stop, then wait until the capture task has released its input.
    pub async fn stopped(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
