//! Live tutor session: connects the microphone to a realtime provider and
//! plays the streamed reply.
//!
//! One controller task owns the session. It handles provider events,
//! captured frames and playback-ended signals in a single select loop, so
//! none of its state needs a lock. Callers talk to it through a
//! [`LiveSessionHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use sprechen_core::config::LiveSettings;
use sprechen_core::protocol::{
    LiveConfig, OutboundFrame, ProviderEvent, RealtimeConnection, RealtimeProvider, ServerMessage,
};
use sprechen_core::types::{SessionState, SessionStatus};

use crate::capture::{AudioInput, CapturePipeline, CaptureStream, MuteFlag};
use crate::codec::decode_incoming;
use crate::error::{CaptureError, PlaybackError};
use crate::playback::{AudioOutput, ChunkId, PlaybackScheduler, ScheduledChunk};

const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// What the session is doing, for observers that want more than the status line.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ChunkScheduled(ScheduledChunk),
    ChunkFinished(ChunkId),
    Interrupted { stopped: usize },
    DecodeFailed(String),
}

/// State and status published together so observers never see them disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: SessionStatus,
}

/// A live session that has not been started yet.
pub struct LiveSession {
    config: LiveConfig,
    provider: Arc<dyn RealtimeProvider>,
    input: Box<dyn AudioInput>,
    output: Box<dyn AudioOutput>,
    output_sample_rate: u32,
    connect_timeout: Duration,
    mute: MuteFlag,
}

impl LiveSession {
    pub fn new(
        config: LiveConfig,
        provider: Arc<dyn RealtimeProvider>,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        Self {
            config,
            provider,
            input,
            output,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            mute: MuteFlag::new(),
        }
    }

    /// Build a session from the `live` config section.
    pub fn from_settings(
        settings: &LiveSettings,
        provider: Arc<dyn RealtimeProvider>,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        Self::new(settings.to_live_config(), provider, input, output)
            .with_output_sample_rate(settings.output_sample_rate)
            .with_connect_timeout(settings.connect_timeout())
    }

    /// Sample rate of the provider's reply audio.
    pub fn with_output_sample_rate(mut self, sample_rate: u32) -> Self {
        self.output_sample_rate = sample_rate;
        self
    }

    /// How long to wait for the provider to open before giving up.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Start with an existing mute flag (e.g., one the UI already holds).
    pub fn with_mute(mut self, mute: MuteFlag) -> Self {
        self.mute = mute;
        self
    }

    /// Spawn the controller task.
    ///
    /// Returns a handle for controlling the session and a stream of session events.
    pub fn start(self) -> (LiveSessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let cancel = CancellationToken::new();

        let handle = LiveSessionHandle {
            cancel: cancel.clone(),
            mute: self.mute.clone(),
            snapshot: snapshot_rx,
            frames: frames_tx.clone(),
        };

        let controller = Controller {
            config: self.config,
            provider: self.provider,
            scheduler: PlaybackScheduler::new(self.output, self.output_sample_rate, 1),
            capture: CapturePipeline::new(self.mute, &cancel),
            stream: None,
            outbound: None,
            pending: Vec::new(),
            state: SessionState::Idle,
            connect_timeout: self.connect_timeout,
            cancel,
            frames_tx,
            events_tx,
            snapshot_tx,
        };

        let input = self.input;
        tokio::spawn(async move {
            controller.run(input, frames_rx).await;
        });

        (handle, events_rx)
    }
}

/// Handle for controlling a running session from outside.
///
/// Dropping the handle closes the session.
pub struct LiveSessionHandle {
    cancel: CancellationToken,
    mute: MuteFlag,
    snapshot: watch::Receiver<SessionSnapshot>,
    frames: mpsc::UnboundedSender<OutboundFrame>,
}

impl LiveSessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch state and status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.set_muted(muted);
    }

    /// Flip the mute flag, returning the new value. The session keeps running either way.
    pub fn toggle_mute(&self) -> bool {
        self.mute.toggle()
    }

    /// Send a frame to the provider. Frames sent before the session opens
    /// are queued and flushed in order once it does.
    pub fn send_realtime_input(&self, frame: OutboundFrame) {
        let _ = self.frames.send(frame);
    }

    /// Close the session. Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait until the session has closed or errored and released its resources.
    pub async fn closed(&self) -> SessionSnapshot {
        let mut rx = self.snapshot.clone();
        let terminal = rx.wait_for(|s| s.state.is_terminal()).await.map(|s| *s);
        terminal.unwrap_or_else(|_| *rx.borrow())
    }
}

impl Drop for LiveSessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Controller {
    config: LiveConfig,
    provider: Arc<dyn RealtimeProvider>,
    scheduler: PlaybackScheduler,
    capture: CapturePipeline,
    /// Held from acquisition until capture starts.
    stream: Option<CaptureStream>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    pending: Vec<OutboundFrame>,
    state: SessionState,
    connect_timeout: Duration,
    cancel: CancellationToken,
    frames_tx: mpsc::UnboundedSender<OutboundFrame>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl Controller {
    async fn run(
        mut self,
        mut input: Box<dyn AudioInput>,
        mut frames_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        info!(
            provider = self.provider.id(),
            model = %self.config.model,
            voice = %self.config.voice,
            "Live session starting"
        );
        self.transition(SessionState::Connecting, SessionStatus::Connecting);

        // Opening a device can block until the driver answers.
        let acquired = tokio::task::spawn_blocking(move || input.acquire())
            .await
            .unwrap_or_else(|e| Err(CaptureError::Device(format!("input task failed: {e}"))));
        match acquired {
            Ok(stream) => self.stream = Some(stream),
            Err(e) => {
                warn!(error = %e, "Microphone unavailable");
                self.shutdown(SessionState::Errored, SessionStatus::PermissionRequired).await;
                return;
            }
        }

        let cancel = self.cancel.clone();
        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);

        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shutdown(SessionState::Closed, SessionStatus::Closed).await;
                return;
            }
            _ = &mut deadline => {
                self.on_timeout().await;
                return;
            }
            result = self.provider.connect(&self.config) => match result {
                Ok(connection) => connection,
                Err(e) => {
                    error!(error = %e, "Live connect failed");
                    self.shutdown(SessionState::Errored, SessionStatus::Error).await;
                    return;
                }
            },
        };

        let RealtimeConnection {
            outbound,
            events: mut provider_events,
        } = connection;
        self.outbound = Some(outbound);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Live session closed by user");
                    self.shutdown(SessionState::Closed, SessionStatus::Closed).await;
                    break;
                }
                _ = &mut deadline, if self.state == SessionState::Connecting => {
                    self.on_timeout().await;
                    break;
                }
                event = provider_events.recv() => match event {
                    Some(ProviderEvent::Open) => self.on_open(),
                    Some(ProviderEvent::Message(message)) => self.on_message(message),
                    Some(ProviderEvent::Error(message)) => {
                        error!(error = %message, "Live provider error");
                        self.shutdown(SessionState::Errored, SessionStatus::Error).await;
                        break;
                    }
                    Some(ProviderEvent::Close) | None => {
                        info!("Live connection closed");
                        self.shutdown(SessionState::Closed, SessionStatus::Closed).await;
                        break;
                    }
                },
                Some(frame) = frames_rx.recv() => self.send_realtime_input(frame),
                Some(id) = self.scheduler.next_ended() => {
                    if self.scheduler.on_ended(id) {
                        self.emit(SessionEvent::ChunkFinished(id));
                    }
                }
            }
        }
        debug!("Live session controller exited");
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "Ignoring duplicate open");
            return;
        }
        self.transition(SessionState::Open, SessionStatus::Listening);

        if let Some(stream) = self.stream.take() {
            self.capture.start(stream, self.frames_tx.clone());
        }

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(frames = pending.len(), "Flushing queued input");
        }
        for frame in pending {
            self.send_realtime_input(frame);
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if self.state != SessionState::Open {
            trace!(state = ?self.state, "Ignoring message outside an open session");
            return;
        }

        if let Some(audio) = message.audio.as_deref() {
            let scheduled = decode_incoming(audio)
                .map_err(PlaybackError::from)
                .and_then(|bytes| self.scheduler.enqueue(&bytes));
            match scheduled {
                Ok(chunk) => self.emit(SessionEvent::ChunkScheduled(chunk)),
                Err(e) => {
                    warn!(error = %e, "Skipping reply chunk");
                    self.emit(SessionEvent::DecodeFailed(e.to_string()));
                }
            }
        }

        if message.interrupted {
            let stopped = self.scheduler.interrupt();
            self.emit(SessionEvent::Interrupted { stopped });
        }

        if message.turn_complete {
            debug!("Model turn complete");
        }
    }

    /// Forward a frame while open, queue it while connecting, drop it once closed.
    fn send_realtime_input(&mut self, frame: OutboundFrame) {
        match self.state {
            SessionState::Open => {
                let Some(outbound) = &self.outbound else {
                    return;
                };
                if outbound.send(frame).is_err() {
                    debug!("Outbound channel closed, dropping frame");
                }
            }
            SessionState::Idle | SessionState::Connecting => self.pending.push(frame),
            SessionState::Closed | SessionState::Errored => {
                trace!("Session finished, dropping frame");
            }
        }
    }

    async fn on_timeout(&mut self) {
        warn!(
            timeout_secs = self.connect_timeout.as_secs_f64(),
            "Live connection did not open in time"
        );
        self.shutdown(SessionState::Errored, SessionStatus::TimedOut).await;
    }

    /// Release everything and enter a terminal state. Only the first call has any effect.
    async fn shutdown(&mut self, state: SessionState, status: SessionStatus) {
        if self.state.is_terminal() {
            return;
        }
        self.capture.stopped().await;
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
        self.scheduler.teardown();
        self.pending.clear();
        // Dropping the sender closes the provider connection.
        self.outbound.take();
        self.cancel.cancel();
        self.transition(state, status);
    }

    fn transition(&mut self, state: SessionState, status: SessionStatus) {
        self.state = state;
        self.snapshot_tx.send_replace(SessionSnapshot { state, status });
        info!(?state, status = %status, "Live session state changed");
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }
}
