use thiserror::Error;

/// Failure converting PCM audio. Per chunk when decoding replies; never fatal to a session.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("channel count must be at least 1")]
    InvalidChannels,

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user declined, or no input device exists.
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    #[error("capture device error: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback output is closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("playback device error: {0}")]
    Device(String),
}
