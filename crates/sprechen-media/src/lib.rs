//! Audio pipeline for the live tutor: codec, capture, playback scheduling
//! and the realtime session lifecycle.

pub mod capture;
pub mod codec;
#[cfg(feature = "device")]
pub mod device;
pub mod error;
pub mod live_session;
pub mod mixer;
pub mod playback;
pub mod wav;

pub use error::{CaptureError, CodecError, PlaybackError};
