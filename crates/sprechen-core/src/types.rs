use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection state of a live tutoring session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    /// Whether the session has reached a state it never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// User-visible status of a live session.
///
/// The messages are the Turkish strings shown under the tutor avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Connecting,
    Listening,
    PermissionRequired,
    Error,
    TimedOut,
    Closed,
}

impl SessionStatus {
    pub fn message(self) -> &'static str {
        match self {
            Self::Connecting => "Bağlanıyor...",
            Self::Listening => "Dinliyor...",
            Self::PermissionRequired => "Mikrofon izni gerekli.",
            Self::Error => "Hata oluştu.",
            Self::TimedOut => "Bağlantı zaman aşımına uğradı.",
            Self::Closed => "Bağlantı kapandı.",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Aspect ratio for generated vocabulary images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1:1" | "square" => Ok(Self::Square),
            "16:9" | "landscape" => Ok(Self::Landscape),
            "9:16" | "portrait" => Ok(Self::Portrait),
            other => Err(format!("unknown aspect ratio '{other}' (expected 1:1, 16:9 or 9:16)")),
        }
    }
}
