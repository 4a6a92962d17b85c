use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MediaAcquisition,
    Join,
    Leave,
    InvalidChannel,
    NotInChannel,
    StoreUnavailable,
    SendFailure,
}

impl ErrorCode {
    pub fn title(self) -> &'static str {
        match self {
            Self::MediaAcquisition => "Camera or microphone unavailable",
            Self::Join => "Could not join the channel",
            Self::Leave => "Leaving the channel did not complete cleanly",
            Self::InvalidChannel => "Enter a channel name",
            Self::NotInChannel => "Join a channel first",
            Self::StoreUnavailable => "Chat is unavailable",
            Self::SendFailure => "Message was not sent",
        }
    }
}

/// User-visible error raised to the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub code: ErrorCode,
    pub message: String,
}

impl Alert {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
