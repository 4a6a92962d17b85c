use shared::{
    domain::EmptyChannelName,
    error::{Alert, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("camera or microphone unavailable: {0}")]
    MediaAcquisition(String),
    #[error("failed to join channel: {0}")]
    Join(String),
    #[error("transport leave failed after local cleanup: {0}")]
    Leave(String),
    #[error("channel name must not be empty")]
    InvalidChannel,
    #[error("join a channel before using chat")]
    NotInChannel,
    #[error("chat unavailable: {0}")]
    StoreUnavailable(String),
    #[error("message not sent: {0}")]
    SendFailure(String),
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MediaAcquisition(_) => ErrorCode::MediaAcquisition,
            Self::Join(_) => ErrorCode::Join,
            Self::Leave(_) => ErrorCode::Leave,
            Self::InvalidChannel => ErrorCode::InvalidChannel,
            Self::NotInChannel => ErrorCode::NotInChannel,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::SendFailure(_) => ErrorCode::SendFailure,
        }
    }

    pub fn alert(&self) -> Alert {
        Alert::new(self.code(), self.to_string())
    }
}

impl From<EmptyChannelName> for ClientError {
    fn from(_: EmptyChannelName) -> Self {
        Self::InvalidChannel
    }
}
