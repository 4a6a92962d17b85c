use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(ParticipantId, u32);
id_newtype!(ViewHandle, u64);

/// Name of a room shared by the media transport and the chat store.
///
/// Always non-empty and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("channel name must not be empty")]
pub struct EmptyChannelName;

impl ChannelName {
    pub fn parse(raw: &str) -> Result<Self, EmptyChannelName> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EmptyChannelName);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = EmptyChannelName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    Host,
    Audience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Playback latency requested by audience members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceLatency {
    Low,
    UltraLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Broadcast session with host and audience roles.
    Live,
    /// Every member is a peer that may publish.
    Rtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub participant_id: ParticipantId,
    pub has_audio: bool,
    pub has_video: bool,
}

impl RemoteParticipant {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            has_audio: false,
            has_video: false,
        }
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_audio,
            MediaKind::Video => self.has_video,
        }
    }

    pub fn set(&mut self, kind: MediaKind, present: bool) {
        match kind {
            MediaKind::Audio => self.has_audio = present,
            MediaKind::Video => self.has_video = present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_trimmed() {
        let name = ChannelName::parse("  lobby ").expect("channel");
        assert_eq!(name.as_str(), "lobby");
    }

    #[test]
    fn blank_channel_name_is_rejected() {
        assert_eq!(ChannelName::parse("   "), Err(EmptyChannelName));
        assert!(serde_json::from_str::<ChannelName>("\"\"").is_err());
    }

    #[test]
    fn remote_participant_tracks_media_kinds() {
        let mut participant = RemoteParticipant::new(ParticipantId(4));
        participant.set(MediaKind::Video, true);
        assert!(participant.has(MediaKind::Video));
        assert!(!participant.has(MediaKind::Audio));
    }
}
