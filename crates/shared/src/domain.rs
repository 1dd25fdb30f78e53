use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shape of a chat message. Every consumer matches on all four kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Voice {
        audio_ref: String,
        duration_seconds: u32,
    },
    Image {
        attachment_ref: String,
        file_name: String,
    },
    Document {
        attachment_ref: String,
        file_name: String,
        file_size_bytes: u64,
    },
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice { .. } => "voice",
            Self::Image { .. } => "image",
            Self::Document { .. } => "document",
        }
    }

    /// Content shown in the list for non-text kinds.
    pub fn placeholder_content(&self) -> Option<String> {
        match self {
            Self::Text => None,
            Self::Voice { .. } => Some("Voice message".to_string()),
            Self::Image { .. } => Some("Image".to_string()),
            Self::Document { file_name, .. } => Some(file_name.clone()),
        }
    }

    pub fn attachment_ref(&self) -> Option<&str> {
        match self {
            Self::Text => None,
            Self::Voice { audio_ref, .. } => Some(audio_ref),
            Self::Image { attachment_ref, .. } | Self::Document { attachment_ref, .. } => {
                Some(attachment_ref)
            }
        }
    }

    /// Same kind with its blob reference swapped, used once an upload lands.
    pub fn with_attachment_ref(&self, new_ref: impl Into<String>) -> Self {
        let new_ref = new_ref.into();
        match self {
            Self::Text => Self::Text,
            Self::Voice {
                duration_seconds, ..
            } => Self::Voice {
                audio_ref: new_ref,
                duration_seconds: *duration_seconds,
            },
            Self::Image { file_name, .. } => Self::Image {
                attachment_ref: new_ref,
                file_name: file_name.clone(),
            },
            Self::Document {
                file_name,
                file_size_bytes,
                ..
            } => Self::Document {
                attachment_ref: new_ref,
                file_name: file_name.clone(),
                file_size_bytes: *file_size_bytes,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Voice,
    Image,
    Document,
}

impl AttachmentKind {
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Voice => "voice-messages",
            Self::Image => "chat-images",
            Self::Document => "chat-documents",
        }
    }
}
