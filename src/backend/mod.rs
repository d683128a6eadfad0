//! The remote chat backend as seen by the rest of the crate.
//!
//! Protocol clients plug in by implementing [`Backend`]. The crate never speaks the
//! wire protocol itself; [`offline::OfflineBackend`] is an in-process stand-in that
//! logs outbound calls and lets callers inject inbound events.

pub mod offline;

use crate::errors::{AutosignError, AutosignResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use tokio::sync::broadcast;

pub use offline::OfflineBackend;

pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserInfo {
    pub fn display_name(&self) -> String {
        if let Some(ref username) = self.username {
            return format!("@{}", username);
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// A chat addressed by numeric id or by public `@username`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Id(ChatId),
    Username(String),
}

impl FromStr for ChatRef {
    type Err = AutosignError;

    fn from_str(s: &str) -> AutosignResult<Self> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix('@') {
            if name.is_empty() {
                return Err(AutosignError::Config("empty chat username".into()));
            }
            return Ok(Self::Username(name.to_string()));
        }
        s.parse().map(Self::Id).map_err(|_| {
            AutosignError::Config(format!(
                "chat '{}' is neither a numeric id nor an @username",
                s
            ))
        })
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Username(name) => write!(f, "@{}", name),
        }
    }
}

/// Which members a member query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemberFilter {
    /// Members whose name matches the query.
    #[default]
    Search,
    Administrators,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(flatten)]
    pub user: UserInfo,
    #[serde(default)]
    pub is_bot: bool,
}

/// A message queued on the server for later delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub send_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// One inline-keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub is_self: bool,
}

/// A message observed on the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub from: Option<Sender>,
    pub text: Option<String>,
    pub photo: Option<ImageRef>,
    /// Inline keyboard rows; empty when the message has none.
    pub keyboard: Vec<Vec<Button>>,
}

impl InboundEvent {
    pub fn text(chat_id: ChatId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            from: None,
            text: Some(text.into()),
            photo: None,
            keyboard: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.from = Some(sender);
        self
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<Button>>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_photo(mut self, photo: ImageRef) -> Self {
        self.photo = Some(photo);
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.keyboard.iter().flatten()
    }

    pub fn has_keyboard(&self) -> bool {
        self.buttons().next().is_some()
    }

    pub fn is_from_self(&self) -> bool {
        self.from.as_ref().is_some_and(|s| s.is_self)
    }

    /// Human-readable one-message dump for logs.
    pub fn summary(&self) -> String {
        let mut s = format!("text: {}", self.text.as_deref().unwrap_or(""));
        if let Some(ref photo) = self.photo {
            let _ = write!(
                s,
                " | photo: ({}x{}) {}",
                photo.width,
                photo.height,
                photo.caption.as_deref().unwrap_or("")
            );
        }
        if self.has_keyboard() {
            s.push_str(" | keyboard:");
            for row in &self.keyboard {
                s.push_str(" [");
                let labels: Vec<&str> = row.iter().map(|b| b.text.as_str()).collect();
                s.push_str(&labels.join(" | "));
                s.push(']');
            }
        }
        s
    }
}

/// A single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetMe,
    GetDialogs {
        limit: usize,
    },
    SendMessage {
        chat_id: ChatId,
        text: String,
    },
    SendDice {
        chat_id: ChatId,
        emoji: String,
    },
    DeleteMessage {
        chat_id: ChatId,
        message_id: MessageId,
    },
    RequestCallbackAnswer {
        chat_id: ChatId,
        message_id: MessageId,
        data: String,
    },
    DownloadMedia {
        file_id: String,
    },
    GetChatMembers {
        chat: ChatRef,
        query: String,
        filter: MemberFilter,
        limit: usize,
    },
    /// Queue a text message the server delivers at `send_at`.
    ScheduleMessage {
        chat_id: ChatId,
        text: String,
        send_at: DateTime<Utc>,
    },
    GetScheduledMessages {
        chat_id: ChatId,
    },
    LogOut,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetMe => "get_me",
            Self::GetDialogs { .. } => "get_dialogs",
            Self::SendMessage { .. } => "send_message",
            Self::SendDice { .. } => "send_dice",
            Self::DeleteMessage { .. } => "delete_message",
            Self::RequestCallbackAnswer { .. } => "request_callback_answer",
            Self::DownloadMedia { .. } => "download_media",
            Self::GetChatMembers { .. } => "get_chat_members",
            Self::ScheduleMessage { .. } => "schedule_message",
            Self::GetScheduledMessages { .. } => "get_scheduled_messages",
            Self::LogOut => "log_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Me(UserInfo),
    Dialogs(Vec<ChatSummary>),
    Sent(SentMessage),
    Media(Vec<u8>),
    Members(Vec<Member>),
    Scheduled(Vec<ScheduledMessage>),
    Done,
}

impl Response {
    fn unexpected(self, wanted: &str) -> AutosignError {
        AutosignError::Backend(format!("expected {} response, got {:?}", wanted, self))
    }

    pub fn into_me(self) -> AutosignResult<UserInfo> {
        match self {
            Self::Me(user) => Ok(user),
            other => Err(other.unexpected("user")),
        }
    }

    pub fn into_dialogs(self) -> AutosignResult<Vec<ChatSummary>> {
        match self {
            Self::Dialogs(chats) => Ok(chats),
            other => Err(other.unexpected("dialogs")),
        }
    }

    pub fn into_sent(self) -> AutosignResult<SentMessage> {
        match self {
            Self::Sent(sent) => Ok(sent),
            other => Err(other.unexpected("sent message")),
        }
    }

    pub fn into_members(self) -> AutosignResult<Vec<Member>> {
        match self {
            Self::Members(members) => Ok(members),
            other => Err(other.unexpected("members")),
        }
    }

    pub fn into_scheduled(self) -> AutosignResult<Vec<ScheduledMessage>> {
        match self {
            Self::Scheduled(messages) => Ok(messages),
            other => Err(other.unexpected("scheduled messages")),
        }
    }

    pub fn into_media(self) -> AutosignResult<Vec<u8>> {
        match self {
            Self::Media(bytes) => Ok(bytes),
            other => Err(other.unexpected("media")),
        }
    }
}

/// Capability surface of a remote chat backend.
///
/// Implementations map their transport failures into [`AutosignError`]:
/// throttling into `FloodWait`, revoked sessions into `Unauthorized`,
/// transport loss into `Connection`, rejected requests into `Backend`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open the session. Returns whether the stored session is authorized.
    async fn connect(&self) -> AutosignResult<bool>;

    async fn disconnect(&self) -> AutosignResult<()>;

    async fn call(&self, request: Request) -> AutosignResult<Response>;

    /// Subscribe to inbound messages for every chat of this session.
    fn subscribe(&self) -> broadcast::Receiver<InboundEvent>;
}
