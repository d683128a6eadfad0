use crate::backend::ChatId;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `HH:MM:SS` or `HH:MM`.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn default_action_interval() -> f64 {
    1.0
}

fn default_reply_timeout() -> u64 {
    120
}

fn default_sign_interval() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Current (v3)
// ---------------------------------------------------------------------------

/// One step of a check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SignAction {
    SendText { text: String },
    SendDice { dice: String },
    ClickKeyboardByText { text: String },
    ChooseOptionByImage,
    ReplyByCalculationProblem,
}

impl SignAction {
    /// Whether the action is answered by the bot and must wait for that answer.
    pub fn requires_reply(&self) -> bool {
        match self {
            Self::SendText { .. } | Self::SendDice { .. } => false,
            Self::ClickKeyboardByText { .. }
            | Self::ChooseOptionByImage
            | Self::ReplyByCalculationProblem => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendText { .. } => "send_text",
            Self::SendDice { .. } => "send_dice",
            Self::ClickKeyboardByText { .. } => "click_keyboard_by_text",
            Self::ChooseOptionByImage => "choose_option_by_image",
            Self::ReplyByCalculationProblem => "reply_by_calculation_problem",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignChat {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Seconds after which sent texts are deleted again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<u64>,
    pub actions: Vec<SignAction>,
    /// Seconds between consecutive actions.
    #[serde(default = "default_action_interval")]
    pub action_interval: f64,
    /// Seconds to wait for the bot's answer to a reply-expecting action.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: u64,
}

impl SignChat {
    pub fn new(chat_id: ChatId, actions: Vec<SignAction>) -> Self {
        Self {
            chat_id,
            name: None,
            delete_after: None,
            actions,
            action_interval: default_action_interval(),
            reply_timeout: default_reply_timeout(),
        }
    }

    pub fn action_interval(&self) -> Duration {
        Duration::from_secs_f64(self.action_interval.max(0.0))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout)
    }

    pub fn label(&self) -> String {
        match self.name {
            Some(ref name) => format!("{} ({})", name, self.chat_id),
            None => self.chat_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignConfig {
    pub chats: Vec<SignChat>,
    /// Daily `HH:MM[:SS]` or a 5/6-field cron expression.
    pub sign_at: String,
    #[serde(default)]
    pub random_seconds: u64,
    /// Seconds between chats.
    #[serde(default = "default_sign_interval")]
    pub sign_interval: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl SignConfig {
    pub fn sign_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sign_interval.max(0.0))
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        self.chats.iter().map(|c| c.chat_id).collect()
    }
}

// ---------------------------------------------------------------------------
// Legacy layouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignChatV2 {
    pub chat_id: ChatId,
    pub sign_text: String,
    #[serde(default)]
    pub delete_after: Option<u64>,
    #[serde(default)]
    pub as_dice: bool,
    #[serde(default)]
    pub text_of_btn_to_click: Option<String>,
    #[serde(default)]
    pub choose_option_by_image: bool,
    #[serde(default)]
    pub has_calculation_problem: bool,
}

impl SignChatV2 {
    fn into_current(self) -> SignChat {
        let mut actions = Vec::new();
        if !self.sign_text.is_empty() {
            actions.push(if self.as_dice {
                SignAction::SendDice {
                    dice: self.sign_text,
                }
            } else {
                SignAction::SendText {
                    text: self.sign_text,
                }
            });
        }
        if let Some(text) = self.text_of_btn_to_click.filter(|t| !t.is_empty()) {
            actions.push(SignAction::ClickKeyboardByText { text });
        }
        if self.choose_option_by_image {
            actions.push(SignAction::ChooseOptionByImage);
        }
        if self.has_calculation_problem {
            actions.push(SignAction::ReplyByCalculationProblem);
        }
        SignChat {
            delete_after: self.delete_after,
            ..SignChat::new(self.chat_id, actions)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignConfigV2 {
    pub chats: Vec<SignChatV2>,
    pub sign_at: String,
    #[serde(default)]
    pub random_seconds: u64,
}

impl SignConfigV2 {
    pub fn into_current(self) -> SignConfig {
        SignConfig {
            chats: self.chats.into_iter().map(SignChatV2::into_current).collect(),
            sign_at: self.sign_at,
            random_seconds: self.random_seconds,
            sign_interval: default_sign_interval(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignConfigV1 {
    pub chat_id: ChatId,
    pub sign_text: String,
    pub sign_at: String,
    #[serde(default)]
    pub random_seconds: u64,
}

impl SignConfigV1 {
    pub fn into_v2(self) -> SignConfigV2 {
        SignConfigV2 {
            chats: vec![SignChatV2 {
                chat_id: self.chat_id,
                sign_text: self.sign_text,
                delete_after: None,
                as_dice: false,
                text_of_btn_to_click: None,
                choose_option_by_image: false,
                has_calculation_problem: false,
            }],
            sign_at: parse_time_of_day(&self.sign_at)
                .map_or(self.sign_at, |t| t.format("%H:%M:%S").to_string()),
            random_seconds: self.random_seconds,
        }
    }
}
