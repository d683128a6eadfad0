use crate::backend::ChatId;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    #[default]
    Exact,
    Contains,
    Regex,
}

/// A sender filter entry: a numeric user id, `@username`, or `me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub chat_id: ChatId,
    #[serde(default)]
    pub rule: MatchRule,
    #[serde(default)]
    pub rule_value: String,
    /// Only messages from these senders match. Absent means anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_ids: Option<Vec<UserRef>>,
    #[serde(default)]
    pub always_ignore_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_send_text: Option<String>,
    #[serde(default)]
    pub ai_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,
    /// The first capture group of this pattern becomes the reply text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_text_search_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<u64>,
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub push_via_server_chan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_chan_send_key: Option<String>,
}

impl MatchConfig {
    pub fn new(chat_id: ChatId, rule: MatchRule, rule_value: impl Into<String>) -> Self {
        Self {
            chat_id,
            rule,
            rule_value: rule_value.into(),
            from_user_ids: None,
            always_ignore_me: false,
            default_send_text: None,
            ai_reply: false,
            ai_prompt: None,
            send_text_search_regex: None,
            delete_after: None,
            ignore_case: true,
            webhook_url: None,
            push_via_server_chan: false,
            server_chan_send_key: None,
        }
    }

    /// Whether a match produces a message back into the chat.
    pub fn replies(&self) -> bool {
        self.ai_reply || self.default_send_text.is_some() || self.send_text_search_regex.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub match_cfgs: Vec<MatchConfig>,
}

impl MonitorConfig {
    /// Distinct chats covered by any match config, in first-seen order.
    pub fn chat_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = Vec::new();
        for cfg in &self.match_cfgs {
            if !ids.contains(&cfg.chat_id) {
                ids.push(cfg.chat_id);
            }
        }
        ids
    }
}
