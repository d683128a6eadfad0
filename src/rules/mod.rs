//! Monitor rule evaluation.

use crate::backend::{InboundEvent, Sender};
use crate::config::schema::{MatchConfig, MatchRule, UserRef};
use crate::errors::{AutosignError, AutosignResult};
use regex::{Regex, RegexBuilder};

/// A [`MatchConfig`] with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    cfg: MatchConfig,
    pattern: Option<Regex>,
    reply_pattern: Option<Regex>,
}

fn compile(pattern: &str, ignore_case: bool, what: &str) -> AutosignResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| AutosignError::Config(format!("invalid {} '{}': {}", what, pattern, e)))
}

impl CompiledRule {
    pub fn new(cfg: &MatchConfig) -> AutosignResult<Self> {
        let pattern = match cfg.rule {
            MatchRule::Regex => Some(compile(&cfg.rule_value, cfg.ignore_case, "rule regex")?),
            MatchRule::Exact | MatchRule::Contains => None,
        };
        let reply_pattern = cfg
            .send_text_search_regex
            .as_deref()
            .map(|p| compile(p, cfg.ignore_case, "send_text_search_regex"))
            .transpose()?;
        Ok(Self {
            cfg: cfg.clone(),
            pattern,
            reply_pattern,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn match_text(&self, text: &str) -> bool {
        let value = &self.cfg.rule_value;
        match self.cfg.rule {
            MatchRule::Exact if self.cfg.ignore_case => text.to_lowercase() == value.to_lowercase(),
            MatchRule::Exact => text == value,
            MatchRule::Contains if self.cfg.ignore_case => {
                text.to_lowercase().contains(&value.to_lowercase())
            }
            MatchRule::Contains => text.contains(value.as_str()),
            MatchRule::Regex => self.pattern.as_ref().is_some_and(|re| re.is_match(text)),
        }
    }

    /// Sender filter. Without `from_user_ids` every sender passes.
    pub fn match_user(&self, from: Option<&Sender>) -> bool {
        let Some(ref allowed) = self.cfg.from_user_ids else {
            return true;
        };
        let Some(sender) = from else {
            return false;
        };
        allowed.iter().any(|entry| match entry {
            UserRef::Id(id) => *id == sender.id,
            UserRef::Name(name) if name == "me" => sender.is_self,
            UserRef::Name(name) => {
                if let Ok(id) = name.parse::<i64>() {
                    return id == sender.id;
                }
                let wanted = name.strip_prefix('@').unwrap_or(name);
                sender
                    .username
                    .as_deref()
                    .is_some_and(|u| u.to_lowercase() == wanted.to_lowercase())
            }
        })
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        if event.chat_id != self.cfg.chat_id {
            return false;
        }
        if self.cfg.always_ignore_me && event.is_from_self() {
            return false;
        }
        if !self.match_user(event.from.as_ref()) {
            return false;
        }
        event_text(event).is_some_and(|text| self.match_text(text))
    }

    /// Text to send back for a matched message.
    ///
    /// With `send_text_search_regex` the first capture group is the reply; when the
    /// pattern does not match, `default_send_text` is used.
    pub fn reply_text(&self, text: &str) -> AutosignResult<Option<String>> {
        if let Some(ref re) = self.reply_pattern
            && let Some(caps) = re.captures(text)
        {
            return match caps.get(1) {
                Some(group) => Ok(Some(group.as_str().to_string())),
                None => Err(AutosignError::Config(format!(
                    "send_text_search_regex '{}' has no capture group",
                    re.as_str()
                ))),
            };
        }
        Ok(self.cfg.default_send_text.clone())
    }
}

/// The message text, or the photo caption for media messages.
pub fn event_text(event: &InboundEvent) -> Option<&str> {
    event
        .text
        .as_deref()
        .or_else(|| event.photo.as_ref().and_then(|p| p.caption.as_deref()))
}
