use crate::errors::{AutosignError, AutosignResult};
use crate::rules::CompiledRule;
use crate::runner::schedule::{Schedule, parse_timezone};
use serde_json::Value;
use tracing::debug;

mod monitor;
mod sign;

pub use monitor::*;
pub use sign::*;

/// Upper bound for a sign config's random delay.
pub const MAX_RANDOM_SECONDS: u64 = 7 * 24 * 3600;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl SignConfig {
    pub fn validate(&self) -> AutosignResult<()> {
        if self.chats.is_empty() {
            return Err(AutosignError::Config(
                "sign config must contain at least one chat".into(),
            ));
        }
        for chat in &self.chats {
            if !chat.action_interval.is_finite() || chat.action_interval < 0.0 {
                return Err(AutosignError::Config(format!(
                    "chats[{}].action_interval must be a non-negative number",
                    chat.chat_id
                )));
            }
            for action in &chat.actions {
                let empty = match action {
                    SignAction::SendText { text } | SignAction::ClickKeyboardByText { text } => {
                        text.is_empty()
                    }
                    SignAction::SendDice { dice } => dice.is_empty(),
                    SignAction::ChooseOptionByImage | SignAction::ReplyByCalculationProblem => {
                        false
                    }
                };
                if empty {
                    return Err(AutosignError::Config(format!(
                        "chats[{}]: {} needs a non-empty text",
                        chat.chat_id,
                        action.name()
                    )));
                }
            }
        }
        if !self.sign_interval.is_finite() || self.sign_interval < 0.0 {
            return Err(AutosignError::Config(
                "sign_interval must be a non-negative number".into(),
            ));
        }
        if self.random_seconds > MAX_RANDOM_SECONDS {
            return Err(AutosignError::Config(format!(
                "random_seconds must be at most {} (one week), got {}",
                MAX_RANDOM_SECONDS, self.random_seconds
            )));
        }
        Schedule::parse(&self.sign_at)?;
        if let Some(ref tz) = self.timezone {
            parse_timezone(tz)?;
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> AutosignResult<()> {
        if self.match_cfgs.is_empty() {
            return Err(AutosignError::Config(
                "monitor config must contain at least one match config".into(),
            ));
        }
        for cfg in &self.match_cfgs {
            CompiledRule::new(cfg)?;
            if cfg.push_via_server_chan
                && cfg
                    .server_chan_send_key
                    .as_deref()
                    .is_none_or(str::is_empty)
            {
                return Err(AutosignError::Config(format!(
                    "match config for chat {} pushes via ServerChan without a send key",
                    cfg.chat_id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Versioned loading
// ---------------------------------------------------------------------------

/// Parse a sign config of any known layout, newest first.
///
/// Returns the current-form config and whether it had to be migrated.
pub fn load_sign_config(json: &str) -> AutosignResult<(SignConfig, bool)> {
    let data: Value = serde_json::from_str(json)
        .map_err(|e| AutosignError::Config(format!("sign config is not valid JSON: {}", e)))?;

    let (config, migrated) = match serde_json::from_value::<SignConfig>(data.clone()) {
        Ok(config) => (config, false),
        Err(current_err) => {
            if let Ok(v2) = serde_json::from_value::<SignConfigV2>(data.clone()) {
                debug!("migrating sign config from v2");
                (v2.into_current(), true)
            } else if let Ok(v1) = serde_json::from_value::<SignConfigV1>(data) {
                debug!("migrating sign config from v1");
                (v1.into_v2().into_current(), true)
            } else {
                return Err(AutosignError::Config(format!(
                    "unrecognized sign config: {}",
                    current_err
                )));
            }
        }
    };
    config.validate()?;
    Ok((config, migrated))
}

pub fn load_monitor_config(json: &str) -> AutosignResult<MonitorConfig> {
    let config: MonitorConfig = serde_json::from_str(json)
        .map_err(|e| AutosignError::Config(format!("invalid monitor config: {}", e)))?;
    config.validate()?;
    Ok(config)
}
