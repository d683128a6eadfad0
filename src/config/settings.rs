use crate::session::bootstrap::DEFAULT_DIALOG_LIMIT;
use crate::session::{CallLimits, ConnectionIdentity};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WORKDIR: &str = ".signer";
pub const DEFAULT_SESSION_DIR: &str = ".";
pub const DEFAULT_ACCOUNT: &str = "my_account";
pub const DEFAULT_REPLY_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Process-wide runtime settings, resolved once by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of task configs, run records and bootstrap state.
    pub workdir: PathBuf,
    /// Where backend session storage lives.
    pub session_dir: PathBuf,
    pub account: String,
    pub limits: CallLimits,
    pub reply_poll_interval: Duration,
    /// Pause before a task restarts its cycle after a recoverable failure.
    pub cooldown: Duration,
    pub dialog_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            session_dir: PathBuf::from(DEFAULT_SESSION_DIR),
            account: DEFAULT_ACCOUNT.to_string(),
            limits: CallLimits::default(),
            reply_poll_interval: DEFAULT_REPLY_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            dialog_limit: DEFAULT_DIALOG_LIMIT,
        }
    }
}

impl Settings {
    pub fn identity(&self) -> ConnectionIdentity {
        self.identity_for(&self.account)
    }

    pub fn identity_for(&self, account: &str) -> ConnectionIdentity {
        ConnectionIdentity::new(account, self.session_dir.clone())
    }

    /// Per-identity bootstrap state (`me.json`, `latest_chats.json`).
    pub fn state_dir(&self) -> PathBuf {
        self.workdir.join("users")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cooldown, Duration::from_secs(30));
        assert_eq!(settings.dialog_limit, 20);
        assert_eq!(settings.identity().account(), "my_account");
        assert_eq!(settings.state_dir(), PathBuf::from(".signer/users"));
    }

    #[test]
    fn test_identity_for_shares_session_dir() {
        let settings = Settings {
            session_dir: PathBuf::from("/var/sessions"),
            ..Settings::default()
        };
        let id = settings.identity_for("second");
        assert_eq!(id.account(), "second");
        assert_eq!(id.storage(), std::path::Path::new("/var/sessions"));
    }
}
