use std::fmt;
use std::path::{Path, PathBuf};

/// Which backend session a connection belongs to: an account label plus the
/// directory its session storage lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionIdentity {
    account: String,
    storage: PathBuf,
}

impl ConnectionIdentity {
    pub fn new(account: impl Into<String>, storage: impl Into<PathBuf>) -> Self {
        Self {
            account: account.into(),
            storage: storage.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    /// One path component naming this identity, distinct for every
    /// (account, storage) pair and safe to join onto a directory.
    pub fn state_key(&self) -> String {
        format!(
            "{}@{}",
            escape_component(&self.account),
            escape_component(&self.storage.to_string_lossy())
        )
    }
}

/// Keep `[A-Za-z0-9.-]`, write every other byte as `_xx`.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && !out.is_empty()) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.account, self.storage.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_equality_covers_both_parts() {
        let a = ConnectionIdentity::new("acct", "/tmp/s1");
        let b = ConnectionIdentity::new("acct", "/tmp/s1");
        let c = ConnectionIdentity::new("acct", "/tmp/s2");
        let d = ConnectionIdentity::new("other", "/tmp/s1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let set: HashSet<_> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_state_key_separates_storage_and_escapes() {
        let a = ConnectionIdentity::new("acct", "/tmp/s1");
        let b = ConnectionIdentity::new("acct", "/tmp/s2");
        assert_ne!(a.state_key(), b.state_key());
        assert_eq!(a.state_key(), "acct@_2ftmp_2fs1");

        let sneaky = ConnectionIdentity::new("../up", "s");
        assert_eq!(sneaky.state_key(), "_2e._2fup@s");
        assert!(!sneaky.state_key().contains('/'));

        let x = ConnectionIdentity::new("a_b", "s");
        let y = ConnectionIdentity::new("a/b", "s");
        assert_ne!(x.state_key(), y.state_key());
    }

    #[test]
    fn test_identity_display() {
        let id = ConnectionIdentity::new("acct", "sessions");
        assert_eq!(id.to_string(), "acct@sessions");
    }
}
