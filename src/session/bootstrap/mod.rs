//! Exactly-once identity resolution and dialog snapshot per connection identity.

use super::Connection;
use super::identity::ConnectionIdentity;
use crate::backend::{ChatSummary, UserInfo};
use crate::errors::{AutosignError, AutosignResult};
use crate::utils::atomic_write;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub const DEFAULT_DIALOG_LIMIT: usize = 20;

/// What the first successful bootstrap of an identity learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapRecord {
    pub identity: ConnectionIdentity,
    pub me: UserInfo,
    pub chats: Vec<ChatSummary>,
    pub completed_at: DateTime<Utc>,
}

pub struct BootstrapCoordinator {
    state_dir: Option<PathBuf>,
    dialog_limit: usize,
    records: Mutex<HashMap<ConnectionIdentity, Arc<BootstrapRecord>>>,
    slots: Mutex<HashMap<ConnectionIdentity, Arc<Slot>>>,
}

/// Serializes bootstrap attempts for one identity and remembers how the last one ended.
#[derive(Default)]
struct Slot {
    /// Attempts that have finished, successful or not.
    finished: AtomicU64,
    last_failure: tokio::sync::Mutex<Option<AutosignError>>,
}

impl BootstrapCoordinator {
    /// `state_dir` receives `<state key>/me.json` and `<state key>/latest_chats.json`
    /// when set, keyed by [`ConnectionIdentity::state_key`].
    pub fn new(state_dir: Option<PathBuf>, dialog_limit: usize) -> Self {
        Self {
            state_dir,
            dialog_limit,
            records: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, identity: &ConnectionIdentity) -> Option<Arc<BootstrapRecord>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn forget(&self, identity: &ConnectionIdentity) {
        if self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
            .is_some()
        {
            debug!("forgot bootstrap record for {}", identity);
        }
    }

    fn slot_for(&self, identity: &ConnectionIdentity) -> Arc<Slot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    /// Resolve the account and snapshot its dialogs unless that already happened.
    ///
    /// Concurrent callers for one identity share a single run. Callers queued
    /// behind a failed run receive that run's failure; nothing is cached, so a
    /// caller arriving afterwards tries again.
    pub async fn ensure_bootstrapped(
        &self,
        connection: &Connection,
    ) -> AutosignResult<Arc<BootstrapRecord>> {
        let identity = connection.identity();
        if let Some(record) = self.cached(identity) {
            return Ok(record);
        }

        let slot = self.slot_for(identity);
        let seen = slot.finished.load(Ordering::Acquire);
        let mut last_failure = slot.last_failure.lock().await;
        if let Some(record) = self.cached(identity) {
            return Ok(record);
        }
        if slot.finished.load(Ordering::Acquire) != seen
            && let Some(ref failure) = *last_failure
        {
            debug!("bootstrap of {} failed while queued: {}", identity, failure);
            return Err(failure.replicate());
        }

        let result = self.bootstrap(connection).await;
        *last_failure = result.as_ref().err().map(AutosignError::replicate);
        slot.finished.fetch_add(1, Ordering::Release);
        result
    }

    async fn bootstrap(&self, connection: &Connection) -> AutosignResult<Arc<BootstrapRecord>> {
        let identity = connection.identity();
        info!("bootstrapping {}", identity);
        let me = connection.get_me().await?;
        let chats = connection.get_dialogs(self.dialog_limit).await?;
        if let Some(ref dir) = self.state_dir {
            let identity_dir = dir.join(identity.state_key());
            if let Err(e) = persist(&identity_dir, &me, &chats) {
                warn!("failed to persist bootstrap state for {}: {:#}", identity, e);
            }
        }

        let record = Arc::new(BootstrapRecord {
            identity: identity.clone(),
            me,
            chats,
            completed_at: Utc::now(),
        });
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.clone(), record.clone());
        info!(
            "bootstrapped {} as {} ({} dialogs)",
            identity,
            record.me.display_name(),
            record.chats.len()
        );
        Ok(record)
    }
}

fn persist(dir: &Path, me: &UserInfo, chats: &[ChatSummary]) -> anyhow::Result<()> {
    let me_json = serde_json::to_string_pretty(me).context("serializing me.json")?;
    atomic_write(&dir.join("me.json"), &me_json)?;
    let chats_json = serde_json::to_string_pretty(chats).context("serializing latest_chats.json")?;
    atomic_write(&dir.join("latest_chats.json"), &chats_json)?;
    Ok(())
}
