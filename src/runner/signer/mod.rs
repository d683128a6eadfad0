//! The daily check-in task.
//!
//! A cycle opens the shared connection, bootstraps it, and unless today is already
//! recorded runs every chat's actions in order, awaiting the bot's reply where an
//! action expects one. A completed cycle is recorded; then the task sleeps until
//! the next scheduled run. Recoverable failures restart the cycle after a cooldown.

use super::correlate::ReplyCorrelator;
use super::oneshot::send_text_with_delete;
use super::record::SignRecord;
use super::schedule::{Schedule, resolve_timezone, until};
use crate::config::settings::{DEFAULT_COOLDOWN, DEFAULT_REPLY_POLL_INTERVAL};
use crate::config::schema::{SignAction, SignChat, SignConfig};
use crate::errors::AutosignResult;
use crate::session::{Connection, ConnectionIdentity, Session, SessionHub};
use crate::solver::Solver;
use chrono::Utc;
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    /// Return after the first completed cycle instead of scheduling the next one.
    pub only_once: bool,
    /// Sign even if today is already recorded.
    pub force_rerun: bool,
}

impl RunMode {
    pub fn once() -> Self {
        Self {
            only_once: true,
            force_rerun: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Signed,
    AlreadySigned,
}

pub struct SignTask {
    name: String,
    config: SignConfig,
    schedule: Schedule,
    hub: Arc<SessionHub>,
    identity: ConnectionIdentity,
    record_path: PathBuf,
    solver: Option<Arc<dyn Solver>>,
    poll_interval: Duration,
    cooldown: Duration,
    tz: Tz,
}

impl SignTask {
    /// Validates `config` and resolves its schedule and timezone.
    pub fn new(
        name: impl Into<String>,
        config: SignConfig,
        hub: Arc<SessionHub>,
        identity: ConnectionIdentity,
        record_path: PathBuf,
    ) -> AutosignResult<Self> {
        config.validate()?;
        let schedule = Schedule::parse(&config.sign_at)?;
        let tz = resolve_timezone(config.timezone.as_deref())?;
        Ok(Self {
            name: name.into(),
            config,
            schedule,
            hub,
            identity,
            record_path,
            solver: None,
            poll_interval: DEFAULT_REPLY_POLL_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            tz,
        })
    }

    pub fn with_solver(mut self, solver: Option<Arc<dyn Solver>>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Run cycles until `mode.only_once` is satisfied or a configuration error ends the task.
    pub async fn run(&self, mode: RunMode) -> AutosignResult<()> {
        let mut force = mode.force_rerun;
        loop {
            match self.run_cycle(force).await {
                Ok(_) => {
                    if mode.only_once {
                        return Ok(());
                    }
                    force = false;
                    let now = Utc::now().with_timezone(&self.tz);
                    let next = self.schedule.next_run(&now, self.config.random_seconds)?;
                    info!("[{}] next run at {}", self.name, next);
                    tokio::time::sleep(until(&now, &next)).await;
                }
                Err(e) if e.is_recoverable() => {
                    error!(
                        "[{}] cycle failed: {}; retrying in {:?}",
                        self.name, e, self.cooldown
                    );
                    tokio::time::sleep(self.cooldown).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One cycle on a freshly acquired session. The session is released on every path.
    pub async fn run_cycle(&self, force: bool) -> AutosignResult<CycleOutcome> {
        let session = self.hub.open(&self.identity).await;
        let result = self.cycle(&session, force).await;
        session.close().await;
        result
    }

    async fn cycle(&self, session: &Session, force: bool) -> AutosignResult<CycleOutcome> {
        let boot = session.bootstrap().await?;
        let now = Utc::now().with_timezone(&self.tz);
        info!(
            "[{}] running as {} at {}",
            self.name,
            boot.me.display_name(),
            now
        );

        let mut record = SignRecord::load(&self.record_path);
        if !force && let Some(at) = record.signed_on(now.date_naive()) {
            info!("[{}] already signed today at {}", self.name, at);
            return Ok(CycleOutcome::AlreadySigned);
        }

        let connection = session.connection();
        let correlator = Arc::new(ReplyCorrelator::new(
            self.poll_interval,
            self.solver.clone(),
        ));
        for chat_id in self.config.chat_ids() {
            correlator.watch(chat_id);
        }
        let pump = correlator.clone().spawn_pump(connection.subscribe());
        let result = self.sign_chats(connection, &correlator).await;
        pump.abort();
        result?;

        record.record(&Utc::now().with_timezone(&self.tz));
        record.save()?;
        info!("[{}] signed {} chats", self.name, self.config.chats.len());
        Ok(CycleOutcome::Signed)
    }

    async fn sign_chats(
        &self,
        connection: &Connection,
        correlator: &ReplyCorrelator,
    ) -> AutosignResult<()> {
        for (i, chat) in self.config.chats.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.sign_interval()).await;
            }
            self.sign_chat(connection, correlator, chat).await?;
        }
        Ok(())
    }

    async fn sign_chat(
        &self,
        connection: &Connection,
        correlator: &ReplyCorrelator,
        chat: &SignChat,
    ) -> AutosignResult<()> {
        info!(
            "[{}] {}: {} actions",
            self.name,
            chat.label(),
            chat.actions.len()
        );
        for (i, action) in chat.actions.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(chat.action_interval()).await;
            }
            match action {
                SignAction::SendText { text } => {
                    send_text_with_delete(connection, chat.chat_id, text, chat.delete_after)
                        .await?;
                }
                SignAction::SendDice { dice } => {
                    connection.send_dice(chat.chat_id, dice).await?;
                }
                SignAction::ClickKeyboardByText { .. }
                | SignAction::ChooseOptionByImage
                | SignAction::ReplyByCalculationProblem => {
                    let replied = correlator
                        .await_reply(connection, chat.chat_id, action, chat.reply_timeout())
                        .await?;
                    if !replied {
                        warn!(
                            "[{}] {}: gave up waiting for {}",
                            self.name,
                            chat.label(),
                            action.name()
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
