//! Matching inbound bot messages to the sign action that is waiting for them.
//!
//! Events for watched chats are buffered in arrival order. An action waiting for
//! its reply polls its chat's buffer, takes the first event with the right shape,
//! and performs the follow-up call (click, image choice or typed answer).

use crate::backend::{Button, ChatId, InboundEvent};
use crate::config::schema::SignAction;
use crate::errors::{AutosignError, AutosignResult};
use crate::session::{Connection, Waiter};
use crate::solver::{Solver, answer_question};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Oldest events are dropped beyond this many per chat.
const MAX_BUFFERED_PER_CHAT: usize = 64;

const DEFAULT_IMAGE_QUERY: &str = "Choose the correct option";

pub struct ReplyCorrelator {
    buffers: Mutex<HashMap<ChatId, VecDeque<InboundEvent>>>,
    waiter: Mutex<Waiter<ChatId>>,
    poll_interval: Duration,
    solver: Option<Arc<dyn Solver>>,
}

impl ReplyCorrelator {
    pub fn new(poll_interval: Duration, solver: Option<Arc<dyn Solver>>) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            waiter: Mutex::new(Waiter::new()),
            poll_interval,
            solver,
        }
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<ChatId, VecDeque<InboundEvent>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn waiter(&self) -> MutexGuard<'_, Waiter<ChatId>> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start buffering events from `chat`.
    pub fn watch(&self, chat: ChatId) {
        self.buffers().entry(chat).or_default();
    }

    /// Buffer `event` if its chat is watched. Returns whether it was kept.
    pub fn ingest(&self, event: InboundEvent) -> bool {
        let mut buffers = self.buffers();
        let Some(buffer) = buffers.get_mut(&event.chat_id) else {
            return false;
        };
        debug!("[{}] received {}", event.chat_id, event.summary());
        if buffer.len() >= MAX_BUFFERED_PER_CHAT {
            buffer.pop_front();
        }
        buffer.push_back(event);
        true
    }

    pub fn buffered(&self, chat: ChatId) -> usize {
        self.buffers().get(&chat).map_or(0, VecDeque::len)
    }

    /// Whether any action is still waiting for a reply.
    pub fn is_waiting(&self) -> bool {
        !self.waiter().is_empty()
    }

    /// Feed events from `events` into the buffers until the stream closes.
    pub fn spawn_pump(self: Arc<Self>, mut events: broadcast::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.ingest(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("inbound stream lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Remove and return the first buffered event of `chat` that fits `action`.
    fn take_match(&self, chat: ChatId, action: &SignAction) -> Option<InboundEvent> {
        let mut buffers = self.buffers();
        let buffer = buffers.get_mut(&chat)?;
        let index = buffer.iter().position(|event| fits(action, event))?;
        buffer.remove(index)
    }

    /// Wait up to `timeout` for the reply to `action` in `chat` and answer it.
    ///
    /// Returns `Ok(false)` on timeout. Connection and authorization failures of the
    /// follow-up call propagate; other follow-up failures are logged and the reply
    /// still counts as handled.
    pub async fn await_reply(
        &self,
        connection: &Connection,
        chat: ChatId,
        action: &SignAction,
        timeout: Duration,
    ) -> AutosignResult<bool> {
        self.waiter().add(chat);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.take_match(chat, action) {
                let result = self.follow_up(connection, &event, action).await;
                self.waiter().sub(&chat);
                return match result {
                    Ok(()) => Ok(true),
                    Err(e) if e.is_connection_failure() => Err(e),
                    Err(e) => {
                        warn!("[{}] {} follow-up failed: {}", chat, action.name(), e);
                        Ok(true)
                    }
                };
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "[{}] no reply for {} within {:?}",
                    chat,
                    action.name(),
                    timeout
                );
                self.waiter().sub(&chat);
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn follow_up(
        &self,
        connection: &Connection,
        event: &InboundEvent,
        action: &SignAction,
    ) -> AutosignResult<()> {
        match action {
            SignAction::ClickKeyboardByText { text } => {
                let button = event
                    .buttons()
                    .find(|b| b.text.contains(text.as_str()))
                    .ok_or_else(|| AutosignError::Backend(format!("no button '{}'", text)))?;
                click(connection, event, button).await
            }
            SignAction::ChooseOptionByImage => {
                let solver = self.solver()?;
                let Some(ref photo) = event.photo else {
                    return Err(AutosignError::Backend("reply has no photo".into()));
                };
                let image = connection.download_media(&photo.file_id).await?;
                let options: Vec<String> = event.buttons().map(|b| b.text.clone()).collect();
                let query = event
                    .text
                    .as_deref()
                    .or(photo.caption.as_deref())
                    .unwrap_or(DEFAULT_IMAGE_QUERY);
                let choice = solver.choose_option(&image, query, &options).await?;
                let choice = choice.trim();
                info!("[{}] chose option '{}'", event.chat_id, choice);
                let button = event
                    .buttons()
                    .find(|b| b.text.trim() == choice)
                    .or_else(|| event.buttons().find(|b| b.text.contains(choice)))
                    .ok_or_else(|| {
                        AutosignError::Backend(format!("chosen option '{}' is not offered", choice))
                    })?;
                click(connection, event, button).await
            }
            SignAction::ReplyByCalculationProblem => {
                let question = event.text.as_deref().unwrap_or_default().trim();
                let answer = answer_question(self.solver.as_deref(), question).await?;
                info!("[{}] answering '{}' with '{}'", event.chat_id, question, answer);
                connection.send_message(event.chat_id, &answer).await?;
                Ok(())
            }
            SignAction::SendText { .. } | SignAction::SendDice { .. } => Ok(()),
        }
    }

    fn solver(&self) -> AutosignResult<&Arc<dyn Solver>> {
        self.solver.as_ref().ok_or_else(|| {
            AutosignError::Config("choosing options by image needs OPENAI_API_KEY".into())
        })
    }
}

async fn click(connection: &Connection, event: &InboundEvent, button: &Button) -> AutosignResult<()> {
    info!("[{}] clicking '{}'", event.chat_id, button.text);
    connection
        .click(event.chat_id, event.message_id, &button.callback_data)
        .await
}

/// Whether `event` has the shape of a reply to `action`. Own messages never fit.
pub fn fits(action: &SignAction, event: &InboundEvent) -> bool {
    if event.is_from_self() {
        return false;
    }
    match action {
        SignAction::ClickKeyboardByText { text } => {
            event.buttons().any(|b| b.text.contains(text.as_str()))
        }
        SignAction::ChooseOptionByImage => event.photo.is_some() && event.has_keyboard(),
        SignAction::ReplyByCalculationProblem => event
            .text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty()),
        SignAction::SendText { .. } | SignAction::SendDice { .. } => false,
    }
}
