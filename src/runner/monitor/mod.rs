//! Auto-reply task: watches chats and answers messages matching configured rules.

use crate::backend::{ChatId, InboundEvent};
use crate::config::schema::{MatchConfig, MonitorConfig};
use crate::config::settings::DEFAULT_COOLDOWN;
use crate::errors::{AutosignError, AutosignResult};
use crate::notify::{ServerChan, WebhookForwarder};
use crate::rules::{CompiledRule, event_text};
use crate::session::{Connection, ConnectionIdentity, Session, SessionHub};
use crate::solver::Solver;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const DEFAULT_AI_PROMPT: &str = "You are chatting in a group. Reply to the message \
briefly and naturally, in the language it was written in.";

/// A rule plus the outlets its matches are pushed to.
struct Route {
    rule: CompiledRule,
    webhook: Option<WebhookForwarder>,
    server_chan: Option<ServerChan>,
}

impl Route {
    fn new(cfg: &MatchConfig) -> AutosignResult<Self> {
        let server_chan = match cfg.server_chan_send_key.as_deref() {
            Some(key) if cfg.push_via_server_chan => Some(ServerChan::new(key)?),
            _ => None,
        };
        Ok(Self {
            rule: CompiledRule::new(cfg)?,
            webhook: cfg.webhook_url.as_deref().map(WebhookForwarder::new),
            server_chan,
        })
    }
}

pub struct MonitorTask {
    name: String,
    routes: Vec<Route>,
    chats: HashSet<ChatId>,
    hub: Arc<SessionHub>,
    identity: ConnectionIdentity,
    solver: Option<Arc<dyn Solver>>,
    cooldown: Duration,
}

impl MonitorTask {
    pub fn new(
        name: impl Into<String>,
        config: &MonitorConfig,
        hub: Arc<SessionHub>,
        identity: ConnectionIdentity,
    ) -> AutosignResult<Self> {
        config.validate()?;
        let routes = config
            .match_cfgs
            .iter()
            .map(Route::new)
            .collect::<AutosignResult<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            routes,
            chats: config.chat_ids().into_iter().collect(),
            hub,
            identity,
            solver: None,
            cooldown: DEFAULT_COOLDOWN,
        })
    }

    pub fn with_solver(mut self, solver: Option<Arc<dyn Solver>>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen until a configuration error; recoverable failures reconnect after the cooldown.
    pub async fn run(&self) -> AutosignResult<()> {
        loop {
            match self.run_session().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    error!(
                        "[{}] monitor stopped: {}; restarting in {:?}",
                        self.name, e, self.cooldown
                    );
                    tokio::time::sleep(self.cooldown).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hold one lease and handle events until the inbound stream closes.
    pub async fn run_session(&self) -> AutosignResult<()> {
        let session = self.hub.open(&self.identity).await;
        let result = self.listen(&session).await;
        session.close().await;
        result
    }

    async fn listen(&self, session: &Session) -> AutosignResult<()> {
        let connection = session.connection();
        let mut events = connection.subscribe();
        let boot = session.bootstrap().await?;
        info!(
            "[{}] monitoring {} chats as {}",
            self.name,
            self.chats.len(),
            boot.me.display_name()
        );
        loop {
            match events.recv().await {
                Ok(event) => {
                    if self.chats.contains(&event.chat_id) {
                        self.handle_event(connection, &event).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[{}] inbound stream lagged, {} events skipped", self.name, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AutosignError::Connection("inbound stream closed".into()));
                }
            }
        }
    }

    /// Apply the first matching rule to `event`. Returns whether any rule matched.
    ///
    /// Failures are logged; one bad event never stops the monitor.
    pub async fn handle_event(&self, connection: &Connection, event: &InboundEvent) -> bool {
        let Some(route) = self.routes.iter().find(|r| r.rule.matches(event)) else {
            return false;
        };
        let text = event_text(event).unwrap_or_default();
        info!("[{}] matched in {}: {}", self.name, event.chat_id, event.summary());

        if let Err(e) = self.reply(connection, route, event, text).await {
            warn!("[{}] reply in {} failed: {}", self.name, event.chat_id, e);
        }
        if let Err(e) = self.push(route, event, text).await {
            warn!("[{}] forwarding from {} failed: {}", self.name, event.chat_id, e);
        }
        true
    }

    async fn reply(
        &self,
        connection: &Connection,
        route: &Route,
        event: &InboundEvent,
        text: &str,
    ) -> AutosignResult<()> {
        let cfg = route.rule.config();
        let reply = if cfg.ai_reply {
            let solver = self.solver.as_ref().ok_or_else(|| {
                AutosignError::Config("ai_reply needs OPENAI_API_KEY".into())
            })?;
            let prompt = cfg.ai_prompt.as_deref().unwrap_or(DEFAULT_AI_PROMPT);
            Some(solver.answer(prompt, text).await?.trim().to_string())
        } else {
            route.rule.reply_text(text)?
        };
        let Some(reply) = reply.filter(|r| !r.is_empty()) else {
            debug!("[{}] nothing to reply in {}", self.name, event.chat_id);
            return Ok(());
        };

        let sent = connection.send_message(event.chat_id, &reply).await?;
        info!("[{}] replied '{}' in {}", self.name, reply, event.chat_id);
        if let Some(secs) = cfg.delete_after {
            // The pending delete holds its own share so it outlives a monitor restart.
            let share = self.hub.open(connection.identity()).await;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if let Err(e) = share
                    .connection()
                    .delete_message(sent.chat_id, sent.message_id)
                    .await
                {
                    warn!("deleting reply {} in {} failed: {}", sent.message_id, sent.chat_id, e);
                }
                share.close().await;
            });
        }
        Ok(())
    }

    async fn push(&self, route: &Route, event: &InboundEvent, text: &str) -> AutosignResult<()> {
        if let Some(ref webhook) = route.webhook {
            webhook.forward(&self.payload(event, text)).await?;
            debug!("[{}] forwarded to {}", self.name, webhook.url());
        }
        if let Some(ref server_chan) = route.server_chan {
            let title = format!("[{}] new message in {}", self.name, event.chat_id);
            server_chan.send(&title, text).await?;
        }
        Ok(())
    }

    fn payload(&self, event: &InboundEvent, text: &str) -> Value {
        let from = event.from.as_ref().map(|s| {
            json!({
                "id": s.id,
                "username": s.username,
            })
        });
        json!({
            "task": self.name,
            "chat_id": event.chat_id,
            "message_id": event.message_id,
            "text": text,
            "from": from,
        })
    }
}
