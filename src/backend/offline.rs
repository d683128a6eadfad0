use super::{
    Backend, ChatId, ChatSummary, InboundEvent, Member, MemberFilter, Request, Response,
    ScheduledMessage, SentMessage, UserInfo,
};
use crate::errors::{AutosignError, AutosignResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 256;

/// Backend that never leaves the process.
///
/// Outbound calls are logged and recorded, sends get fabricated message ids,
/// and inbound traffic comes only from [`OfflineBackend::inject`].
pub struct OfflineBackend {
    me: UserInfo,
    events: broadcast::Sender<InboundEvent>,
    connected: AtomicBool,
    next_message_id: AtomicI64,
    dialogs: Mutex<Vec<ChatSummary>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    members: Mutex<(Vec<Member>, Vec<i64>)>,
    scheduled: Mutex<Vec<ScheduledMessage>>,
    sent: Mutex<Vec<Request>>,
}

impl OfflineBackend {
    pub fn new(account: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            me: UserInfo {
                id: account_id(account),
                username: Some(account.to_string()),
                first_name: None,
                last_name: None,
            },
            events,
            connected: AtomicBool::new(false),
            next_message_id: AtomicI64::new(1),
            dialogs: Mutex::new(Vec::new()),
            media: Mutex::new(HashMap::new()),
            members: Mutex::new((Vec::new(), Vec::new())),
            scheduled: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dialogs(self, dialogs: Vec<ChatSummary>) -> Self {
        if let Ok(mut guard) = self.dialogs.lock() {
            *guard = dialogs;
        }
        self
    }

    /// Members every chat reports; `admins` lists the administrator user ids.
    pub fn with_members(self, members: Vec<Member>, admins: Vec<i64>) -> Self {
        if let Ok(mut guard) = self.members.lock() {
            *guard = (members, admins);
        }
        self
    }

    /// Make `bytes` downloadable under `file_id`.
    pub fn add_media(&self, file_id: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut media) = self.media.lock() {
            media.insert(file_id.into(), bytes);
        }
    }

    /// Deliver an inbound event to every subscriber. Returns the subscriber count.
    pub fn inject(&self, event: InboundEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Every outbound request so far, in call order.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn record(&self, request: &Request) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
    }

    fn sent_message(&self, chat_id: ChatId) -> Response {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        Response::Sent(SentMessage {
            chat_id,
            message_id,
        })
    }
}

/// Stable positive id derived from the account label (FNV-1a).
fn account_id(account: &str) -> i64 {
    let hash = account.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    (hash & (i64::MAX as u64)) as i64
}

#[async_trait]
impl Backend for OfflineBackend {
    async fn connect(&self) -> AutosignResult<bool> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("offline backend connected as {}", self.me.display_name());
        Ok(true)
    }

    async fn disconnect(&self) -> AutosignResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        debug!("offline backend disconnected");
        Ok(())
    }

    async fn call(&self, request: Request) -> AutosignResult<Response> {
        if !self.is_connected() {
            return Err(AutosignError::Connection(format!(
                "{} issued while disconnected",
                request.name()
            )));
        }
        self.record(&request);
        match request {
            Request::GetMe => Ok(Response::Me(self.me.clone())),
            Request::GetDialogs { limit } => {
                let dialogs = self.dialogs.lock().map(|d| d.clone()).unwrap_or_default();
                Ok(Response::Dialogs(dialogs.into_iter().take(limit).collect()))
            }
            Request::SendMessage { chat_id, text } => {
                info!("[offline] send_message to {}: {}", chat_id, text);
                Ok(self.sent_message(chat_id))
            }
            Request::SendDice { chat_id, emoji } => {
                info!("[offline] send_dice to {}: {}", chat_id, emoji);
                Ok(self.sent_message(chat_id))
            }
            Request::DeleteMessage {
                chat_id,
                message_id,
            } => {
                info!("[offline] delete_message {} in {}", message_id, chat_id);
                Ok(Response::Done)
            }
            Request::RequestCallbackAnswer {
                chat_id,
                message_id,
                data,
            } => {
                info!(
                    "[offline] callback answer on {} in {}: {}",
                    message_id, chat_id, data
                );
                Ok(Response::Done)
            }
            Request::DownloadMedia { file_id } => self
                .media
                .lock()
                .ok()
                .and_then(|m| m.get(&file_id).cloned())
                .map(Response::Media)
                .ok_or_else(|| AutosignError::Backend(format!("unknown file id {}", file_id))),
            Request::GetChatMembers {
                chat,
                query,
                filter,
                limit,
            } => {
                debug!("[offline] members of {} matching '{}'", chat, query);
                let (members, admins) = self.members.lock().map(|m| m.clone()).unwrap_or_default();
                let query = query.to_lowercase();
                Ok(Response::Members(
                    members
                        .into_iter()
                        .filter(|m| match filter {
                            MemberFilter::Administrators => admins.contains(&m.user.id),
                            MemberFilter::Search => {
                                query.is_empty()
                                    || m.user.display_name().to_lowercase().contains(&query)
                            }
                        })
                        .take(limit)
                        .collect(),
                ))
            }
            Request::ScheduleMessage {
                chat_id,
                text,
                send_at,
            } => {
                info!("[offline] schedule_message to {} at {}: {}", chat_id, send_at, text);
                let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut scheduled) = self.scheduled.lock() {
                    scheduled.push(ScheduledMessage {
                        chat_id,
                        message_id,
                        text: Some(text),
                        send_at,
                    });
                }
                Ok(Response::Sent(SentMessage {
                    chat_id,
                    message_id,
                }))
            }
            Request::GetScheduledMessages { chat_id } => {
                let mut messages: Vec<ScheduledMessage> = self
                    .scheduled
                    .lock()
                    .map(|s| s.iter().filter(|m| m.chat_id == chat_id).cloned().collect())
                    .unwrap_or_default();
                messages.sort_by_key(|m| m.send_at);
                Ok(Response::Scheduled(messages))
            }
            Request::LogOut => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(Response::Done)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }
}
