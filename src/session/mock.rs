use super::{BackendFactory, ConnectionIdentity};
use crate::backend::{
    Backend, ChatSummary, InboundEvent, Member, MemberFilter, Request, Response,
    ScheduledMessage, SentMessage, UserInfo,
};
use crate::errors::{AutosignError, AutosignResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Scriptable backend that counts what the coordination layer does to it.
pub(crate) struct MockBackend {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    get_me_failures: AtomicUsize,
    failing: Mutex<Vec<&'static str>>,
    floods: Mutex<VecDeque<u64>>,
    delay: Duration,
    lifecycle_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_message_id: AtomicI64,
    calls: Mutex<Vec<Request>>,
    scheduled: Mutex<Vec<ScheduledMessage>>,
    events: broadcast::Sender<InboundEvent>,
}

impl MockBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            get_me_failures: AtomicUsize::new(0),
            failing: Mutex::new(Vec::new()),
            floods: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            lifecycle_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_message_id: AtomicI64::new(100),
            calls: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Every call takes `delay` to complete.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Connect and disconnect each take `delay` to complete.
    pub fn with_lifecycle_delay(mut self, delay: Duration) -> Self {
        self.lifecycle_delay = delay;
        self
    }

    async fn lifecycle_pause(&self) {
        if self.lifecycle_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.lifecycle_delay).await;
        }
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// The next `n` `GetMe` calls fail with a connection error.
    pub fn fail_get_me(&self, n: usize) {
        self.get_me_failures.store(n, Ordering::SeqCst);
    }

    /// Every request named `name` fails with a connection error.
    pub fn fail_request(&self, name: &'static str) {
        self.failing.lock().unwrap().push(name);
    }

    /// Queue a flood wait answer for the next call.
    pub fn push_flood(&self, retry_after: u64) {
        self.floods.lock().unwrap().push_back(retry_after);
    }

    pub fn inject(&self, event: InboundEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|r| r.name() == name).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, request: Request) -> AutosignResult<Response> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(retry_after) = self.floods.lock().unwrap().pop_front() {
            return Err(AutosignError::FloodWait { retry_after });
        }
        if self.failing.lock().unwrap().contains(&request.name()) {
            return Err(AutosignError::Connection(format!("{} failed", request.name())));
        }
        match request {
            Request::GetMe => {
                let failing = self
                    .get_me_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(AutosignError::Connection("get_me failed".into()));
                }
                Ok(Response::Me(UserInfo {
                    id: 1,
                    username: Some("mock".into()),
                    first_name: None,
                    last_name: None,
                }))
            }
            Request::GetDialogs { limit } => Ok(Response::Dialogs(
                (1..=3)
                    .map(|id| ChatSummary {
                        id,
                        title: Some(format!("chat {}", id)),
                        kind: "group".into(),
                        username: None,
                        first_name: None,
                        last_name: None,
                    })
                    .take(limit)
                    .collect(),
            )),
            Request::SendMessage { chat_id, .. } | Request::SendDice { chat_id, .. } => {
                Ok(Response::Sent(SentMessage {
                    chat_id,
                    message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
                }))
            }
            Request::DownloadMedia { .. } => Ok(Response::Media(vec![0xff, 0xd8])),
            Request::GetChatMembers {
                query,
                filter,
                limit,
                ..
            } => Ok(Response::Members(
                mock_members()
                    .into_iter()
                    .filter(|m| match filter {
                        MemberFilter::Administrators => m.user.id == 1,
                        MemberFilter::Search => m
                            .user
                            .username
                            .as_deref()
                            .is_some_and(|u| u.contains(query.as_str())),
                    })
                    .take(limit)
                    .collect(),
            )),
            Request::ScheduleMessage {
                chat_id,
                text,
                send_at,
            } => {
                let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
                self.scheduled.lock().unwrap().push(ScheduledMessage {
                    chat_id,
                    message_id,
                    text: Some(text),
                    send_at,
                });
                Ok(Response::Sent(SentMessage {
                    chat_id,
                    message_id,
                }))
            }
            Request::GetScheduledMessages { chat_id } => Ok(Response::Scheduled(
                self.scheduled
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|m| m.chat_id == chat_id)
                    .cloned()
                    .collect(),
            )),
            Request::DeleteMessage { .. }
            | Request::RequestCallbackAnswer { .. }
            | Request::LogOut => Ok(Response::Done),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self) -> AutosignResult<bool> {
        self.lifecycle_pause().await;
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AutosignError::Connection("connect refused".into()));
        }
        Ok(true)
    }

    async fn disconnect(&self) -> AutosignResult<()> {
        self.lifecycle_pause().await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(AutosignError::Connection("disconnect failed".into()));
        }
        Ok(())
    }

    async fn call(&self, request: Request) -> AutosignResult<Response> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.respond(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }
}

/// Members every mock chat has; id 1 is the admin.
fn mock_members() -> Vec<Member> {
    [(1, "mock_admin", false), (2, "alice", false), (3, "helper_bot", true)]
        .into_iter()
        .map(|(id, username, is_bot)| Member {
            user: UserInfo {
                id,
                username: Some(username.to_string()),
                first_name: None,
                last_name: None,
            },
            is_bot,
        })
        .collect()
}

/// Factory that hands out the same backend for every identity.
pub(crate) fn shared_factory(backend: Arc<MockBackend>) -> BackendFactory {
    Arc::new(move |_: &ConnectionIdentity| backend.clone() as Arc<dyn Backend>)
}

pub(crate) fn identity(account: &str) -> ConnectionIdentity {
    ConnectionIdentity::new(account, "/tmp/autosign-test-sessions")
}

/// Hub over `backend` with pacing and flood padding disabled.
pub(crate) fn hub(backend: &Arc<MockBackend>) -> Arc<super::SessionHub> {
    let limits = super::CallLimits {
        min_interval: Duration::ZERO,
        max_retries: 3,
        flood_padding: Duration::ZERO,
    };
    Arc::new(super::SessionHub::new(
        shared_factory(backend.clone()),
        limits,
        super::BootstrapCoordinator::new(None, super::bootstrap::DEFAULT_DIALOG_LIMIT),
    ))
}
