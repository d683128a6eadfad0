// Shared test helpers; not every test binary uses every item.
#![allow(unused)]

use async_trait::async_trait;
use autosign::backend::{
    Backend, ChatSummary, InboundEvent, Request, Response, SentMessage, UserInfo,
};
use autosign::session::{
    BackendFactory, BootstrapCoordinator, CallLimits, ConnectionIdentity, SessionHub,
};
use autosign::{AutosignError, AutosignResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Backend double that counts lifecycle calls and records every request.
pub struct MockBackend {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub delay: Duration,
    floods: Mutex<VecDeque<u64>>,
    always_flood: Mutex<Option<u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_message_id: AtomicI64,
    calls: Mutex<Vec<Request>>,
    events: broadcast::Sender<InboundEvent>,
}

impl MockBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            delay: Duration::ZERO,
            floods: Mutex::new(VecDeque::new()),
            always_flood: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_message_id: AtomicI64::new(1000),
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer the next call with a flood wait of `secs`.
    pub fn flood_once(&self, secs: u64) {
        self.floods.lock().unwrap().push_back(secs);
    }

    /// Answer every call with a flood wait of `secs`.
    pub fn flood_forever(&self, secs: u64) {
        *self.always_flood.lock().unwrap() = Some(secs);
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

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn respond(&self, request: Request) -> AutosignResult<Response> {
        if let Some(secs) = *self.always_flood.lock().unwrap() {
            return Err(AutosignError::FloodWait { retry_after: secs });
        }
        if let Some(secs) = self.floods.lock().unwrap().pop_front() {
            return Err(AutosignError::FloodWait { retry_after: secs });
        }
        Ok(match request {
            Request::GetMe => Response::Me(UserInfo {
                id: 42,
                username: Some("tester".into()),
                first_name: None,
                last_name: None,
            }),
            Request::GetDialogs { limit } => Response::Dialogs(
                (1..=5)
                    .map(|id| ChatSummary {
                        id,
                        title: Some(format!("group {}", id)),
                        kind: "supergroup".into(),
                        username: None,
                        first_name: None,
                        last_name: None,
                    })
                    .take(limit)
                    .collect(),
            ),
            Request::SendMessage { chat_id, .. }
            | Request::SendDice { chat_id, .. }
            | Request::ScheduleMessage { chat_id, .. } => {
                Response::Sent(SentMessage {
                    chat_id,
                    message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
                })
            }
            Request::DownloadMedia { .. } => Response::Media(vec![1, 2, 3]),
            Request::GetChatMembers { .. } => Response::Members(Vec::new()),
            Request::GetScheduledMessages { .. } => Response::Scheduled(Vec::new()),
            Request::DeleteMessage { .. }
            | Request::RequestCallbackAnswer { .. }
            | Request::LogOut => Response::Done,
        })
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect(&self) -> AutosignResult<bool> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(true)
    }

    async fn disconnect(&self) -> AutosignResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn call(&self, request: Request) -> AutosignResult<Response> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.respond(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }
}

pub fn identity(account: &str) -> ConnectionIdentity {
    ConnectionIdentity::new(account, "/tmp/autosign-it-sessions")
}

/// Limits with pacing and padding disabled.
pub fn fast_limits(max_retries: u32) -> CallLimits {
    CallLimits {
        min_interval: Duration::ZERO,
        max_retries,
        flood_padding: Duration::ZERO,
    }
}

/// Hub where every identity shares `backend`.
pub fn shared_hub(backend: &Arc<MockBackend>, limits: CallLimits) -> Arc<SessionHub> {
    let backend = backend.clone();
    let factory: BackendFactory =
        Arc::new(move |_: &ConnectionIdentity| backend.clone() as Arc<dyn Backend>);
    Arc::new(SessionHub::new(
        factory,
        limits,
        BootstrapCoordinator::new(None, 20),
    ))
}
