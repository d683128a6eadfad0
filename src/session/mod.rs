//! Shared-connection coordination.
//!
//! One [`SessionHub`] lives at the application root and is handed to every task.
//! It owns the connection registry (refcounted lifecycle per identity), the
//! bootstrap coordinator (identity + dialog snapshot, once per identity) and the
//! call serializer (per-identity mutual exclusion, pacing and flood-wait retry).
//! Tasks get a [`Session`] from the hub, issue calls through its [`Connection`],
//! and close it on every exit path.

pub mod bootstrap;
pub mod identity;
pub mod registry;
pub mod serializer;
pub mod waiter;

#[cfg(test)]
pub(crate) mod mock;

pub use bootstrap::{BootstrapCoordinator, BootstrapRecord};
pub use identity::ConnectionIdentity;
pub use registry::{
    BackendFactory, ConnectionHandle, ConnectionRegistry, HandleState, Lease, ReleaseOutcome,
};
pub use serializer::{CallLimits, CallSerializer};
pub use waiter::Waiter;

use crate::backend::{
    Backend, ChatId, ChatRef, ChatSummary, InboundEvent, Member, MemberFilter, MessageId,
    Request, Response, ScheduledMessage, SentMessage, UserInfo,
};
use chrono::{DateTime, Utc};
use crate::errors::AutosignResult;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application-root owner of the coordination components.
pub struct SessionHub {
    registry: ConnectionRegistry,
    bootstrap: Arc<BootstrapCoordinator>,
    serializer: Arc<CallSerializer>,
}

impl SessionHub {
    pub fn new(factory: BackendFactory, limits: CallLimits, bootstrap: BootstrapCoordinator) -> Self {
        let bootstrap = Arc::new(bootstrap);
        let forget = bootstrap.clone();
        let registry =
            ConnectionRegistry::new(factory).on_removed(move |identity| forget.forget(identity));
        Self {
            registry,
            bootstrap,
            serializer: Arc::new(CallSerializer::new(limits)),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn bootstrap_coordinator(&self) -> &BootstrapCoordinator {
        &self.bootstrap
    }

    pub fn serializer(&self) -> &Arc<CallSerializer> {
        &self.serializer
    }

    /// Acquire the shared connection for `identity`, connecting if this is the first user.
    pub async fn open(&self, identity: &ConnectionIdentity) -> Session {
        let lease = self.registry.acquire(identity).await;
        let connection = Connection {
            identity: identity.clone(),
            backend: lease.backend(),
            serializer: self.serializer.clone(),
        };
        Session {
            lease,
            connection,
            bootstrap: self.bootstrap.clone(),
        }
    }

    /// Run `work` with an open connection and release it afterwards, whatever the outcome.
    ///
    /// `work` only borrows the connection, so no call can outlive the lease.
    pub async fn with_connection<T, F>(
        &self,
        identity: &ConnectionIdentity,
        work: F,
    ) -> AutosignResult<T>
    where
        F: AsyncFnOnce(&Connection) -> AutosignResult<T>,
    {
        let session = self.open(identity).await;
        let result = work(session.connection()).await;
        session.close().await;
        result
    }
}

/// An acquired share of a connection. Close it with [`Session::close`].
pub struct Session {
    lease: Lease,
    connection: Connection,
    bootstrap: Arc<BootstrapCoordinator>,
}

impl Session {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        self.lease.identity()
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        self.lease.handle()
    }

    /// Resolve the account and snapshot its dialogs, once per identity.
    pub async fn bootstrap(&self) -> AutosignResult<Arc<BootstrapRecord>> {
        let record = self.bootstrap.ensure_bootstrapped(&self.connection).await?;
        self.lease.handle().set_me(record.me.clone());
        Ok(record)
    }

    pub async fn close(self) -> ReleaseOutcome {
        self.lease.release().await
    }
}

/// The only path by which remote calls are issued: every call goes through the
/// identity's serializer lane.
#[derive(Clone)]
pub struct Connection {
    identity: ConnectionIdentity,
    backend: Arc<dyn Backend>,
    serializer: Arc<CallSerializer>,
}

impl Connection {
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub async fn call(&self, request: Request) -> AutosignResult<Response> {
        let backend = &self.backend;
        self.serializer
            .call(&self.identity, move || backend.call(request.clone()))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.backend.subscribe()
    }

    pub async fn get_me(&self) -> AutosignResult<UserInfo> {
        self.call(Request::GetMe).await?.into_me()
    }

    pub async fn get_dialogs(&self, limit: usize) -> AutosignResult<Vec<ChatSummary>> {
        self.call(Request::GetDialogs { limit }).await?.into_dialogs()
    }

    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> AutosignResult<SentMessage> {
        self.call(Request::SendMessage {
            chat_id,
            text: text.to_string(),
        })
        .await?
        .into_sent()
    }

    pub async fn send_dice(&self, chat_id: ChatId, emoji: &str) -> AutosignResult<SentMessage> {
        self.call(Request::SendDice {
            chat_id,
            emoji: emoji.to_string(),
        })
        .await?
        .into_sent()
    }

    pub async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> AutosignResult<()> {
        self.call(Request::DeleteMessage {
            chat_id,
            message_id,
        })
        .await
        .map(|_| ())
    }

    pub async fn click(&self, chat_id: ChatId, message_id: MessageId, data: &str) -> AutosignResult<()> {
        self.call(Request::RequestCallbackAnswer {
            chat_id,
            message_id,
            data: data.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn download_media(&self, file_id: &str) -> AutosignResult<Vec<u8>> {
        self.call(Request::DownloadMedia {
            file_id: file_id.to_string(),
        })
        .await?
        .into_media()
    }

    pub async fn get_chat_members(
        &self,
        chat: &ChatRef,
        query: &str,
        filter: MemberFilter,
        limit: usize,
    ) -> AutosignResult<Vec<Member>> {
        self.call(Request::GetChatMembers {
            chat: chat.clone(),
            query: query.to_string(),
            filter,
            limit,
        })
        .await?
        .into_members()
    }

    pub async fn schedule_message(
        &self,
        chat_id: ChatId,
        text: &str,
        send_at: DateTime<Utc>,
    ) -> AutosignResult<SentMessage> {
        self.call(Request::ScheduleMessage {
            chat_id,
            text: text.to_string(),
            send_at,
        })
        .await?
        .into_sent()
    }

    pub async fn scheduled_messages(&self, chat_id: ChatId) -> AutosignResult<Vec<ScheduledMessage>> {
        self.call(Request::GetScheduledMessages { chat_id })
            .await?
            .into_scheduled()
    }

    pub async fn log_out(&self) -> AutosignResult<()> {
        self.call(Request::LogOut).await.map(|_| ())
    }
}
