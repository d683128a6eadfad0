//! Single operations that open a session, do one thing and release it.

use crate::backend::{ChatId, ChatRef, Member, MemberFilter, ScheduledMessage, SentMessage};
use crate::errors::{AutosignError, AutosignResult};
use crate::runner::schedule::Schedule;
use crate::session::{BootstrapRecord, Connection, ConnectionIdentity, SessionHub};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Send `text` and, with `delete_after`, wait that many seconds and delete it again.
///
/// `Some(0)` deletes immediately.
pub async fn send_text_with_delete(
    connection: &Connection,
    chat_id: ChatId,
    text: &str,
    delete_after: Option<u64>,
) -> AutosignResult<SentMessage> {
    let sent = connection.send_message(chat_id, text).await?;
    info!("[{}] sent '{}' (message {})", chat_id, text, sent.message_id);
    if let Some(secs) = delete_after {
        info!("[{}] deleting '{}' in {}s", chat_id, text, secs);
        tokio::time::sleep(Duration::from_secs(secs)).await;
        connection.delete_message(chat_id, sent.message_id).await?;
        info!("[{}] deleted message {}", chat_id, sent.message_id);
    }
    Ok(sent)
}

pub async fn send_text(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
    chat_id: ChatId,
    text: &str,
    delete_after: Option<u64>,
) -> AutosignResult<SentMessage> {
    hub.with_connection(identity, async |conn| {
        send_text_with_delete(conn, chat_id, text, delete_after).await
    })
    .await
}

pub async fn send_dice(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
    chat_id: ChatId,
    emoji: &str,
) -> AutosignResult<SentMessage> {
    hub.with_connection(identity, async |conn| {
        let sent = conn.send_dice(chat_id, emoji).await?;
        info!("[{}] sent dice {}", chat_id, emoji);
        Ok(sent)
    })
    .await
}

/// Members of `chat` whose name matches `query`, or its administrators with `admin`.
pub async fn list_members(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
    chat: &ChatRef,
    query: &str,
    admin: bool,
    limit: usize,
) -> AutosignResult<Vec<Member>> {
    let (filter, query) = if admin {
        (MemberFilter::Administrators, "")
    } else {
        (MemberFilter::Search, query)
    };
    hub.with_connection(identity, async |conn| {
        conn.get_chat_members(chat, query, filter, limit).await
    })
    .await
}

/// The next `times` firings of `when` after `now`, each pushed back by up to
/// `jitter_secs` random seconds.
pub fn schedule_times(
    when: &Schedule,
    now: DateTime<Tz>,
    times: usize,
    jitter_secs: u64,
) -> AutosignResult<Vec<DateTime<Utc>>> {
    let mut cursor = now;
    let mut out = Vec::with_capacity(times);
    for _ in 0..times {
        out.push(when.next_run(&cursor, jitter_secs)?.with_timezone(&Utc));
        cursor = when.next_occurrence(&cursor)?;
    }
    Ok(out)
}

/// Queue `text` for server-side delivery at the next `times` firings of `crontab`.
#[allow(clippy::too_many_arguments)]
pub async fn schedule_messages(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
    chat_id: ChatId,
    text: &str,
    crontab: &str,
    times: usize,
    jitter_secs: u64,
    tz: Tz,
) -> AutosignResult<Vec<ScheduledMessage>> {
    if times == 0 {
        return Err(AutosignError::Config("schedule at least one message".into()));
    }
    let when = Schedule::parse(crontab)?;
    let send_times = schedule_times(&when, Utc::now().with_timezone(&tz), times, jitter_secs)?;
    hub.with_connection(identity, async |conn| {
        let mut scheduled = Vec::with_capacity(send_times.len());
        for send_at in send_times {
            let sent = conn.schedule_message(chat_id, text, send_at).await?;
            info!(
                "[{}] scheduled '{}' for {} (message {})",
                chat_id,
                text,
                send_at.with_timezone(&tz),
                sent.message_id
            );
            scheduled.push(ScheduledMessage {
                chat_id,
                message_id: sent.message_id,
                text: Some(text.to_string()),
                send_at,
            });
        }
        Ok(scheduled)
    })
    .await
}

pub async fn list_scheduled_messages(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
    chat_id: ChatId,
) -> AutosignResult<Vec<ScheduledMessage>> {
    hub.with_connection(identity, async |conn| conn.scheduled_messages(chat_id).await)
        .await
}

/// Resolve the account and snapshot its dialogs.
pub async fn login(
    hub: &SessionHub,
    identity: &ConnectionIdentity,
) -> AutosignResult<Arc<BootstrapRecord>> {
    let session = hub.open(identity).await;
    let result = session.bootstrap().await;
    session.close().await;
    let record = result?;
    info!(
        "logged in as {} with {} recent chats",
        record.me.display_name(),
        record.chats.len()
    );
    Ok(record)
}

pub async fn logout(hub: &SessionHub, identity: &ConnectionIdentity) -> AutosignResult<()> {
    hub.with_connection(identity, async |conn| conn.log_out().await)
        .await?;
    info!("account '{}' logged out", identity.account());
    Ok(())
}
