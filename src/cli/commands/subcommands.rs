use super::{offline_hub, solver_from_env};
use crate::backend::{ChatId, ChatRef};
use crate::config::{Settings, TaskKind, TaskStore};
use crate::errors::AutosignResult;
use crate::runner::schedule::resolve_timezone;
use crate::runner::{MonitorTask, RECORD_FILE, RunMode, SignTask, oneshot};
use crate::session::{ConnectionIdentity, SessionHub};
use crate::utils::atomic_write;
use crate::utils::task_tracker::TaskTracker;
use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run records live per account so several accounts can share one task.
pub(super) fn record_path(store: &TaskStore, task: &str, account: &str) -> AutosignResult<PathBuf> {
    Ok(store.task_dir(task)?.join(account).join(RECORD_FILE))
}

pub(super) fn build_sign_task(
    settings: &Settings,
    hub: &Arc<SessionHub>,
    task: &str,
    identity: ConnectionIdentity,
) -> AutosignResult<SignTask> {
    let store = TaskStore::new(&settings.workdir, TaskKind::Sign);
    let config = store.load_sign(task)?;
    let record = record_path(&store, task, identity.account())?;
    Ok(SignTask::new(task, config, hub.clone(), identity, record)?
        .with_solver(solver_from_env())
        .with_poll_interval(settings.reply_poll_interval)
        .with_cooldown(settings.cooldown))
}

/// Wait for every tracked task; Ctrl-C cancels them all.
async fn supervise(tracker: &TaskTracker) -> Result<()> {
    tokio::select! {
        outcomes = tracker.join_all() => {
            let failed: Vec<String> = outcomes
                .into_iter()
                .filter_map(|(name, outcome)| outcome.err().map(|e| format!("{}: {}", name, e)))
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                for failure in &failed {
                    error!("{}", failure);
                }
                bail!("{} task(s) failed", failed.len())
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping all tasks");
            tracker.cancel_all().await;
            Ok(())
        }
    }
}

pub(super) async fn login(settings: &Settings) -> Result<()> {
    let hub = offline_hub(settings);
    let record = oneshot::login(&hub, &settings.identity()).await?;
    println!("Logged in as {} (id {})", record.me.display_name(), record.me.id);
    for chat in &record.chats {
        let title = chat
            .title
            .clone()
            .or_else(|| chat.username.as_ref().map(|u| format!("@{}", u)))
            .unwrap_or_default();
        println!("  {:>16}  {:<10} {}", chat.id, chat.kind, title);
    }
    Ok(())
}

pub(super) async fn logout(settings: &Settings) -> Result<()> {
    let hub = offline_hub(settings);
    oneshot::logout(&hub, &settings.identity()).await?;
    println!("Logged out '{}'", settings.account);
    Ok(())
}

pub(super) async fn run_tasks(settings: &Settings, mut tasks: Vec<String>) -> Result<()> {
    if tasks.is_empty() {
        tasks = TaskStore::new(&settings.workdir, TaskKind::Sign).list()?;
    }
    if tasks.is_empty() {
        bail!(
            "no sign tasks configured under {}",
            settings.workdir.join(TaskKind::Sign.dir_name()).display()
        );
    }
    let hub = offline_hub(settings);
    let tracker = TaskTracker::new();
    for name in tasks {
        let task = build_sign_task(settings, &hub, &name, settings.identity())?;
        info!("Starting sign task '{}'", name);
        tracker
            .spawn(name, async move { task.run(RunMode::default()).await })
            .await;
    }
    supervise(&tracker).await
}

pub(super) async fn run_once(settings: &Settings, task: &str) -> Result<()> {
    let hub = offline_hub(settings);
    let task = build_sign_task(settings, &hub, task, settings.identity())?;
    task.run(RunMode::once()).await?;
    Ok(())
}

pub(super) async fn multi_run(settings: &Settings, task: &str, accounts: &[String]) -> Result<()> {
    let hub = offline_hub(settings);
    let tracker = TaskTracker::new();
    for account in accounts {
        let sign = build_sign_task(settings, &hub, task, settings.identity_for(account))?;
        tracker
            .spawn(format!("{}@{}", task, account), async move {
                sign.run(RunMode::default()).await
            })
            .await;
    }
    supervise(&tracker).await
}

pub(super) async fn send_text(
    settings: &Settings,
    chat_id: ChatId,
    text: &str,
    delete_after: Option<u64>,
) -> Result<()> {
    let hub = offline_hub(settings);
    oneshot::send_text(&hub, &settings.identity(), chat_id, text, delete_after).await?;
    Ok(())
}

pub(super) async fn send_dice(settings: &Settings, chat_id: ChatId, emoji: &str) -> Result<()> {
    let hub = offline_hub(settings);
    oneshot::send_dice(&hub, &settings.identity(), chat_id, emoji).await?;
    Ok(())
}

pub(super) async fn list_members(
    settings: &Settings,
    chat: &ChatRef,
    query: &str,
    admin: bool,
    limit: usize,
) -> Result<()> {
    let hub = offline_hub(settings);
    let members =
        oneshot::list_members(&hub, &settings.identity(), chat, query, admin, limit).await?;
    if members.is_empty() {
        println!("No members of {} matched.", chat);
    }
    for member in members {
        let bot = if member.is_bot { "  [bot]" } else { "" };
        println!("  {:>16}  {}{}", member.user.id, member.user.display_name(), bot);
    }
    Ok(())
}

/// When and how often `schedule-messages` queues its text.
pub(super) struct SchedulePlan {
    pub crontab: String,
    pub times: usize,
    pub random_seconds: u64,
    pub timezone: Option<String>,
}

pub(super) async fn schedule_messages(
    settings: &Settings,
    chat_id: ChatId,
    text: &str,
    plan: &SchedulePlan,
) -> Result<()> {
    let tz = resolve_timezone(plan.timezone.as_deref())?;
    let hub = offline_hub(settings);
    let scheduled = oneshot::schedule_messages(
        &hub,
        &settings.identity(),
        chat_id,
        text,
        &plan.crontab,
        plan.times,
        plan.random_seconds,
        tz,
    )
    .await?;
    println!("Scheduled {} message(s) in {}:", scheduled.len(), chat_id);
    for message in scheduled {
        println!("  {}", message.send_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"));
    }
    Ok(())
}

pub(super) async fn list_schedule_messages(settings: &Settings, chat_id: ChatId) -> Result<()> {
    let hub = offline_hub(settings);
    let messages = oneshot::list_scheduled_messages(&hub, &settings.identity(), chat_id).await?;
    if messages.is_empty() {
        println!("No scheduled messages in {}.", chat_id);
    }
    for message in messages {
        println!(
            "  {:>8}  {}  {}",
            message.message_id,
            message.send_at.to_rfc3339(),
            message.text.unwrap_or_default()
        );
    }
    Ok(())
}

pub(super) fn list(settings: &Settings, kind: TaskKind) -> Result<()> {
    let tasks = TaskStore::new(&settings.workdir, kind).list()?;
    if tasks.is_empty() {
        println!("No {} tasks configured.", kind);
    }
    for task in tasks {
        println!("{}", task);
    }
    Ok(())
}

pub(super) fn export(settings: &Settings, task: &str, output: Option<&Path>) -> Result<()> {
    let json = TaskStore::new(&settings.workdir, TaskKind::Sign).export(task)?;
    match output {
        Some(path) => {
            atomic_write(path, &json)?;
            println!("Exported '{}' to {}", task, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub(super) fn import(settings: &Settings, task: &str, input: Option<&Path>) -> Result<()> {
    let json = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read config from stdin")?;
            buf
        }
    };
    TaskStore::new(&settings.workdir, TaskKind::Sign).import(task, &json)?;
    println!("Imported '{}'", task);
    Ok(())
}

pub(super) async fn monitor_run(settings: &Settings, task: &str) -> Result<()> {
    let store = TaskStore::new(&settings.workdir, TaskKind::Monitor);
    let config = store.load_monitor(task)?;
    let hub = offline_hub(settings);
    let monitor = MonitorTask::new(task, &config, hub, settings.identity())?
        .with_solver(solver_from_env())
        .with_cooldown(settings.cooldown);
    tokio::select! {
        result = monitor.run() => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping monitor '{}'", task),
    }
    Ok(())
}
