mod subcommands;

#[cfg(test)]
mod tests;

use crate::backend::{Backend, ChatId, ChatRef, OfflineBackend};
use crate::config::Settings;
use crate::config::settings::{DEFAULT_ACCOUNT, DEFAULT_SESSION_DIR, DEFAULT_WORKDIR};
use crate::session::bootstrap::DEFAULT_DIALOG_LIMIT;
use crate::session::{BackendFactory, BootstrapCoordinator, ConnectionIdentity, SessionHub};
use crate::solver::{OpenAiSolver, Solver};
use crate::utils::expand_home;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "autosign")]
#[command(version, about = "Scheduled check-ins and auto-replies over a shared chat session")]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info", env = "AUTOSIGN_LOG_LEVEL")]
    log_level: String,
    /// Also write logs to this file, rotated daily
    #[arg(long, global = true, env = "AUTOSIGN_LOG_FILE")]
    log_file: Option<PathBuf>,
    /// Root of task configs and run records
    #[arg(long, short = 'w', global = true, default_value = DEFAULT_WORKDIR, env = "AUTOSIGN_WORKDIR")]
    workdir: String,
    /// Where account session storage lives
    #[arg(long, global = true, default_value = DEFAULT_SESSION_DIR, env = "AUTOSIGN_SESSION_DIR")]
    session_dir: String,
    #[arg(long, global = true, default_value = DEFAULT_ACCOUNT, env = "AUTOSIGN_ACCOUNT")]
    account: String,
    /// Minimum spacing between two calls on one account, in milliseconds
    #[arg(long, global = true, env = "AUTOSIGN_MIN_INTERVAL_MS")]
    min_interval_ms: Option<u64>,
    /// Attempts per call while the backend keeps asking to wait
    #[arg(long, global = true, env = "AUTOSIGN_MAX_RETRIES")]
    max_retries: Option<u32>,
    /// Pause before a failed task restarts (e.g. "30s", "2m")
    #[arg(long, global = true, value_parser = humantime::parse_duration, env = "AUTOSIGN_COOLDOWN")]
    cooldown: Option<Duration>,
    /// Dialogs fetched when an account is bootstrapped
    #[arg(long, global = true, default_value_t = DEFAULT_DIALOG_LIMIT)]
    num_of_dialogs: usize,
}

impl GlobalArgs {
    fn settings(&self) -> Settings {
        let mut settings = Settings {
            workdir: expand_home(&self.workdir),
            session_dir: expand_home(&self.session_dir),
            account: self.account.clone(),
            dialog_limit: self.num_of_dialogs,
            ..Settings::default()
        };
        if let Some(ms) = self.min_interval_ms {
            settings.limits.min_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = self.max_retries {
            settings.limits.max_retries = retries;
        }
        if let Some(cooldown) = self.cooldown {
            settings.cooldown = cooldown;
        }
        settings
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and list recent chats
    Login,
    /// Log the account out
    Logout,
    /// Run sign tasks on schedule (all configured tasks when none are named)
    Run { tasks: Vec<String> },
    /// Sign once now, even if already signed today
    RunOnce { task: String },
    /// Run one sign task for several accounts at once
    MultiRun {
        task: String,
        #[arg(short = 'a', long = "accounts", required = true, num_args = 1..)]
        accounts: Vec<String>,
    },
    /// Send a text message
    SendText {
        #[arg(allow_negative_numbers = true)]
        chat_id: ChatId,
        text: String,
        /// Delete the message again after this many seconds
        #[arg(long)]
        delete_after: Option<u64>,
    },
    /// Send a dice message
    SendDice {
        #[arg(allow_negative_numbers = true)]
        chat_id: ChatId,
        #[arg(default_value = "🎲")]
        emoji: String,
    },
    /// Search a group's members, or list its administrators
    ListMembers {
        /// Numeric chat id or @username
        #[arg(long, allow_negative_numbers = true)]
        chat_id: ChatRef,
        #[arg(default_value = "")]
        query: String,
        /// Only list administrators
        #[arg(long)]
        admin: bool,
        #[arg(long, short = 'l', default_value_t = 10)]
        limit: usize,
    },
    /// Queue a message for server-side delivery on a schedule
    ScheduleMessages {
        #[arg(allow_negative_numbers = true)]
        chat_id: ChatId,
        text: String,
        /// Cron expression, e.g. "0 0 * * *" for every midnight
        #[arg(long, short = 'C')]
        crontab: String,
        /// How many upcoming firings to queue
        #[arg(long, short = 'N', default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
        next_times: u16,
        /// Random delay added to each message, in seconds
        #[arg(long, default_value_t = 0)]
        random_seconds: u64,
        /// Zone the crontab is read in (default: system zone)
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Show messages queued for server-side delivery
    ListScheduleMessages {
        #[arg(allow_negative_numbers = true)]
        chat_id: ChatId,
    },
    /// List configured sign tasks
    List,
    /// Print a sign task's config in current form
    Export {
        task: String,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Import a sign task's config from a file or stdin
    Import {
        task: String,
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
    },
    /// Auto-reply monitors
    Monitor {
        #[command(subcommand)]
        cmd: MonitorCommands,
    },
}

#[derive(Subcommand, Debug)]
enum MonitorCommands {
    /// Run a monitor task
    Run { task: String },
    /// List configured monitor tasks
    List,
}

/// Hub whose connections go through the in-process offline backend.
fn offline_hub(settings: &Settings) -> Arc<SessionHub> {
    let factory: BackendFactory = Arc::new(|identity: &ConnectionIdentity| {
        Arc::new(OfflineBackend::new(identity.account())) as Arc<dyn Backend>
    });
    Arc::new(SessionHub::new(
        factory,
        settings.limits,
        BootstrapCoordinator::new(Some(settings.state_dir()), settings.dialog_limit),
    ))
}

fn solver_from_env() -> Option<Arc<dyn Solver>> {
    let solver = OpenAiSolver::from_env()?;
    info!("answering challenges with model {}", solver.model());
    Some(Arc::new(solver))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard =
        super::logging::init(&cli.global.log_level, cli.global.log_file.as_deref())?;
    let settings = cli.global.settings();

    match cli.command {
        Commands::Login => subcommands::login(&settings).await?,
        Commands::Logout => subcommands::logout(&settings).await?,
        Commands::Run { tasks } => subcommands::run_tasks(&settings, tasks).await?,
        Commands::RunOnce { task } => subcommands::run_once(&settings, &task).await?,
        Commands::MultiRun { task, accounts } => {
            subcommands::multi_run(&settings, &task, &accounts).await?;
        }
        Commands::SendText {
            chat_id,
            text,
            delete_after,
        } => subcommands::send_text(&settings, chat_id, &text, delete_after).await?,
        Commands::SendDice { chat_id, emoji } => {
            subcommands::send_dice(&settings, chat_id, &emoji).await?;
        }
        Commands::ListMembers {
            chat_id,
            query,
            admin,
            limit,
        } => subcommands::list_members(&settings, &chat_id, &query, admin, limit).await?,
        Commands::ScheduleMessages {
            chat_id,
            text,
            crontab,
            next_times,
            random_seconds,
            timezone,
        } => {
            let plan = subcommands::SchedulePlan {
                crontab,
                times: usize::from(next_times),
                random_seconds,
                timezone,
            };
            subcommands::schedule_messages(&settings, chat_id, &text, &plan).await?;
        }
        Commands::ListScheduleMessages { chat_id } => {
            subcommands::list_schedule_messages(&settings, chat_id).await?;
        }
        Commands::List => subcommands::list(&settings, crate::config::TaskKind::Sign)?,
        Commands::Export { task, output } => {
            subcommands::export(&settings, &task, output.as_deref())?;
        }
        Commands::Import { task, input } => {
            subcommands::import(&settings, &task, input.as_deref())?;
        }
        Commands::Monitor { cmd } => match cmd {
            MonitorCommands::Run { task } => subcommands::monitor_run(&settings, &task).await?,
            MonitorCommands::List => {
                subcommands::list(&settings, crate::config::TaskKind::Monitor)?;
            }
        },
    }
    Ok(())
}
