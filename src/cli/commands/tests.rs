use super::subcommands::{
    SchedulePlan, build_sign_task, export, import, record_path, run_once, schedule_messages,
};
use super::*;
use crate::config::{TaskKind, TaskStore};
use crate::runner::SignRecord;
use clap::CommandFactory;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

fn settings_in(dir: &tempfile::TempDir) -> Settings {
    Settings {
        workdir: dir.path().join("work"),
        session_dir: dir.path().join("sessions"),
        limits: crate::session::CallLimits {
            min_interval: Duration::ZERO,
            max_retries: 3,
            flood_padding: Duration::ZERO,
        },
        ..Settings::default()
    }
}

const SIGN_JSON: &str = r#"{
    "chats": [{"chat_id": -100123, "actions": [{"action": "send_dice", "dice": "🎯"}]}],
    "sign_at": "07:30",
    "timezone": "UTC"
}"#;

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_global_options_resolve_into_settings() {
    let cli = parse(&[
        "autosign",
        "--workdir",
        "/srv/autosign",
        "--account",
        "alice",
        "--min-interval-ms",
        "250",
        "--max-retries",
        "5",
        "--cooldown",
        "2m",
        "list",
    ]);
    let settings = cli.global.settings();
    assert_eq!(settings.workdir, PathBuf::from("/srv/autosign"));
    assert_eq!(settings.account, "alice");
    assert_eq!(settings.limits.min_interval, Duration::from_millis(250));
    assert_eq!(settings.limits.max_retries, 5);
    assert_eq!(settings.cooldown, Duration::from_secs(120));
    assert!(matches!(cli.command, Commands::List));
}

#[test]
fn test_defaults_match_settings_defaults() {
    let cli = parse(&["autosign", "login"]);
    let settings = cli.global.settings();
    let defaults = Settings::default();
    assert_eq!(settings.workdir, defaults.workdir);
    assert_eq!(settings.limits, defaults.limits);
    assert_eq!(settings.cooldown, defaults.cooldown);
    assert_eq!(settings.dialog_limit, defaults.dialog_limit);
}

#[test]
fn test_subcommand_arguments() {
    match parse(&["autosign", "multi-run", "daily", "-a", "alice", "bob"]).command {
        Commands::MultiRun { task, accounts } => {
            assert_eq!(task, "daily");
            assert_eq!(accounts, vec!["alice".to_string(), "bob".to_string()]);
        }
        other => panic!("unexpected command {:?}", other),
    }
    match parse(&["autosign", "send-text", "-100123", "hello", "--delete-after", "5"]).command {
        Commands::SendText {
            chat_id,
            text,
            delete_after,
        } => {
            assert_eq!(chat_id, -100_123);
            assert_eq!(text, "hello");
            assert_eq!(delete_after, Some(5));
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert!(matches!(
        parse(&["autosign", "monitor", "run", "replies"]).command,
        Commands::Monitor {
            cmd: MonitorCommands::Run { .. }
        }
    ));
    assert!(Cli::try_parse_from(["autosign", "multi-run", "daily"]).is_err());
}

#[test]
fn test_import_then_export_current_form() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    let input = dir.path().join("in.json");
    std::fs::write(&input, SIGN_JSON).unwrap();

    import(&settings, "daily", Some(&input)).unwrap();
    let tasks = TaskStore::new(&settings.workdir, TaskKind::Sign).list().unwrap();
    assert_eq!(tasks, vec!["daily".to_string()]);

    let output = dir.path().join("out.json");
    export(&settings, "daily", Some(&output)).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(exported["chats"][0]["chat_id"], -100_123);
    assert_eq!(exported["chats"][0]["actions"][0]["action"], "send_dice");
}

#[test]
fn test_import_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    let input = dir.path().join("bad.json");
    std::fs::write(&input, r#"{"chats": [], "sign_at": "07:30"}"#).unwrap();
    assert!(import(&settings, "daily", Some(&input)).is_err());
    assert!(
        TaskStore::new(&settings.workdir, TaskKind::Sign)
            .list()
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_record_path_is_per_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = TaskStore::new(dir.path(), TaskKind::Sign);
    let alice = record_path(&store, "daily", "alice").unwrap();
    let bob = record_path(&store, "daily", "bob").unwrap();
    assert_ne!(alice, bob);
    assert!(alice.ends_with("signs/daily/alice/sign_record.json"));
    assert!(record_path(&store, "../escape", "alice").is_err());
}

#[tokio::test]
async fn test_run_once_against_offline_backend() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    TaskStore::new(&settings.workdir, TaskKind::Sign)
        .import("daily", SIGN_JSON)
        .unwrap();

    run_once(&settings, "daily").await.unwrap();

    let store = TaskStore::new(&settings.workdir, TaskKind::Sign);
    let record = SignRecord::load(&record_path(&store, "daily", &settings.account).unwrap());
    assert_eq!(record.len(), 1);
    assert!(
        settings
            .state_dir()
            .join(settings.identity().state_key())
            .join("me.json")
            .is_file()
    );
}

#[test]
fn test_missing_task_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    let hub = offline_hub(&settings);
    let err = build_sign_task(&settings, &hub, "nope", settings.identity())
        .err()
        .unwrap();
    assert!(matches!(err, crate::errors::AutosignError::Config(_)));
}

#[test]
fn test_member_and_schedule_arguments() {
    match parse(&["autosign", "list-members", "--chat-id", "@grp", "bob", "--admin"]).command {
        Commands::ListMembers {
            chat_id,
            query,
            admin,
            limit,
        } => {
            assert_eq!(chat_id, ChatRef::Username("grp".into()));
            assert_eq!(query, "bob");
            assert!(admin);
            assert_eq!(limit, 10);
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert!(matches!(
        parse(&["autosign", "list-members", "--chat-id", "-100123"]).command,
        Commands::ListMembers {
            chat_id: ChatRef::Id(-100_123),
            ..
        }
    ));
    assert!(Cli::try_parse_from(["autosign", "list-members", "--chat-id", "grp"]).is_err());

    match parse(&[
        "autosign",
        "schedule-messages",
        "-100123",
        "gm",
        "-C",
        "0 8 * * *",
        "-N",
        "30",
    ])
    .command
    {
        Commands::ScheduleMessages {
            chat_id,
            crontab,
            next_times,
            random_seconds,
            ..
        } => {
            assert_eq!(chat_id, -100_123);
            assert_eq!(crontab, "0 8 * * *");
            assert_eq!(next_times, 30);
            assert_eq!(random_seconds, 0);
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert!(
        Cli::try_parse_from(["autosign", "schedule-messages", "1", "x", "-C", "0 8 * * *", "-N", "0"])
            .is_err()
    );
    assert!(Cli::try_parse_from(["autosign", "schedule-messages", "1", "x"]).is_err());
}

#[tokio::test]
async fn test_schedule_messages_against_offline_backend() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir);
    let plan = SchedulePlan {
        crontab: "30 7 * * *".into(),
        times: 2,
        random_seconds: 0,
        timezone: Some("UTC".into()),
    };
    schedule_messages(&settings, -100_123, "gm", &plan).await.unwrap();

    let bad = SchedulePlan {
        timezone: Some("Mars/Olympus".into()),
        ..plan
    };
    assert!(schedule_messages(&settings, -100_123, "gm", &bad).await.is_err());
}
