pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{CONFIG_FILE, TaskKind, TaskStore, VersionedConfig};
pub use schema::{
    MatchConfig, MatchRule, MonitorConfig, SignAction, SignChat, SignConfig, UserRef,
    load_monitor_config, load_sign_config,
};
pub use settings::Settings;
