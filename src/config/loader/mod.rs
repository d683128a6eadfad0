use super::schema::{MonitorConfig, SignConfig, load_monitor_config, load_sign_config};
use crate::errors::{AutosignError, AutosignResult};
use crate::utils::{atomic_write, ensure_dir};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Sign,
    Monitor,
}

impl TaskKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Sign => "signs",
            Self::Monitor => "monitors",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sign => f.write_str("sign"),
            Self::Monitor => f.write_str("monitor"),
        }
    }
}

/// A task configuration that can be read from any of its historical layouts.
pub trait VersionedConfig: Serialize + Sized {
    const KIND: TaskKind;

    /// Parse and validate; the flag reports whether the input was an older layout.
    fn parse(json: &str) -> AutosignResult<(Self, bool)>;
}

impl VersionedConfig for SignConfig {
    const KIND: TaskKind = TaskKind::Sign;

    fn parse(json: &str) -> AutosignResult<(Self, bool)> {
        load_sign_config(json)
    }
}

impl VersionedConfig for MonitorConfig {
    const KIND: TaskKind = TaskKind::Monitor;

    fn parse(json: &str) -> AutosignResult<(Self, bool)> {
        Ok((load_monitor_config(json)?, false))
    }
}

/// Task configurations of one kind under `<workdir>/<signs|monitors>/<task>/config.json`.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
    kind: TaskKind,
}

impl TaskStore {
    pub fn new(workdir: &Path, kind: TaskKind) -> Self {
        Self {
            root: workdir.join(kind.dir_name()),
            kind,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn task_dir(&self, task: &str) -> AutosignResult<PathBuf> {
        validate_task_name(task)?;
        Ok(self.root.join(task))
    }

    pub fn config_path(&self, task: &str) -> AutosignResult<PathBuf> {
        Ok(self.task_dir(task)?.join(CONFIG_FILE))
    }

    /// Names of the configured tasks, sorted.
    pub fn list(&self) -> AutosignResult<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                tasks.push(name.to_string());
            }
        }
        tasks.sort();
        Ok(tasks)
    }

    /// Load a task config, writing it back in current form if it was migrated.
    pub fn load<C: VersionedConfig>(&self, task: &str) -> AutosignResult<C> {
        self.check_kind::<C>()?;
        let path = self.config_path(task)?;
        if !path.is_file() {
            return Err(AutosignError::Config(format!(
                "{} task '{}' has no config at {}",
                self.kind,
                task,
                path.display()
            )));
        }
        let content = fs::read_to_string(&path)?;
        let (config, migrated) = C::parse(&content).map_err(|e| match e {
            AutosignError::Config(msg) => {
                AutosignError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        if migrated {
            info!("migrated {} task '{}' to the current config layout", self.kind, task);
            if let Err(e) = self.save(task, &config) {
                warn!("failed to write migrated config for '{}': {}", task, e);
            }
        }
        Ok(config)
    }

    pub fn load_sign(&self, task: &str) -> AutosignResult<SignConfig> {
        self.load(task)
    }

    pub fn load_monitor(&self, task: &str) -> AutosignResult<MonitorConfig> {
        self.load(task)
    }

    pub fn save<C: VersionedConfig>(&self, task: &str, config: &C) -> AutosignResult<()> {
        self.check_kind::<C>()?;
        let dir = self.task_dir(task)?;
        ensure_dir(&dir)?;
        let content = serde_json::to_string_pretty(config)?;
        atomic_write(&dir.join(CONFIG_FILE), &content)?;
        Ok(())
    }

    /// The task's config in current form, as pretty JSON.
    pub fn export(&self, task: &str) -> AutosignResult<String> {
        match self.kind {
            TaskKind::Sign => Ok(serde_json::to_string_pretty(&self.load_sign(task)?)?),
            TaskKind::Monitor => Ok(serde_json::to_string_pretty(&self.load_monitor(task)?)?),
        }
    }

    /// Validate `json` as this store's kind and save it under `task`.
    pub fn import(&self, task: &str, json: &str) -> AutosignResult<()> {
        match self.kind {
            TaskKind::Sign => self.save(task, &SignConfig::parse(json)?.0),
            TaskKind::Monitor => self.save(task, &MonitorConfig::parse(json)?.0),
        }?;
        info!("imported {} task '{}'", self.kind, task);
        Ok(())
    }

    fn check_kind<C: VersionedConfig>(&self) -> AutosignResult<()> {
        if C::KIND == self.kind {
            Ok(())
        } else {
            Err(AutosignError::Config(format!(
                "{} config used with the {} task store",
                C::KIND,
                self.kind
            )))
        }
    }
}

fn validate_task_name(task: &str) -> AutosignResult<()> {
    if task.is_empty()
        || task == "."
        || task == ".."
        || task.contains(['/', '\\'])
        || task.chars().any(char::is_control)
    {
        return Err(AutosignError::Config(format!("invalid task name '{}'", task)));
    }
    Ok(())
}
