use std::{fs, io::ErrorKind, path::Path};

use anyhow::Context;
use dashboard_engine::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub workspace: String,
    pub query_cache_capacity: usize,
    pub undo_depth: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            workspace: engine.workspace,
            query_cache_capacity: engine.query_cache_capacity,
            undo_depth: engine.undo_depth,
            log_filter: "warn".into(),
        }
    }
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workspace: self.workspace.clone(),
            query_cache_capacity: self.query_cache_capacity,
            undo_depth: self.undo_depth,
            ..EngineConfig::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    workspace: Option<String>,
    query_cache_capacity: Option<usize>,
    undo_depth: Option<usize>,
    log: Option<String>,
}

/// Defaults, then `path` if it exists, then environment overrides.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid settings file {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.workspace {
        settings.workspace = v;
    }
    if let Some(v) = file.query_cache_capacity {
        settings.query_cache_capacity = v;
    }
    if let Some(v) = file.undo_depth {
        settings.undo_depth = v;
    }
    if let Some(v) = file.log {
        settings.log_filter = v;
    }
    Ok(())
}

/// Applies `APP__*` variables and `DASHCTL_LOG`; unparseable numbers are ignored.
fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("APP__WORKSPACE") {
        settings.workspace = v;
    }
    if let Some(v) = lookup("APP__QUERY_CACHE_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.query_cache_capacity = parsed;
        }
    }
    if let Some(v) = lookup("APP__UNDO_DEPTH") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.undo_depth = parsed;
        }
    }
    if let Some(v) = lookup("DASHCTL_LOG") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
