use super::{apply_file, apply_overrides, load_settings, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn file_values_replace_defaults() {
    let mut settings = Settings::default();

    apply_file(
        &mut settings,
        r#"
workspace = "finance"
undo_depth = 5
log = "dashboard_engine=debug"
"#,
    )
    .expect("parse");

    assert_eq!(settings.workspace, "finance");
    assert_eq!(settings.undo_depth, 5);
    assert_eq!(settings.log_filter, "dashboard_engine=debug");
    assert_eq!(
        settings.query_cache_capacity,
        Settings::default().query_cache_capacity
    );
}

#[test]
fn malformed_file_is_an_error() {
    let mut settings = Settings::default();

    assert!(apply_file(&mut settings, "undo_depth = \"many\"").is_err());
}

#[test]
fn environment_overrides_win_and_bad_numbers_are_ignored() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("APP__WORKSPACE", "ops"),
        ("APP__QUERY_CACHE_CAPACITY", "not-a-number"),
        ("APP__UNDO_DEPTH", "12"),
        ("DASHCTL_LOG", "trace"),
    ]);
    let mut settings = Settings::default();

    apply_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.workspace, "ops");
    assert_eq!(
        settings.query_cache_capacity,
        Settings::default().query_cache_capacity
    );
    assert_eq!(settings.undo_depth, 12);
    assert_eq!(settings.log_filter, "trace");
}

#[test]
fn missing_settings_file_falls_back_to_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("dashctl_missing_{suffix}.toml"));

    let settings = load_settings(&path).expect("settings");

    assert_eq!(settings.undo_depth, Settings::default().undo_depth);
}

#[test]
fn settings_file_is_read_from_disk() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("dashctl_settings_{suffix}.toml"));
    fs::write(&path, "query_cache_capacity = 8\n").expect("write settings");

    let settings = load_settings(&path).expect("settings");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.query_cache_capacity, 8);
    assert_eq!(settings.engine_config().query_cache_capacity, 8);
}
