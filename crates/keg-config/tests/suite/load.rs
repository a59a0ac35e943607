use keg_config::{ConfigError, KegConfig, LoggingConfig, RemoteConfig, CONFIG_FILENAME};
use tempfile::TempDir;

#[test]
fn missing_file_yields_defaults() {
    let tmp = TempDir::new().unwrap();
    let config = KegConfig::load_or_default(tmp.path().join(CONFIG_FILENAME)).unwrap();

    assert_eq!(config, KegConfig::default());
    assert_eq!(
        config.default_remote_prefix,
        "http://us.patch.battle.net:1119/"
    );
    assert_eq!(config.remote, RemoteConfig::default());
    assert_eq!(config.remote.connect_timeout_ms, 10_000);
    assert_eq!(config.remote.read_timeout_ms, 60_000);
    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn missing_file_is_an_error_for_strict_loads() {
    let tmp = TempDir::new().unwrap();
    let err = KegConfig::load_from_path(tmp.path().join(CONFIG_FILENAME)).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err:?}");
}

#[test]
fn partial_files_fill_in_defaults() {
    let config = KegConfig::load_from_str(
        r#"
[remote]
connect_timeout_ms = 250

[logging]
level = "warning"
json = true
"#,
    )
    .unwrap();

    assert_eq!(config.remote.connect_timeout_ms, 250);
    assert_eq!(config.remote.read_timeout_ms, 60_000);
    assert_eq!(config.logging.level, "warning");
    assert!(config.logging.json);
    assert!(config.logging.stderr);
    assert_eq!(
        config.default_remote_prefix,
        "http://us.patch.battle.net:1119/"
    );
}

#[test]
fn initialize_writes_defaults_once() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join(CONFIG_FILENAME);

    assert!(KegConfig::initialize(&path).unwrap());
    assert_eq!(KegConfig::load_from_path(&path).unwrap(), KegConfig::default());

    std::fs::write(&path, "default_remote_prefix = \"http://eu.patch.battle.net:1119/\"\n")
        .unwrap();
    assert!(!KegConfig::initialize(&path).unwrap());
    assert_eq!(
        KegConfig::load_from_path(&path)
            .unwrap()
            .default_remote_prefix,
        "http://eu.patch.battle.net:1119/"
    );
}

#[test]
fn save_round_trips() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(CONFIG_FILENAME);

    let mut config = KegConfig::default();
    config.remote.read_timeout_ms = 1_234;
    config.logging.file = Some(tmp.path().join("keg.log"));
    config.save(&path).unwrap();

    assert_eq!(KegConfig::load_from_path(&path).unwrap(), config);
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != CONFIG_FILENAME)
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn clean_remote_expands_short_names() {
    let config = KegConfig::default();
    assert_eq!(
        config.clean_remote("wow"),
        "http://us.patch.battle.net:1119/wow"
    );
    assert_eq!(
        config.clean_remote("http://127.0.0.1:8080/wow"),
        "http://127.0.0.1:8080/wow"
    );

    let custom = KegConfig {
        default_remote_prefix: "https://patch.example.com/".to_owned(),
        ..KegConfig::default()
    };
    assert_eq!(custom.clean_remote("s2"), "https://patch.example.com/s2");
}

#[test]
fn type_errors_are_reported_as_toml_errors() {
    let err = KegConfig::load_from_str("[remote]\nread_timeout_ms = -1\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
    assert!(err.to_string().starts_with("failed to parse toml config"));
}
