use keg_config::{init_tracing, LoggingConfig};
use tempfile::TempDir;

// `init_tracing` installs a process-wide subscriber, so this is the only test in the binary that
// calls it.
#[test]
fn file_sink_receives_json_events() {
    let tmp = TempDir::new().unwrap();
    let log_path = tmp.path().join("keg.log");
    let config = LoggingConfig {
        level: "DEBUG".to_owned(),
        json: true,
        stderr: false,
        file: Some(log_path.clone()),
    };

    init_tracing(&config);
    init_tracing(&config);

    tracing::debug!(target: "keg.config", entries = 3, "loaded state cache snapshot");
    tracing::trace!(target: "keg.config", "filtered out");

    let text = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 1, "{text}");
    assert!(lines[0].starts_with('{'), "{text}");
    assert!(lines[0].contains("loaded state cache snapshot"), "{text}");
    assert!(!text.contains("filtered out"), "{text}");
}
