use pipeline_utils::{ErrorContext, LoggerOptions, LoggerRegistry, RegistryConfig, Severity};
use std::fs;
use std::thread;
use tempfile::TempDir;

fn registry(tmp: &TempDir) -> LoggerRegistry {
    LoggerRegistry::new(
        RegistryConfig::default()
            .with_log_dir(tmp.path())
            .with_console(false),
    )
}

#[test]
fn same_name_never_duplicates_sinks() {
    let tmp = TempDir::new().unwrap();
    let registry = registry(&tmp);

    let a = registry.get("trainer").unwrap();
    let b = registry.get("trainer").unwrap();
    a.info("epoch finished");
    b.info("checkpoint written");

    let content = fs::read_to_string(tmp.path().join("trainer.log")).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert_eq!(content.matches("epoch finished").count(), 1);
    assert_eq!(content.matches("checkpoint written").count(), 1);
}

#[test]
fn concurrent_first_lookups_share_one_logger() {
    let tmp = TempDir::new().unwrap();
    let registry = registry(&tmp);

    let loggers: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| registry.get("shared").unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.len(), 1);
    assert!(loggers.windows(2).all(|pair| pair[0].same_as(&pair[1])));
}

#[test]
fn rotation_through_logger_keeps_backup_count() {
    let tmp = TempDir::new().unwrap();
    let registry = registry(&tmp);
    let logger = registry
        .get_with(
            "rotating",
            LoggerOptions::new().max_bytes(200).backup_count(2),
        )
        .unwrap();

    for i in 0..50 {
        logger.info(format_args!("record number {i:03}"));
    }

    let base = tmp.path().join("rotating.log");
    assert!(base.exists());
    assert!(tmp.path().join("rotating.log.1").exists());
    assert!(tmp.path().join("rotating.log.2").exists());
    assert!(!tmp.path().join("rotating.log.3").exists());

    let last = fs::read_to_string(&base).unwrap();
    assert!(last.contains("record number 049"));
}

#[test]
fn exception_records_structured_error_in_json() {
    let tmp = TempDir::new().unwrap();
    let registry = registry(&tmp);
    let logger = registry
        .get_with("api", LoggerOptions::new().json(true).level(Severity::Warning))
        .unwrap();

    logger.info("below threshold");
    let err = ErrorContext::new("model registry unavailable");
    logger.exception("Request failed", &err);

    let content = fs::read_to_string(logger.log_path()).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["level"], "ERROR");
    let message = record["message"].as_str().unwrap();
    assert!(message.starts_with("Request failed\nError in file [Unknown] at line [Unknown]"));
}
