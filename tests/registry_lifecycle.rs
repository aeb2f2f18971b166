//! End-to-end contract of the persisted process registry: the file exists iff
//! at least one record is outstanding, and stop/kill reconcile stale entries.

use servectl::error::RegistryError;
use servectl::process::SignalMode;
use servectl::registry::{ProcessRecord, Registry, REGISTRY_FILE};

// Pids far above any default pid_max; signal delivery fails harmlessly.
const STALE_PID: u32 = 4_999_900;

#[test]
fn registry_file_tracks_outstanding_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(REGISTRY_FILE);
    let registry = Registry::at(&path);

    assert!(registry.load().unwrap().is_empty());
    assert!(!path.exists());

    registry
        .append(ProcessRecord::new(
            vec![9393],
            STALE_PID,
            vec!["rec_model".into()],
        ))
        .unwrap();
    registry
        .append(ProcessRecord::new(
            vec![9494, 9495],
            STALE_PID + 1,
            vec!["ocr_det_model".into(), "rec_model".into()],
        ))
        .unwrap();
    assert!(path.exists());

    let records = registry.load().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].port, vec![9393]);
    assert_eq!(records[1].model.len(), 2);

    // The file survives rewrites as valid JSON.
    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);
}

#[cfg(unix)]
#[test]
fn stop_by_port_then_remove_all_clears_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(REGISTRY_FILE);
    let registry = Registry::at(&path);

    for (offset, port) in [9393u16, 9494, 9595].iter().enumerate() {
        registry
            .append(ProcessRecord::new(
                vec![*port],
                STALE_PID + offset as u32,
                vec![],
            ))
            .unwrap();
    }

    // A record whose port set matches a secondary port is found too.
    registry.remove_by_port(9494, SignalMode::Stop).unwrap();
    assert_eq!(registry.load().unwrap().len(), 2);

    registry.remove_all(SignalMode::Kill).unwrap();
    assert!(!path.exists());
    assert!(registry.load().unwrap().is_empty());
}

#[test]
fn unknown_port_is_an_error_not_a_silent_noop() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::at(dir.path().join(REGISTRY_FILE));

    registry
        .append(ProcessRecord::new(vec![9393], STALE_PID, vec![]))
        .unwrap();

    let err = registry.remove_by_port(1234, SignalMode::Stop).unwrap_err();
    assert!(matches!(err, RegistryError::PortNotFound(1234)));

    // Untouched: the record is still there.
    assert_eq!(registry.load().unwrap().len(), 1);
}
