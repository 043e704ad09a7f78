//! Command line sessions backed by a JSON lines event log
//!
//! Each `run_from` call stands in for one process invocation; only the
//! event log carries state from one call to the next.

use examguard::cli::run_from;
use examguard::config::loader::GuardConfig;
use examguard::ledger::SessionState;
use examguard::service::IntegrityService;
use std::path::{Path, PathBuf};

fn write_config(dir: &Path) -> PathBuf {
    let mut config = GuardConfig::default();
    config.storage.event_log = Some(dir.join("events.jsonl"));
    config.audit.path = Some(dir.join("audit.jsonl"));

    let path = dir.join("examguard.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

fn observe_loud(config: &Path) {
    let config = config.to_str().unwrap();
    run_from([
        "examguard", "--config", config, "observe", "--subject", "cli-7", "--session", "T-9",
        "--audio", "80",
    ])
    .unwrap();
}

#[test]
fn test_observations_accumulate_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path());

    for _ in 0..4 {
        observe_loud(&config_path);
    }
    run_from([
        "examguard",
        "--config",
        config_path.to_str().unwrap(),
        "window-event",
        "--subject",
        "cli-7",
        "--test-id",
        "T-9",
    ])
    .unwrap();

    let config = GuardConfig::load(Some(config_path.as_path())).unwrap();
    let service = IntegrityService::from_config(&config).unwrap();
    let stats = service.session_stats("cli-7", "T-9").unwrap();
    assert_eq!(stats.aud, 4);
    assert_eq!(stats.win, 1);
    assert_eq!(stats.score, 5);
    assert_eq!(stats.state, SessionState::Active);
}

#[test]
fn test_termination_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path());

    // one point per loud observation; the eleventh passes the threshold of 10
    for _ in 0..11 {
        observe_loud(&config_path);
    }

    let config = GuardConfig::load(Some(config_path.as_path())).unwrap();
    let service = IntegrityService::from_config(&config).unwrap();
    let stats = service.session_stats("cli-7", "T-9").unwrap();
    assert_eq!(stats.score, 11);
    assert_eq!(stats.state, SessionState::Terminated);

    // a later invocation still runs against the terminated ledger
    observe_loud(&config_path);
    let service = IntegrityService::from_config(&config).unwrap();
    assert_eq!(
        service.session_stats("cli-7", "T-9").unwrap().state,
        SessionState::Terminated
    );
}

#[test]
fn test_unknown_subcommand_is_an_error() {
    assert!(run_from(["examguard", "rescore"]).is_err());
}
