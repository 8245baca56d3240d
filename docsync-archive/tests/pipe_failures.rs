#![cfg(unix)]

use std::path::PathBuf;

use docsync_archive::{transfer_collection, ArchiveError, Direction, TransferPlan};
use docsync_core::config::ArchiveConfig;

fn plan(dump: &str, restore: &str) -> TransferPlan {
    let config = ArchiveConfig {
        uri: "mongodb://localhost:27017".into(),
        primary_database: "Main".into(),
        archive_database: "Archived".into(),
        dump_program: PathBuf::from(dump),
        restore_program: PathBuf::from(restore),
    };
    TransferPlan::new(&config, Direction::Archive, "visits").unwrap()
}

#[test]
fn both_sides_succeed() {
    transfer_collection(&plan("true", "true")).unwrap();
}

#[test]
fn failing_dump_is_fatal() {
    match transfer_collection(&plan("false", "true")) {
        Err(ArchiveError::ProcessFailed { dump, restore }) => {
            assert!(!dump.success());
            assert!(restore.success());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn failing_restore_is_fatal() {
    match transfer_collection(&plan("true", "false")) {
        Err(ArchiveError::ProcessFailed { dump, restore }) => {
            assert!(dump.success());
            assert!(!restore.success());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn missing_program_reports_spawn_failure() {
    let err = transfer_collection(&plan("true", "/nonexistent/docsync-restore")).unwrap_err();
    match err {
        ArchiveError::Spawn { program, .. } => {
            assert_eq!(program, PathBuf::from("/nonexistent/docsync-restore"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}
