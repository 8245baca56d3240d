#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use docsync_archive::{transfer_collection, Direction, TransferPlan};
use docsync_core::config::ArchiveConfig;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn dump_output_reaches_restore_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let dump = script(dir.path(), "dump", "printf 'archive of %s' \"$4\"");
    let restore = script(
        dir.path(),
        "restore",
        &format!(
            "cat > '{0}/restored'\nprintf '%s\\n' \"$@\" > '{0}/args'",
            out.display()
        ),
    );
    let config = ArchiveConfig {
        uri: "mongodb://localhost:27017".into(),
        primary_database: "Main".into(),
        archive_database: "Archived".into(),
        dump_program: dump,
        restore_program: restore,
    };
    let plan = TransferPlan::new(&config, Direction::Restore, "visits").unwrap();

    transfer_collection(&plan).unwrap();

    assert_eq!(
        fs::read_to_string(out.join("restored")).unwrap(),
        "archive of --collection=visits"
    );
    let args = fs::read_to_string(out.join("args")).unwrap();
    assert_eq!(
        args.lines().collect::<Vec<_>>(),
        vec![
            "--archive",
            "--uri=mongodb://localhost:27017",
            "--nsFrom=Archived.visits",
            "--nsTo=Main.visits",
            "--drop",
        ]
    );
}
