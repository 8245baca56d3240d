//! Config loading error-message and layout integration tests.
//! Layout: ~/.docsync/config.yaml

use std::path::PathBuf;

use assert_fs::prelude::*;
use docsync_core::{config, ConfigError, PoolBounds};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".docsync/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("config.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn load_without_store_section_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".docsync/config.yaml")
        .write_str("archive:\n  uri: mongodb://x\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_rejects_inverted_pool_bounds() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".docsync/config.yaml")
        .write_str(
            "store:\n  uri: mongodb://db:27017\n  database: Test\n  min_pool_size: 60\n  max_pool_size: 50\n",
        )
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("min_pool_size"));
}

// ---------------------------------------------------------------------------
// 2. Full config
// ---------------------------------------------------------------------------

#[test]
fn load_full_config_applies_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = home.child(".docsync/config.yaml");
    file.write_str(
        r#"
store:
  uri: mongodb://db:27017
  database: Modoo_data
archive:
  uri: mongodb://db:27017
  primary_database: Modoo_data
  archive_database: Archived
export:
  ssh_host: bastion.internal
  ssh_user: deploy
  ssh_pkey: /keys/id_ed25519
  db_host: 10.0.0.5
  db_user: reader
  db_pass: secret
  db_name: clinic
"#,
    )
    .expect("write");
    file.assert(predicate::path::exists());

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.store.database, "Modoo_data");
    assert_eq!(loaded.store.pool_bounds(), PoolBounds::default());

    let archive = loaded.archive.expect("archive section");
    assert_eq!(archive.archive_database, "Archived");
    assert_eq!(archive.dump_program, PathBuf::from("mongodump"));
    assert_eq!(archive.restore_program, PathBuf::from("mongorestore"));

    let export = loaded.export.expect("export section");
    assert_eq!(export.ssh_port, 22);
    assert_eq!(export.db_port, 3306);
    assert!(export.local_port.is_none());
}

#[test]
fn load_from_explicit_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("elsewhere.yaml");
    file.write_str("store:\n  uri: mongodb://db\n  database: Test\n  max_pool_size: 8\n")
        .expect("write");

    let loaded = config::load_from(file.path()).expect("load");
    assert!(loaded.archive.is_none());
    assert_eq!(loaded.store.pool_bounds(), PoolBounds { min: 5, max: 8 });
}
