//! Opening a basis from `revstore.toml`

use crate::common::*;
use std::fs;

#[test]
fn default_file_opens_a_basis() {
    init_tracing();
    let dir = config_dir();
    let config = RevStoreConfig::from_file(&config_path(dir.path())).unwrap();
    assert_eq!(config, RevStoreConfig::default());

    let store = TestStore::with_config(config);
    let (bug, _) = store.file_bug("configured");
    assert!(bug.last_revision().is_ok());
}

#[test]
fn written_config_round_trips() {
    let dir = config_dir();
    let path = config_path(dir.path());
    let config = RevStoreConfig {
        value_cache_capacity: 16,
        read_only: true,
        ..RevStoreConfig::default()
    };
    config.write_to_file(&path).unwrap();
    assert_eq!(RevStoreConfig::from_file(&path).unwrap(), config);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = config_dir();
    let path = config_path(dir.path());
    fs::write(&path, "value_cache_capacity = 0\n").unwrap();

    let err = RevStoreConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, Error::Config(ref msg) if msg.contains("value_cache_capacity")));

    let config = RevStoreConfig {
        artifact_cache_capacity: 0,
        ..RevStoreConfig::default()
    };
    assert!(matches!(
        Basis::open(Universe::new(), config),
        Err(Error::Config(_))
    ));
}

#[test]
fn read_only_basis_reads_shared_universe() {
    init_tracing();
    let universe = Universe::new();
    let writer = Basis::open(universe.clone(), RevStoreConfig::default()).unwrap();
    let txn = writer.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    creator.set_value(AtomId::new(5_000_001), "shared").unwrap();
    txn.commit().unwrap();

    let reader = Basis::open(
        universe,
        RevStoreConfig {
            read_only: true,
            ..RevStoreConfig::default()
        },
    )
    .unwrap();
    let artifact = reader.artifact(creator.key()).unwrap();
    assert_eq!(
        artifact.value(AtomId::new(5_000_001)).unwrap(),
        Some(Value::from("shared"))
    );
    assert!(reader.begin().is_err());
}
