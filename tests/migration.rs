use std::{collections::BTreeMap, fs, path::Path};

use tempfile::TempDir;
use uuid::Uuid;
use walkdir::WalkDir;

use enstore::migration::{migrate, read_version, MigrationError, CURRENT_VERSION};

const EXPERIMENT_ID: &str = "0d52f62a-6b67-403a-ac1b-0ed22b964ec3";

fn build_v1_root(root: &Path) {
    let experiment = root.join("experiments").join(EXPERIMENT_ID);
    fs::create_dir_all(&experiment).unwrap();
    fs::write(
        experiment.join("parameter.json"),
        r#"{
            "PARAM": {"template_file_path": "/tmp/x", "forward_init": false},
            "PORO": {"update": false}
        }"#,
    )
    .unwrap();
    fs::write(
        experiment.join("responses.json"),
        r#"{
            "summary": {"kind": "summary", "keys": []},
            "monitored": {"kind": "summary", "keys": ["WOPR"]},
            "rft": {"kind": "gen_data", "report_steps": [1]}
        }"#,
    )
    .unwrap();

    // Legacy split per-realization layout under one mount point.
    let mount = root.join("ensembles").join("ens-a");
    fs::create_dir_all(mount.join("summary-0")).unwrap();
    fs::write(mount.join("summary-0/summary.earr"), b"summary bytes").unwrap();
    fs::create_dir_all(mount.join("gen-data-0")).unwrap();
    fs::write(mount.join("gen-data-0/gen-data.earr"), b"gen-data bytes").unwrap();
    fs::create_dir_all(mount.join("field-1")).unwrap();
    fs::write(mount.join("field-1/PORO.f64"), b"field bytes").unwrap();
}

fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string();
            files.insert(relative, fs::read(entry.path()).unwrap());
        }
    }
    files
}

#[test]
fn migrates_layout_and_metadata() {
    let tmp = TempDir::new().unwrap();
    build_v1_root(tmp.path());

    migrate(tmp.path()).unwrap();
    assert_eq!(read_version(tmp.path()).unwrap(), CURRENT_VERSION);

    // Split layout consolidated into realization directories.
    let mount = tmp.path().join("ensembles/ens-a");
    assert!(mount.join("realization-0/summary.earr").exists());
    assert!(mount.join("realization-0/gen-data.earr").exists());
    assert!(mount.join("realization-1/PORO.f64").exists());
    assert!(!mount.join("summary-0").exists());
    assert!(!mount.join("field-1").exists());

    // Parameter metadata rewritten.
    let experiment = tmp.path().join("experiments").join(EXPERIMENT_ID);
    let parameters: serde_json::Value =
        serde_json::from_slice(&fs::read(experiment.join("parameter.json")).unwrap()).unwrap();
    let param = &parameters["PARAM"];
    assert!(param.get("template_file_path").is_none());
    assert_eq!(param["update"], serde_json::json!(true));
    assert_eq!(param["name"], serde_json::json!("default"));
    // An existing update flag is preserved, not overwritten.
    assert_eq!(parameters["PORO"]["update"], serde_json::json!(false));

    // Identity regenerated from the directory name.
    let identity: serde_json::Value =
        serde_json::from_slice(&fs::read(experiment.join("index.json")).unwrap()).unwrap();
    assert_eq!(
        identity["id"].as_str().map(|s| Uuid::parse_str(s).unwrap()),
        Some(Uuid::parse_str(EXPERIMENT_ID).unwrap())
    );

    // Empty summary response entries pruned, others kept.
    let responses: serde_json::Value =
        serde_json::from_slice(&fs::read(experiment.join("responses.json")).unwrap()).unwrap();
    assert!(responses.get("summary").is_none());
    assert!(responses.get("monitored").is_some());
    assert!(responses.get("rft").is_some());
}

#[test]
fn migration_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    build_v1_root(tmp.path());

    migrate(tmp.path()).unwrap();
    let first = snapshot(tmp.path());
    migrate(tmp.path()).unwrap();
    let second = snapshot(tmp.path());
    assert_eq!(first, second);
}

#[test]
fn malformed_metadata_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let experiment = tmp.path().join("experiments").join(EXPERIMENT_ID);
    fs::create_dir_all(&experiment).unwrap();
    fs::write(experiment.join("parameter.json"), b"{not json").unwrap();

    let err = migrate(tmp.path()).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidMetadata { .. }));
}

#[test]
fn non_uuid_experiment_directory_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let experiment = tmp.path().join("experiments/not-an-id");
    fs::create_dir_all(&experiment).unwrap();
    fs::write(experiment.join("parameter.json"), b"{}").unwrap();

    let err = migrate(tmp.path()).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidIdentity(_)));
}
