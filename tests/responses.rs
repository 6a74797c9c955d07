use std::collections::BTreeMap;

use ndarray::array;
use tempfile::TempDir;

use enstore::{Storage, StorageError};

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

#[test]
fn summary_frame_selects_requested_keys() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 3).unwrap();

    let summary_keys = keys(&["WOPR", "WBHP"]);
    let axis = [100, 200, 300];
    storage
        .save_summary_data(
            &array![[1.0, 2.0, 3.0], [10.0, 20.0, 30.0]],
            &summary_keys,
            &axis,
            0,
        )
        .unwrap();
    storage
        .save_summary_data(
            &array![[4.0, 5.0, 6.0], [40.0, 50.0, 60.0]],
            &summary_keys,
            &axis,
            2,
        )
        .unwrap();

    // Realization 1 never produced a summary; it is skipped, not padded in.
    let frame = storage
        .load_summary_data_as_df(&keys(&["WOPR"]), &[0, 1, 2])
        .unwrap();
    assert_eq!(frame.columns(), &[0, 2]);
    assert_eq!(frame.num_rows(), 3);
    assert_eq!(frame.get("WOPR", 200, 0), Some(2.0));
    assert_eq!(frame.get("WOPR", 300, 2), Some(6.0));
    // The dropped key must not appear in the row index.
    assert!(frame.index().iter().all(|(key, _)| key == "WOPR"));
}

#[test]
fn summary_axes_may_differ_per_realization() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();

    // Realization 0 carries three report steps, the restarted realization 1
    // only two. The first present realization supplies the reference axis.
    storage
        .save_summary_data(&array![[1.0, 2.0, 3.0]], &keys(&["WOPR"]), &[10, 20, 30], 0)
        .unwrap();
    storage
        .save_summary_data(&array![[7.0, 8.0]], &keys(&["WOPR"]), &[10, 20], 1)
        .unwrap();

    let frame = storage
        .load_summary_data_as_df(&keys(&["WOPR"]), &[0, 1])
        .unwrap();
    assert_eq!(frame.get("WOPR", 20, 1), Some(8.0));
    // The position realization 1 never reached is absent, not fabricated.
    assert!(frame.get("WOPR", 30, 1).unwrap().is_nan());
    assert_eq!(frame.get("WOPR", 30, 0), Some(3.0));
}

#[test]
fn summary_without_any_data_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();

    let err = storage
        .load_summary_data_as_df(&keys(&["WOPR"]), &[0, 1])
        .unwrap_err();
    assert!(err.is_not_found());

    // Containers exist but hold none of the requested keys.
    storage
        .save_summary_data(&array![[1.0]], &keys(&["WBHP"]), &[10], 0)
        .unwrap();
    let err = storage
        .load_summary_data_as_df(&keys(&["WOPR"]), &[0, 1])
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn gen_data_stacks_only_realizations_with_the_key() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 4).unwrap();

    storage
        .save_gen_data(
            &BTreeMap::from([("RFT".to_string(), vec![1.0, 2.0])]),
            0,
        )
        .unwrap();
    storage
        .save_gen_data(
            &BTreeMap::from([("OTHER".to_string(), vec![9.0])]),
            1,
        )
        .unwrap();
    storage
        .save_gen_data(
            &BTreeMap::from([("RFT".to_string(), vec![3.0, 4.0])]),
            3,
        )
        .unwrap();

    let (data, loaded) = storage.load_gen_data("RFT", &[0, 1, 2, 3]).unwrap();
    assert_eq!(loaded, vec![0, 3]);
    assert_eq!(data, array![[1.0, 3.0], [2.0, 4.0]]);
}

#[test]
fn gen_data_missing_key_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();

    storage
        .save_gen_data(
            &BTreeMap::from([("RFT".to_string(), vec![1.0])]),
            0,
        )
        .unwrap();

    let err = storage.load_gen_data("NOPE", &[0, 1]).unwrap_err();
    assert!(matches!(err, StorageError::KeyNotFound { .. }));
}

#[test]
fn gen_data_frame_concatenates_keys() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();

    storage
        .save_gen_data(
            &BTreeMap::from([
                ("RFT".to_string(), vec![1.0, 2.0]),
                ("WCT".to_string(), vec![5.0]),
            ]),
            0,
        )
        .unwrap();
    storage
        .save_gen_data(
            &BTreeMap::from([("RFT".to_string(), vec![3.0, 4.0])]),
            1,
        )
        .unwrap();

    let frame = storage
        .load_gen_data_as_df(&keys(&["RFT", "WCT"]), &[0, 1])
        .unwrap();
    assert_eq!(frame.columns(), &[0, 1]);
    assert_eq!(frame.get("RFT", 1, 1), Some(4.0));
    assert_eq!(frame.get("WCT", 0, 0), Some(5.0));
    // Realization 1 has no WCT: NaN, never zero.
    assert!(frame.get("WCT", 0, 1).unwrap().is_nan());
}
