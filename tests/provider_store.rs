use chrono::DateTime;
use hayrick::datatype::{DateTimeTz, Ref, Value};
use hayrick::error::Error;
use hayrick::persist::SqlStore;
use hayrick::provider::{HisRange, Provider};
use hayrick::{diff, zinc};

fn stamp(text: &str) -> DateTimeTz {
    DateTimeTz::from_parts(DateTime::parse_from_rfc3339(text).unwrap(), "UTC")
}

fn versioned_store() -> SqlStore {
    let store = SqlStore::in_memory("haystack").unwrap();
    let v1 = zinc::parse_grid(
        "ver:\"3.0\" v:\"1\"\nid,col,dis\n@id1,1,\"Dis 1\"\n@id2,2,\"Dis 2\"\n",
    )
    .unwrap();
    let v2 = zinc::parse_grid(
        "ver:\"3.0\" v:\"2\"\nid,col,dis\n@id1,3,\"Dis 1\"\n@id2,4,\"Dis 2\"\n",
    )
    .unwrap();
    let v3 = zinc::parse_grid(
        "ver:\"3.0\" v:\"last\"\nid,col,dis\n@id1,5,\"Dis 1\"\n@id2,6,\"Dis 2\"\n",
    )
    .unwrap();
    store.update_grid(&v1, &stamp("2020-10-01T00:00:01+00:00")).unwrap();
    store.update_grid(&v2, &stamp("2020-10-01T00:00:02+00:00")).unwrap();
    store.update_grid(&v3, &stamp("2020-10-01T00:00:03+00:00")).unwrap();
    store
}

#[test]
fn latest_read_sees_the_last_version() {
    let store = versioned_store();
    let grid = store.read(None, 0, None, None).unwrap();
    assert_eq!(grid.meta().get("v"), Some(&Value::str("last")));
    assert_eq!(grid.len(), 2);
}

#[test]
fn point_in_time_read_selects_that_version() {
    let store = versioned_store();
    let at = stamp("2020-10-01T00:00:02+00:00");
    let grid = store.read(None, 0, None, Some(&at)).unwrap();
    assert_eq!(grid.meta().get("v"), Some(&Value::str("2")));
    let row = grid.by_id(&Ref::new("id1")).unwrap();
    assert_eq!(row.get("col"), Some(&Value::number(3.0)));
}

#[test]
fn filtered_read_at_a_version() {
    let store = versioned_store();
    let at = stamp("2020-10-01T00:00:02+00:00");
    let grid = store.read(Some("id == @id1"), 0, None, Some(&at)).unwrap();
    assert_eq!(grid.len(), 1);
    assert_eq!(
        grid.row(0).unwrap().get("id"),
        Some(&Value::Ref(Ref::new("id1")))
    );
}

#[test]
fn versions_are_listed_newest_first() {
    let store = versioned_store();
    let versions = store.versions().unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions[0].to_utc() > versions[1].to_utc());
    assert!(versions[1].to_utc() > versions[2].to_utc());
}

#[test]
fn values_for_tag_are_distinct_and_ordered() {
    let store = versioned_store();
    let values = store.values_for_tag("dis").unwrap();
    assert_eq!(values, vec![Value::str("Dis 1"), Value::str("Dis 2")]);
    let ids = store.values_for_tag("id").unwrap();
    assert_eq!(ids.len(), 2);
}

#[test]
fn diff_marked_grids_patch_the_current_state() {
    let store = SqlStore::in_memory("haystack").unwrap();
    let left = zinc::parse_grid(
        "ver:\"3.0\"\nid,a,b\n@id1,1,2\n@id2,2,2\n@old,1,2\n",
    )
    .unwrap();
    let right = zinc::parse_grid("ver:\"3.0\"\nid,a,c\n@id1,3,5\n").unwrap();
    store.update_grid(&left, &stamp("2020-10-01T00:00:00+00:00")).unwrap();
    let patch = diff::diff(&left, &right);
    store.update_grid(&patch, &stamp("2020-10-01T00:01:00+00:00")).unwrap();

    let latest = store.read(None, 0, None, None).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(
        latest.row(0).unwrap().get("a"),
        Some(&Value::number(3.0))
    );
    let before = store
        .read(None, 0, None, Some(&stamp("2020-10-01T00:00:30+00:00")))
        .unwrap();
    assert_eq!(before.len(), 3);
}

#[test]
fn entities_without_ids_are_rejected() {
    let store = SqlStore::in_memory("haystack").unwrap();
    let grid = zinc::parse_grid("ver:\"3.0\"\ndis\n\"anonymous\"\n").unwrap();
    assert!(matches!(
        store.update_grid(&grid, &DateTimeTz::now()),
        Err(Error::Schema(_))
    ));
}

#[test]
fn point_writes_land_in_history() {
    let store = versioned_store();
    let id = Ref::new("id1");
    let ack = store
        .point_write(&id, 8, &Value::quantity(21.5, "°C"), "tester", None)
        .unwrap();
    assert_eq!(ack.level, 8);
    let history = store.his_read(&[id.clone()], &HisRange::default()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history.row(0).unwrap().get("val"),
        Some(&Value::quantity(21.5, "°C"))
    );
}

#[test]
fn his_read_respects_range_and_ids() {
    let store = versioned_store();
    let id = Ref::new("id1");
    let samples = vec![
        (stamp("2021-01-01T00:00:00+00:00"), Value::number(1.0)),
        (stamp("2021-01-02T00:00:00+00:00"), Value::number(2.0)),
        (stamp("2021-01-03T00:00:00+00:00"), Value::number(3.0)),
    ];
    store.his_write(&id, &samples).unwrap();
    store
        .his_write(&Ref::new("id2"), &[(stamp("2021-01-02T12:00:00+00:00"), Value::number(9.0))])
        .unwrap();

    let range = HisRange {
        start: Some(stamp("2021-01-02T00:00:00+00:00")),
        end: Some(stamp("2021-01-03T00:00:00+00:00")),
    };
    let history = store.his_read(&[id], &range).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.row(0).unwrap().get("val"), Some(&Value::number(2.0)));
}

#[test]
fn unimplemented_operations_answer_capability_errors() {
    let store = versioned_store();
    assert!(matches!(
        store.invoke_action(&Ref::new("id1"), "reset", &Default::default()),
        Err(Error::Capability("invokeAction"))
    ));
    let ops = store.ops();
    let names: Vec<_> = ops
        .rows()
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    assert!(names.contains(&"read"));
    assert!(names.contains(&"hisRead"));
    assert!(!names.contains(&"invokeAction"));
}

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let grid = zinc::parse_grid("ver:\"3.0\"\nid,dis\n@id1,\"kept\"\n").unwrap();
    {
        let store = SqlStore::open_path(&path, "haystack", "acme").unwrap();
        store
            .update_grid(&grid, &stamp("2020-10-01T00:00:00+00:00"))
            .unwrap();
    }
    let store = SqlStore::open_path(&path, "haystack", "acme").unwrap();
    let restored = store.read(None, 0, None, None).unwrap();
    assert_eq!(restored, grid);
}

#[test]
fn purge_empties_every_table() {
    let store = versioned_store();
    store.purge().unwrap();
    assert_eq!(store.read(None, 0, None, None).unwrap().len(), 0);
    assert!(store.versions().unwrap().is_empty());
}
