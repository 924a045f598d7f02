//! Integration tests for dead letter persistence across restarts

use script_gate::{DeadLetterQueue, Params};
use serde_json::{json, Value};

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.json");

    let (first, second) = {
        let dlq = DeadLetterQueue::open(&path).unwrap();
        let first = dlq
            .add_failed_operation("add-todo", params(json!({"title": "Buy milk"})), "timeout", 3)
            .unwrap();
        let second = dlq
            .add_failed_operation("delete-project", params(json!({"id": "p1"})), "locked", 3)
            .unwrap();
        (first, second)
    };

    let reopened = DeadLetterQueue::open(&path).unwrap();
    let entries = reopened.entries();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first);
    assert_eq!(entries[0].operation, "add-todo");
    assert_eq!(entries[0].params, params(json!({"title": "Buy milk"})));
    assert_eq!(entries[0].error, "timeout");
    assert_eq!(entries[1].id, second);
    assert_eq!(entries[1].error, "locked");
}

#[test]
fn test_replay_outcome_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.json");

    {
        let dlq = DeadLetterQueue::open(&path).unwrap();
        dlq.add_failed_operation("add-todo", Params::new(), "timeout", 3)
            .unwrap();
        dlq.add_failed_operation("update-todo", Params::new(), "timeout", 3)
            .unwrap();

        let report = dlq
            .retry_all(|entry| {
                if entry.operation == "add-todo" {
                    Ok(())
                } else {
                    Err("still failing".to_string())
                }
            });

        assert_eq!(report.retried, 2);
        assert_eq!(report.failed, 1);
        assert!(report.file_error.is_none());
    }

    let reopened = DeadLetterQueue::open(&path).unwrap();
    let entries = reopened.entries();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "update-todo");
    assert_eq!(entries[0].attempts, 4);
    assert_eq!(entries[0].error, "still failing");
}

#[test]
fn test_file_format_is_plain_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.json");

    let dlq = DeadLetterQueue::open(&path).unwrap();
    dlq.add_failed_operation("add-todo", params(json!({"when": "today"})), "timeout", 3)
        .unwrap();

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let array = raw.as_array().unwrap();
    assert_eq!(array.len(), 1);

    let entry = &array[0];
    for field in ["id", "operation", "params", "error", "attempts", "timestamp", "added_at"] {
        assert!(entry.get(field).is_some(), "missing field {}", field);
    }
    assert_eq!(entry["params"]["when"], "today");
}

#[test]
fn test_hand_written_file_without_ids_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.json");
    std::fs::write(
        &path,
        r#"[{"operation": "add-todo", "params": {"title": "x"}, "error": "timeout",
            "attempts": 3, "timestamp": 1700000000.5, "added_at": "2023-11-14 22:13:20"}]"#,
    )
    .unwrap();

    let dlq = DeadLetterQueue::open(&path).unwrap();

    assert_eq!(dlq.len(), 1);
    let id = dlq.entries()[0].id;
    assert!(dlq.remove(id).unwrap().is_some());
    assert!(DeadLetterQueue::open(&path).unwrap().is_empty());
}
