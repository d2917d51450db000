//! Conflict resolution between a local and a remote snapshot.
//!
//! Last-write-wins per record with remote preference on exact timestamp
//! ties. Deletions are enforced through the local tombstone arrays only:
//! remote tombstones are merged into the output for persistence and upload
//! but take effect on the *next* cycle, once they have become local. That
//! makes cross-device deletions eventually consistent rather than
//! single-pass consistent, and mirrors how deployed devices behave.

use std::collections::{BTreeMap, HashMap};

use crate::models::{Collection, Record, RecordId, SnapshotData, Tombstone};

/// Deterministically compute one winning snapshot from a local and a remote
/// snapshot. Pure: identical inputs always produce identical output, with
/// records id-ordered per collection.
#[must_use]
pub fn resolve_conflicts(local: &SnapshotData, remote: &SnapshotData) -> SnapshotData {
    let mut merged = SnapshotData::default();

    for collection in Collection::ALL {
        let tombstones = if collection.supports_deletion() {
            tombstone_index(local.tombstones(collection))
        } else {
            HashMap::new()
        };
        merged.set_records(
            collection,
            merge_collection(
                local.records(collection),
                remote.records(collection),
                &tombstones,
            ),
        );
    }

    for collection in Collection::DELETABLE {
        merged.set_tombstones(
            collection,
            merge_tombstones(local.tombstones(collection), remote.tombstones(collection)),
        );
    }

    merged
}

/// Union two tombstone arrays by id, keeping the maximum `deleted_at` per
/// id. Deletion times never decrease across repeated merges.
#[must_use]
pub fn merge_tombstones(local: &[Tombstone], remote: &[Tombstone]) -> Vec<Tombstone> {
    let mut merged: BTreeMap<RecordId, i64> = BTreeMap::new();
    for tombstone in local.iter().chain(remote) {
        let deleted_at = merged.entry(tombstone.id.clone()).or_insert(tombstone.deleted_at);
        *deleted_at = (*deleted_at).max(tombstone.deleted_at);
    }
    merged
        .into_iter()
        .map(|(id, deleted_at)| Tombstone { id, deleted_at })
        .collect()
}

fn tombstone_index(tombstones: &[Tombstone]) -> HashMap<&RecordId, i64> {
    let mut index = HashMap::new();
    for tombstone in tombstones {
        let deleted_at = index.entry(&tombstone.id).or_insert(tombstone.deleted_at);
        *deleted_at = (*deleted_at).max(tombstone.deleted_at);
    }
    index
}

fn merge_collection(
    local: &[Record],
    remote: &[Record],
    tombstones: &HashMap<&RecordId, i64>,
) -> Vec<Record> {
    let mut winners: BTreeMap<RecordId, Record> = BTreeMap::new();

    // Remote seeds the map; records at or before their deletion time stay dead.
    for record in remote {
        if is_deleted(record, tombstones) {
            continue;
        }
        winners.insert(record.id.clone(), record.clone());
    }

    // Local overlay: a local record replaces the seeded entry only when
    // strictly newer; ties keep the remote version.
    for record in local {
        match winners.get(&record.id) {
            Some(existing) if record.effective_timestamp() <= existing.effective_timestamp() => {}
            _ => {
                winners.insert(record.id.clone(), record.clone());
            }
        }
    }

    // Second pass over the assembled result: only records strictly newer
    // than their tombstone survive.
    winners
        .into_values()
        .filter(|record| !is_deleted(record, tombstones))
        .collect()
}

fn is_deleted(record: &Record, tombstones: &HashMap<&RecordId, i64>) -> bool {
    tombstones
        .get(&record.id)
        .is_some_and(|deleted_at| record.effective_timestamp() <= *deleted_at)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn task(id: &str, timestamp: i64, description: &str) -> Record {
        Record::new(id)
            .with("timestamp", timestamp)
            .with("description", description)
    }

    fn snapshot_with_tasks(tasks: Vec<Record>) -> SnapshotData {
        SnapshotData {
            tasks,
            ..SnapshotData::default()
        }
    }

    #[test]
    fn newer_local_record_wins() {
        let local = snapshot_with_tasks(vec![task("1", 2000, "local edit")]);
        let remote = snapshot_with_tasks(vec![task("1", 1000, "remote edit")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 2000, "local edit")]);
    }

    #[test]
    fn newer_remote_record_wins() {
        let local = snapshot_with_tasks(vec![task("1", 1000, "local edit")]);
        let remote = snapshot_with_tasks(vec![task("1", 2000, "remote edit")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 2000, "remote edit")]);
    }

    #[test]
    fn exact_tie_keeps_the_remote_version() {
        let local = snapshot_with_tasks(vec![task("1", 1500, "local edit")]);
        let remote = snapshot_with_tasks(vec![task("1", 1500, "remote edit")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 1500, "remote edit")]);
    }

    #[test]
    fn disjoint_records_union() {
        let local = snapshot_with_tasks(vec![task("a", 100, "mine")]);
        let remote = snapshot_with_tasks(vec![task("b", 200, "theirs")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(
            merged.tasks,
            vec![task("a", 100, "mine"), task("b", 200, "theirs")]
        );
    }

    #[test]
    fn tombstone_suppresses_older_remote_record() {
        let local = SnapshotData {
            deleted_notes: vec![Tombstone::new("5", 1_700_000_000_000)],
            ..SnapshotData::default()
        };
        let remote = SnapshotData {
            notes: vec![Record::new("5")
                .with("content", "old")
                .with("timestamp", 1_699_999_999_000_i64)],
            ..SnapshotData::default()
        };

        let merged = resolve_conflicts(&local, &remote);
        assert!(merged.notes.is_empty());
    }

    #[test]
    fn tombstone_suppresses_record_with_equal_timestamp() {
        let local = SnapshotData {
            deleted_tasks: vec![Tombstone::new("1", 1000)],
            ..SnapshotData::default()
        };
        let remote = snapshot_with_tasks(vec![task("1", 1000, "same instant")]);

        let merged = resolve_conflicts(&local, &remote);
        assert!(merged.tasks.is_empty());
    }

    #[test]
    fn strictly_newer_record_is_resurrected() {
        let local = SnapshotData {
            deleted_tasks: vec![Tombstone::new("1", 1000)],
            ..SnapshotData::default()
        };
        let remote = snapshot_with_tasks(vec![task("1", 1001, "recreated")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 1001, "recreated")]);
    }

    #[test]
    fn local_record_older_than_its_own_tombstone_is_dropped() {
        let local = SnapshotData {
            tasks: vec![task("1", 900, "stale local copy")],
            deleted_tasks: vec![Tombstone::new("1", 1000)],
            ..SnapshotData::default()
        };
        let remote = SnapshotData::default();

        let merged = resolve_conflicts(&local, &remote);
        assert!(merged.tasks.is_empty());
    }

    #[test]
    fn remote_only_tombstones_do_not_filter_this_pass() {
        // A deletion that has only ever lived in the remote payload merges
        // into the output tombstones but does not suppress records until the
        // next cycle, when it has become local.
        let local = snapshot_with_tasks(vec![task("1", 500, "still here")]);
        let remote = SnapshotData {
            deleted_tasks: vec![Tombstone::new("1", 1000)],
            ..SnapshotData::default()
        };

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 500, "still here")]);
        assert_eq!(merged.deleted_tasks, vec![Tombstone::new("1", 1000)]);

        // Next cycle: the merged tombstones are now local, and the record dies.
        let next_local = SnapshotData {
            tasks: merged.tasks.clone(),
            deleted_tasks: merged.deleted_tasks.clone(),
            ..SnapshotData::default()
        };
        let next = resolve_conflicts(&next_local, &merged);
        assert!(next.tasks.is_empty());
    }

    #[test]
    fn non_deletable_collections_skip_tombstone_filtering() {
        // Tombstones only exist for tasks/notes/lists; a conversation with
        // an id matching a task tombstone is untouched.
        let local = SnapshotData {
            conversations: vec![Record::new("1").with("timestamp", 500)],
            deleted_tasks: vec![Tombstone::new("1", 1000)],
            ..SnapshotData::default()
        };
        let remote = SnapshotData::default();

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.conversations.len(), 1);
    }

    #[test]
    fn records_without_timestamps_lose_conflicts() {
        let local = snapshot_with_tasks(vec![Record::new("1").with("description", "no clock")]);
        let remote = snapshot_with_tasks(vec![task("1", 1, "has clock")]);

        let merged = resolve_conflicts(&local, &remote);
        assert_eq!(merged.tasks, vec![task("1", 1, "has clock")]);
    }

    #[test]
    fn merge_is_deterministic() {
        let local = SnapshotData {
            tasks: vec![task("b", 100, "b"), task("a", 300, "a")],
            notes: vec![Record::new("n1").with("timestamp", 50)],
            deleted_tasks: vec![Tombstone::new("c", 900)],
            ..SnapshotData::default()
        };
        let remote = SnapshotData {
            tasks: vec![task("a", 200, "a-remote"), task("c", 800, "dead")],
            ..SnapshotData::default()
        };

        let first = resolve_conflicts(&local, &remote);
        let second = resolve_conflicts(&local, &remote);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn merge_tombstones_unions_by_max_deleted_at() {
        let local = vec![Tombstone::new("a", 100), Tombstone::new("b", 500)];
        let remote = vec![Tombstone::new("a", 300), Tombstone::new("c", 50)];

        let merged = merge_tombstones(&local, &remote);
        assert_eq!(
            merged,
            vec![
                Tombstone::new("a", 300),
                Tombstone::new("b", 500),
                Tombstone::new("c", 50),
            ]
        );
    }

    #[test]
    fn merge_tombstones_never_decreases() {
        let mut current = vec![Tombstone::new("a", 400)];
        for round in [vec![Tombstone::new("a", 100)], vec![], vec![Tombstone::new("a", 250)]] {
            current = merge_tombstones(&current, &round);
            assert_eq!(current, vec![Tombstone::new("a", 400)]);
        }
    }

    #[test]
    fn two_devices_converge_regardless_of_sync_order() {
        // Shared base, then disjoint edits on each device.
        let base = snapshot_with_tasks(vec![task("shared", 100, "base")]);

        let device_a = SnapshotData {
            tasks: vec![task("shared", 100, "base"), task("a1", 200, "from A")],
            ..SnapshotData::default()
        };
        let device_b = SnapshotData {
            tasks: vec![task("shared", 100, "base"), task("b1", 300, "from B")],
            ..SnapshotData::default()
        };

        // Order 1: A syncs against the base remote, then B against A's upload.
        let remote_after_a = resolve_conflicts(&device_a, &base);
        let final_one = resolve_conflicts(&device_b, &remote_after_a);

        // Order 2: B first, then A.
        let remote_after_b = resolve_conflicts(&device_b, &base);
        let final_two = resolve_conflicts(&device_a, &remote_after_b);

        assert!(final_one.equivalent(&final_two));
        assert_eq!(final_one.tasks.len(), 3);
    }
}
