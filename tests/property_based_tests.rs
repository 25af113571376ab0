//! Property-Based Tests for Job Lifecycles and Table Extraction
//!
//! These tests check invariants that must hold for any input: job statuses
//! only move forward, and extraction returns exactly the requested tables
//! that a dump contains, in dump order.

use chrono::Utc;
use proptest::prelude::*;

use dumpvault::{BackupKind, BackupStatus, JobStore, VaultError};
use dumpvault_core::{DatabaseName, JobTransition, NewBackupJob};
use dumpvault_engine::extract_blocks;
use dumpvault_store::InMemoryStore;
use dumpvault_testing::{DumpFixture, TableFixture};

fn transition_strategy() -> impl Strategy<Value = JobTransition> {
    prop_oneof![
        Just(JobTransition::Start),
        (0u64..1_000_000).prop_map(|file_size| JobTransition::Complete { file_size }),
        "[a-z ]{1,24}".prop_map(|error| JobTransition::Fail { error }),
    ]
}

fn rank(status: BackupStatus) -> u8 {
    match status {
        BackupStatus::Pending => 0,
        BackupStatus::Running => 1,
        BackupStatus::Completed | BackupStatus::Failed => 2,
    }
}

// Distinct table names, in the order the dump will hold them.
fn table_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{2,8}", 1..8)
        .prop_map(|names| names.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn dump_of(tables: &[String]) -> String {
    tables
        .iter()
        .fold(DumpFixture::new("shopdb"), |dump, name| {
            dump.with_table(
                TableFixture::new(name.clone(), ["`id` int NOT NULL", "PRIMARY KEY (`id`)"])
                    .with_row("(1)")
                    .with_row("(2)"),
            )
        })
        .render(&[])
}

proptest! {
    /// Property: a job's status never moves backwards and terminal states
    /// are final, whatever transitions are attempted
    #[test]
    fn prop_job_status_is_monotonic(
        transitions in prop::collection::vec(transition_strategy(), 1..12)
    ) {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let job = store
                .insert_job(
                    NewBackupJob {
                        database: DatabaseName::new_unchecked("shopdb"),
                        kind: BackupKind::FullManual,
                        tables: Vec::new(),
                        file_path: "/var/backups/shopdb.sql.gz".into(),
                    },
                    Utc::now(),
                )
                .await
                .expect("insert should succeed");
            let mut current = job.status;

            for transition in transitions {
                let target = transition.target();
                match store.transition(job.id, transition, Utc::now()).await {
                    Ok(updated) => {
                        prop_assert!(current.can_transition_to(target));
                        prop_assert!(rank(updated.status) > rank(current));
                        prop_assert_eq!(updated.completed_at.is_some(), updated.status.is_terminal());
                        current = updated.status;
                    }
                    Err(err) => {
                        prop_assert!(matches!(err, VaultError::Validation(_)));
                        prop_assert!(!current.can_transition_to(target));
                    }
                }
                let stored = store.get_job(job.id).await.expect("get").expect("row");
                prop_assert_eq!(stored.status, current);
            }
            Ok(())
        })?;
    }

    /// Property: extraction finds exactly the requested tables present in
    /// the dump, reports them in dump order and emits nothing else
    #[test]
    fn prop_extraction_selects_requested_tables(
        (present, requested) in table_names_strategy().prop_flat_map(|present| {
            let pool = present.clone();
            (
                Just(present),
                prop::collection::vec(
                    prop_oneof![
                        prop::sample::select(pool).boxed(),
                        "[a-z]{9,12}".boxed(),
                    ],
                    1..6,
                ),
            )
        })
    ) {
        let dump = dump_of(&present);
        let out = extract_blocks(dump.as_bytes().split_inclusive(|b| *b == b'\n'), requested.as_slice());

        let expected: Vec<String> = present
            .iter()
            .filter(|name| requested.contains(name))
            .cloned()
            .collect();
        prop_assert_eq!(&out.tables, &expected);

        let sql = String::from_utf8(out.sql).expect("fixture dumps are UTF-8");
        for name in &present {
            let quoted = format!("`{name}`");
            prop_assert_eq!(sql.contains(&quoted), expected.contains(name), "table {}", name);
        }
        prop_assert!(!sql.contains("Dump completed"));
    }
}
