//! Concurrent allocations on a file-backed database with several
//! connections.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dte_core::{DocumentType, Issuer, SystemClock};
use dte_db::{Database, DbConfig, SequenceAllocator};

const TASKS: u64 = 24;

fn branch() -> Issuer {
    Issuer {
        branch_id: "branch-1".into(),
        establishment_code: Some("M001".into()),
        pos_code: Some("P001".into()),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_distinct_and_consecutive() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("dte.db"))
        .max_connections(6)
        .busy_timeout(Duration::from_secs(5));
    let db = Database::new(config).await.unwrap();
    let allocator = Arc::new(SequenceAllocator::new(db.clone(), Arc::new(SystemClock)));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move {
                allocator
                    .allocate_next(&branch(), DocumentType::Invoice)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut sequences = BTreeSet::new();
    for handle in handles {
        let number = handle.await.unwrap();
        let sequence: u64 = number.tail().parse().unwrap();
        assert!(sequences.insert(sequence), "duplicate {number}");
    }

    let expected: BTreeSet<u64> = (1..=TASKS).collect();
    assert_eq!(sequences, expected);

    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_keys_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("dte.db")).max_connections(4))
        .await
        .unwrap();
    let allocator = Arc::new(SequenceAllocator::new(db.clone(), Arc::new(SystemClock)));

    let handles: Vec<_> = [DocumentType::Invoice, DocumentType::CreditNote]
        .into_iter()
        .flat_map(|t| std::iter::repeat(t).take(5))
        .map(|t| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.allocate_next(&branch(), t).await.unwrap() })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap());
    }

    for t in [DocumentType::Invoice, DocumentType::CreditNote] {
        let tails: BTreeSet<String> = numbers
            .iter()
            .filter(|n| n.document_type() == Some(t))
            .map(|n| n.tail().to_string())
            .collect();
        assert_eq!(tails.len(), 5);
        assert!(tails.contains("000000000000005"));
    }
}
