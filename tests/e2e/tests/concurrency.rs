//! Multi-handle interleaving over one data directory.
//!
//! Two engine instances stand in for two agent processes sharing
//! `~/.elefante/data`: writes interleave through the lock protocol, and an
//! ingestion committed before a read begins is visible to that read.

use elefante_core::{MemoryFilter, SearchOptions};
use elefante_e2e_tests::{add, engine_at, fresh_engine};

#[tokio::test]
async fn interleaved_writes_from_two_handles_both_commit() {
    let (engine_a, dir) = fresh_engine();
    let engine_b = engine_at(&dir);

    engine_a
        .add_memory(add("alpha written by handle a", "A-Fact-Alpha"))
        .await
        .unwrap();
    engine_b
        .add_memory(add("beta written by handle b", "B-Fact-Beta"))
        .await
        .unwrap();
    engine_a
        .add_memory(add("gamma written by handle a", "A-Fact-Gamma"))
        .await
        .unwrap();

    let status = engine_b.status().unwrap();
    assert_eq!(status.counts.memories_active, 3);
    assert_eq!(status.counts.vector_records, 3);
}

#[tokio::test]
async fn committed_writes_are_visible_to_the_other_handle() {
    let (engine_a, dir) = fresh_engine();
    let engine_b = engine_at(&dir);

    // Committed by A strictly before B's read begins
    let outcome = engine_a
        .add_memory(add("cross handle visibility probe", "Visible-Fact-One"))
        .await
        .unwrap();

    let response = engine_b
        .search(
            "visibility probe",
            &MemoryFilter::default(),
            &SearchOptions::default(),
        )
        .await
        .unwrap();
    assert!(response.results.iter().any(|r| r.memory.id == outcome.id));

    // And the graph side agrees
    assert!(engine_b.get_memory(&outcome.id).unwrap().is_some());
}

#[tokio::test]
async fn reinforcement_deduplicates_across_handles() {
    let (engine_a, dir) = fresh_engine();
    let engine_b = engine_at(&dir);

    let first = engine_a
        .add_memory(add("shared observation", "Shared-Fact-One"))
        .await
        .unwrap();
    let second = engine_b
        .add_memory(add("shared observation", "Shared-Fact-One"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let memory = engine_a.get_memory(&first.id).unwrap().unwrap();
    assert_eq!(memory.access_count, 2);

    let status = engine_a.status().unwrap();
    assert_eq!(status.counts.memories_total, 1);
}

#[tokio::test]
async fn concurrent_ingestions_serialize_through_the_lock() {
    let (engine_a, dir) = fresh_engine();
    let engine_b = engine_at(&dir);

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = if i % 2 == 0 {
            engine_a.clone()
        } else {
            engine_b.clone()
        };
        handles.push(tokio::spawn(async move {
            engine
                .add_memory(add(
                    &format!("parallel write number {}", i),
                    &format!("Parallel-Fact-{}", i),
                ))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let status = engine_a.status().unwrap();
    assert_eq!(status.counts.memories_active, 4);
    assert_eq!(status.counts.vector_records, 4);
}
