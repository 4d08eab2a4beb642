//! Lock-file protocol scenarios: steal after crash, contention, holder
//! reporting.

use std::time::{Duration, Instant};

use elefante_core::{EngineError, LockHolder, LockManager, MemoryFilter, SearchOptions};
use elefante_e2e_tests::{add, engine_at, fresh_engine, test_config};

fn write_lock_file(dir: &tempfile::TempDir, holder: &LockHolder) {
    std::fs::write(
        dir.path().join("write.lock"),
        serde_json::to_string(holder).unwrap(),
    )
    .unwrap();
}

// ============================================================================
// S4: STEAL AFTER CRASH
// ============================================================================

#[tokio::test]
async fn s4_stale_lock_from_crashed_process_is_stolen() {
    let (engine, dir) = fresh_engine();

    // A crashed process left a 60-second-old lock record behind. The pid is
    // our own (alive), so only the stale timestamp makes it reclaimable.
    let stale = LockHolder {
        pid: std::process::id(),
        host: "localhost".to_string(),
        ts_ms: chrono::Utc::now().timestamp_millis() - 60_000,
        token: "crashed-holder".to_string(),
    };
    write_lock_file(&dir, &stale);

    let started = Instant::now();
    let outcome = engine
        .add_memory(add("written after the steal", "Steal-Fact-One"))
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "steal must complete within a second"
    );

    // The insert committed and the transaction-scoped lock was released
    assert!(engine.get_memory(&outcome.id).unwrap().is_some());
    assert!(!dir.path().join("write.lock").exists());
}

#[tokio::test]
async fn dead_pid_is_stolen_regardless_of_timestamp() {
    let (engine, dir) = fresh_engine();

    let dead = LockHolder {
        pid: u32::MAX - 1,
        host: "localhost".to_string(),
        ts_ms: chrono::Utc::now().timestamp_millis(), // perfectly fresh
        token: "dead-holder".to_string(),
    };
    write_lock_file(&dir, &dead);

    let outcome = engine
        .add_memory(add("dead holders do not block", "Steal-Fact-Two"))
        .await
        .unwrap();
    assert!(engine.get_memory(&outcome.id).unwrap().is_some());
}

// ============================================================================
// CONTENTION & HOLDER REPORTING
// ============================================================================

#[tokio::test]
async fn live_fresh_holder_blocks_ingestion_with_holder_info() {
    let (engine, dir) = fresh_engine();

    // Hold the lock ourselves through a second manager handle
    let config = test_config(&dir);
    let manager = LockManager::new(
        config.lock_path(),
        config.lock_stale(),
        Duration::from_millis(200),
    );
    let guard = manager.acquire().unwrap();

    let mut input = add("should not commit", "Blocked-Fact-One");
    input.deadline_ms = Some(5_000);
    let result = engine.add_memory(input).await;
    match result {
        Err(EngineError::LockUnavailable { holder }) => {
            assert_eq!(holder.pid, std::process::id());
            assert!(!holder.token.is_empty());
        }
        other => panic!("expected LockUnavailable, got {:?}", other.map(|o| o.action)),
    }
    drop(guard);
}

#[tokio::test]
async fn read_path_never_waits_on_the_lock() {
    let (engine, dir) = fresh_engine();
    engine
        .add_memory(add("readable under contention", "Read-Fact-One"))
        .await
        .unwrap();

    let config = test_config(&dir);
    let manager = LockManager::new(
        config.lock_path(),
        config.lock_stale(),
        config.lock_acquire_timeout(),
    );
    let guard = manager.acquire().unwrap();

    // Retrieval succeeds while the write lock is held by someone else
    let response = engine
        .search(
            "readable contention",
            &MemoryFilter::default(),
            &SearchOptions::default(),
        )
        .await
        .unwrap();
    assert!(!response.results.is_empty());

    let status = engine.status().unwrap();
    assert!(status.locked);
    assert_eq!(status.holder.unwrap().pid, std::process::id());
    drop(guard);
}

#[tokio::test]
async fn lock_released_between_transactions() {
    let (engine, dir) = fresh_engine();

    engine.add_memory(add("first", "Txn-Fact-One")).await.unwrap();
    assert!(!dir.path().join("write.lock").exists());

    engine.add_memory(add("second", "Txn-Fact-Two")).await.unwrap();
    assert!(!dir.path().join("write.lock").exists());

    // A second engine handle over the same directory can write immediately
    let other = engine_at(&dir);
    other.add_memory(add("third", "Txn-Fact-Three")).await.unwrap();
}
