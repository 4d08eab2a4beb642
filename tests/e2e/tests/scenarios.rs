//! End-to-end scenarios: reinforcement, deterministic ranking, pronoun
//! routing, dual-write compensation, and consolidation idempotence.

use std::sync::Arc;

use elefante_core::{
    AddAction, AddMemoryInput, EngineConfig, GraphStore, HashEmbedder, IngestionPipeline,
    Layer, LocalGraphStore, LocalVectorStore, LockManager, MemoryFilter, Role, SearchOptions,
    Status, Sublayer, VectorStore,
};
use elefante_e2e_tests::{add, fresh_engine, FailingGraphStore, DIM};

// ============================================================================
// S1: REINFORCEMENT
// ============================================================================

#[tokio::test]
async fn s1_same_content_reinforces_instead_of_duplicating() {
    let (engine, _dir) = fresh_engine();

    let mut input = AddMemoryInput {
        content: "I prefer dark mode IDEs".to_string(),
        layer: Some(Layer::SelfLayer),
        sublayer: Some(Sublayer::Preference),
        ..Default::default()
    };
    let first = engine.add_memory(input.clone()).await.unwrap();
    assert_eq!(first.action, AddAction::Created);

    input.content = "I prefer dark mode IDEs".to_string();
    let second = engine.add_memory(input).await.unwrap();
    assert_eq!(second.action, AddAction::Reinforced);
    assert_eq!(second.id, first.id);

    let memory = engine.get_memory(&first.id).unwrap().unwrap();
    assert_eq!(memory.access_count, 2);

    // Exactly one record in each index
    let status = engine.status().unwrap();
    assert_eq!(status.counts.memories_total, 1);
    assert_eq!(status.counts.vector_records, 1);
}

// ============================================================================
// S2: DETERMINISTIC RANKING
// ============================================================================

#[tokio::test]
async fn s2_ranking_is_stable_across_repeated_calls() {
    let (engine, _dir) = fresh_engine();

    let mut pref = add(
        "dark mode coding preferences for my editor",
        "Self-Pref-DarkMode",
    );
    pref.layer = Some(Layer::SelfLayer);
    pref.sublayer = Some(Sublayer::Preference);
    engine.add_memory(pref).await.unwrap();

    engine
        .add_memory(add("python coding startup faster", "World-Fact-Python311"))
        .await
        .unwrap();

    let mut rule = add("never delete user preferences data", "Intent-Rule-NoDelete");
    rule.layer = Some(Layer::Intent);
    rule.sublayer = Some(Sublayer::Rule);
    engine.add_memory(rule).await.unwrap();

    let options = SearchOptions {
        limit: Some(3),
        ..Default::default()
    };
    let first = engine
        .search("coding preferences", &MemoryFilter::default(), &options)
        .await
        .unwrap();
    assert!(!first.results.is_empty());
    assert_eq!(first.results[0].memory.title, "Self-Pref-DarkMode");

    // Scores strictly non-increasing
    for pair in first.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // Order is stable across repeated identical calls
    let ids: Vec<String> = first.results.iter().map(|r| r.memory.id.clone()).collect();
    for _ in 0..3 {
        let again = engine
            .search("coding preferences", &MemoryFilter::default(), &options)
            .await
            .unwrap();
        let again_ids: Vec<String> =
            again.results.iter().map(|r| r.memory.id.clone()).collect();
        assert_eq!(again_ids, ids);
    }
}

// ============================================================================
// S3: PRONOUN ROUTING
// ============================================================================

#[tokio::test]
async fn s3_pronoun_queries_lean_on_session_context() {
    let (engine, _dir) = fresh_engine();
    let session = "sess-omega";

    engine
        .record_message(session, Role::User, "We discussed Project Omega.")
        .await
        .unwrap();

    // Two memories with near-identical content; one belongs to the session
    let mut in_session = add(
        "Project Omega decision notes from discussion",
        "ProjectOmega-Fact-Notes",
    );
    in_session.session_id = Some(session.to_string());
    let in_session_id = engine.add_memory(in_session).await.unwrap().id;

    let other = add(
        "Project Omega decision notes archive copy",
        "ProjectOmega-Fact-Archive",
    );
    engine.add_memory(other).await.unwrap();

    let options = SearchOptions {
        session_id: Some(session.to_string()),
        include_conversation: Some(true),
        ..Default::default()
    };
    let response = engine
        .search(
            "what did we say about it",
            &MemoryFilter::default(),
            &options,
        )
        .await
        .unwrap();

    // Pronoun signal pushes the conversation weight to at least 0.5
    assert!(response.plan.conversation_weight >= 0.5);

    // The session-attached memory outranks the equally similar outsider
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].memory.id, in_session_id);
    assert!(response.results[0].sub_scores.conversation.is_some());
}

// ============================================================================
// S5: DUAL-WRITE ATOMICITY
// ============================================================================

#[tokio::test]
async fn s5_failed_graph_write_compensates_vector_side() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = EngineConfig::with_data_dir(dir.path());
    config.embedding_dim = DIM;

    let vector = Arc::new(LocalVectorStore::open(&config.vector_dir(), DIM).unwrap());
    let graph_inner = LocalGraphStore::open(&config.graph_dir()).unwrap();
    let graph = Arc::new(FailingGraphStore::new(graph_inner, 1));
    let lock = LockManager::new(
        config.lock_path(),
        config.lock_stale(),
        config.lock_acquire_timeout(),
    );
    let pipeline = IngestionPipeline::new(
        config,
        Arc::new(HashEmbedder::new(DIM)),
        vector.clone(),
        graph.clone(),
        lock,
    );

    let result = pipeline.add_memory(AddMemoryInput {
        content: "x".to_string(),
        ..Default::default()
    });
    assert!(result.is_err(), "graph failure must fail the whole call");

    // Compensation removed the vector half; the graph half never landed
    let records = vector.get_all(0, 100).unwrap();
    assert!(records.iter().all(|r| r.content != "x"));
    assert!(graph
        .memories_with_status(Status::Active)
        .unwrap()
        .is_empty());

    // The injected failure is spent; the same input now commits to both sides
    let outcome = pipeline
        .add_memory(AddMemoryInput {
            content: "x".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert!(graph.memory(&outcome.id).unwrap().is_some());
    assert!(vector.get(&outcome.id).unwrap().is_some());
}

// ============================================================================
// S6: CONSOLIDATION IDEMPOTENCE
// ============================================================================

#[tokio::test]
async fn s6_consolidation_applied_twice_is_a_fixpoint() {
    let (engine, _dir) = fresh_engine();

    // Two colliding pairs and a singleton (force_new defeats ingest dedup)
    for (content, title) in [
        ("alpha version one", "Pair-A"),
        ("alpha version two", "Pair-A"),
        ("beta version one", "Pair-B"),
        ("beta version two", "Pair-B"),
        ("gamma standalone", "Single-C"),
    ] {
        let mut input = add(content, title);
        input.force_new = true;
        engine.add_memory(input).await.unwrap();
    }

    let first = engine.consolidate(true).await.unwrap();
    assert_eq!(first.stats.duplicates_collapsed, 2);

    let status = engine.status().unwrap();
    assert_eq!(status.counts.memories_active, 3);
    assert_eq!(status.counts.memories_redundant, 2);

    // Redundant memories carry a similar_to edge to their canonical
    let rows = engine
        .graph_query("SELECT COUNT(*) AS n FROM rel_similar_to", &[])
        .unwrap();
    assert_eq!(rows[0]["n"], serde_json::json!(2));

    // Applying again changes nothing
    let second = engine.consolidate(true).await.unwrap();
    assert!(second.actions.is_empty());
    let status_after = engine.status().unwrap();
    assert_eq!(status_after.counts.memories_active, 3);
    assert_eq!(status_after.counts.memories_redundant, 2);
}

// ============================================================================
// SEARCH SIDE-EFFECTS & BOUNDARIES
// ============================================================================

#[tokio::test]
async fn search_top_result_is_the_freshly_added_memory() {
    let (engine, _dir) = fresh_engine();
    let outcome = engine
        .add_memory(add("the moon has no atmosphere", "Moon-Fact-Atmosphere"))
        .await
        .unwrap();

    let response = engine
        .search(
            "moon atmosphere",
            &MemoryFilter::default(),
            &SearchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.results[0].memory.id, outcome.id);
}

#[tokio::test]
async fn min_similarity_one_excludes_partial_matches() {
    let (engine, _dir) = fresh_engine();
    engine
        .add_memory(add("tokio runtime internals", "Tokio-Fact-Runtime"))
        .await
        .unwrap();

    let strict = SearchOptions {
        min_similarity: Some(1.0),
        mode: Some(elefante_core::SearchMode::Semantic),
        ..Default::default()
    };
    let response = engine
        .search("completely unrelated words", &MemoryFilter::default(), &strict)
        .await
        .unwrap();
    assert!(response.results.is_empty());

    let permissive = SearchOptions {
        min_similarity: Some(0.0),
        mode: Some(elefante_core::SearchMode::Semantic),
        ..Default::default()
    };
    let response = engine
        .search("tokio runtime", &MemoryFilter::default(), &permissive)
        .await
        .unwrap();
    assert!(!response.results.is_empty());
}

#[tokio::test]
async fn filters_constrain_hybrid_results() {
    let (engine, _dir) = fresh_engine();
    let mut important = add("critical database migration steps", "DB-Method-Migrate");
    important.importance = Some(9);
    important.layer = Some(Layer::World);
    important.sublayer = Some(Sublayer::Method);
    engine.add_memory(important).await.unwrap();

    let mut trivial = add("database trivia about naming", "DB-Fact-Naming");
    trivial.importance = Some(2);
    engine.add_memory(trivial).await.unwrap();

    let filter = MemoryFilter {
        min_importance: Some(8),
        ..Default::default()
    };
    let response = engine
        .search("database", &filter, &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.title, "DB-Method-Migrate");
}
