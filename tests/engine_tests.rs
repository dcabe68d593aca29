//! Index engine properties over real collections
//!
//! Covers the identity, removal, monotonic-changes and idempotence properties,
//! bad requests, bootstrap failure recovery and warm catch-up.

mod common;

use std::sync::Arc;

use common::*;
use serverless_knn::collection::{Collection, MemoryCollection, TableCollection};
use serverless_knn::config::EngineConfig;
use serverless_knn::engine::EngineState;
use serverless_knn::handler::{Envelope, KnnRequest, RequestHandler};
use serverless_knn::index::DistanceMetric;
use serverless_knn::storage::mock::{MockStorageConfig, MockTableStorage};
use serverless_knn::storage::TableStorage;
use serverless_knn::{ChangeRecord, KnnEngine, KnnError, LabeledVector};

const DIMS: usize = 16;

fn seeded_batch(count: u64) -> Vec<LabeledVector> {
    (0..count)
        .map(|label| LabeledVector::new(label, seeded_vector(DIMS, label)))
        .collect()
}

async fn table_collection(name: &str) -> (Arc<MockTableStorage>, Arc<TableCollection>) {
    let storage = Arc::new(MockTableStorage::new(MockStorageConfig::fast()));
    storage.create_table(name).await.unwrap();
    let collection = Arc::new(TableCollection::new(name, DIMS, storage.clone()));
    (storage, collection)
}

#[tokio::test]
async fn test_identity_property() {
    let collection = Arc::new(MemoryCollection::new("db-identity", DIMS));
    let vectors = seeded_batch(200);
    collection.add(vectors.clone()).await.unwrap();

    let engine = KnnEngine::new(collection, EngineConfig::default());
    for item in vectors.iter().step_by(7) {
        let result = engine.search(&item.vector, 1).await.unwrap();
        assert_eq!(result.neighbors, vec![item.label]);
        assert_eq!(result.distances, vec![0.0]);
    }
}

#[tokio::test]
async fn test_identity_property_cosine_flat() {
    let collection = Arc::new(MemoryCollection::new("db-cosine", DIMS));
    let vectors = seeded_batch(50);
    collection.add(vectors.clone()).await.unwrap();

    let config = EngineConfig {
        metric: DistanceMetric::Cosine,
        index_type: "flat".to_string(),
        ..EngineConfig::default()
    };
    let engine = KnnEngine::new(collection, config);

    let result = engine.search(&vectors[12].vector, 3).await.unwrap();
    assert_eq!(result.neighbors[0], 12);
    assert!(result.distances[0].abs() < 1e-5);
    assert_eq!(engine.stats().index_type.as_deref(), Some("Flat"));
}

#[tokio::test]
async fn test_removed_label_never_returned() {
    let (_storage, collection) = table_collection("db-remove").await;
    let vectors = seeded_batch(30);
    collection.add_at(vectors.clone(), 100).await.unwrap();
    collection.remove_at(&[5], 200).await.unwrap();

    // Cold bootstrap skips the tombstone
    let engine = KnnEngine::new(collection.clone(), EngineConfig::default());
    let result = engine.search(&vectors[5].vector, 30).await.unwrap();
    assert_eq!(result.neighbors.len(), 29);
    assert!(!result.neighbors.contains(&5));

    // The tombstone is still reported to readers catching up
    let changes = collection.changes_after(100).await.unwrap();
    assert_eq!(changes, vec![ChangeRecord::tombstone(5, 200)]);

    // Warm removal through an update batch
    engine
        .update(&[ChangeRecord::tombstone(6, 300)])
        .await
        .unwrap();
    let result = engine.search(&vectors[6].vector, 30).await.unwrap();
    assert!(!result.neighbors.contains(&6));
    assert_eq!(result.neighbors.len(), 28);
}

#[tokio::test]
async fn test_changes_after_is_monotonic() {
    let (_storage, table) = table_collection("db-monotonic").await;
    let memory = Arc::new(MemoryCollection::new("db-monotonic", DIMS));
    let collections = vec![table as Arc<dyn Collection>, memory as Arc<dyn Collection>];

    for collection in collections {
        for (i, item) in seeded_batch(10).into_iter().enumerate() {
            collection.add_at(vec![item], 10 * i as i64).await.unwrap();
        }
        collection.remove_at(&[2, 4], 45).await.unwrap();

        for t1 in [-1, 0, 15, 40, 45] {
            for t2 in [t1 + 1, t1 + 20, 100] {
                let earlier = collection.changes_after(t1).await.unwrap();
                let later = collection.changes_after(t2).await.unwrap();
                assert!(
                    later.iter().all(|change| earlier.contains(change)),
                    "{}: changes_after({t2}) not a subset of changes_after({t1})",
                    collection.name()
                );
            }
        }

        let all = collection.changes_after(-1).await.unwrap();
        assert!(all
            .windows(2)
            .all(|w| (w[0].timestamp, w[0].label) <= (w[1].timestamp, w[1].label)));
        assert!(collection.changes_after(90).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let batch: Vec<ChangeRecord> = vec![
        ChangeRecord::upsert(10, seeded_vector(DIMS, 1000), 50),
        ChangeRecord::upsert(3, seeded_vector(DIMS, 1001), 50),
        ChangeRecord::tombstone(7, 50),
        ChangeRecord::tombstone(99, 50),
    ];

    let once = KnnEngine::new(
        Arc::new(MemoryCollection::new("db-once", DIMS)),
        EngineConfig::default(),
    );
    let twice = KnnEngine::new(
        Arc::new(MemoryCollection::new("db-twice", DIMS)),
        EngineConfig::default(),
    );
    for engine in [&once, &twice] {
        engine.collection().add(seeded_batch(20)).await.unwrap();
    }

    once.update(&batch).await.unwrap();
    twice.update(&batch).await.unwrap();
    twice.update(&batch).await.unwrap();

    for seed in 0..10 {
        let query = seeded_vector(DIMS, 5000 + seed);
        assert_eq!(
            once.search(&query, 8).await.unwrap(),
            twice.search(&query, 8).await.unwrap()
        );
    }
    assert_eq!(once.stats().live_vectors, twice.stats().live_vectors);
}

#[tokio::test]
async fn test_upsert_and_tombstone_in_one_batch_applies_in_order() {
    let engine = KnnEngine::new(scenario_collection().await, EngineConfig::default());

    engine
        .update(&[
            ChangeRecord::tombstone(2, 10),
            ChangeRecord::upsert(2, vec![1.0, 2.0, 4.0], 10),
        ])
        .await
        .unwrap();
    let result = engine.search(&[1.0, 2.0, 4.0], 1).await.unwrap();
    assert_eq!(result.neighbors, vec![2]);

    engine
        .update(&[
            ChangeRecord::upsert(3, vec![1.0, 2.0, 4.0], 20),
            ChangeRecord::tombstone(3, 20),
        ])
        .await
        .unwrap();
    let result = engine.search(&[1.0, 2.0, 4.0], 3).await.unwrap();
    assert!(!result.neighbors.contains(&3));
}

#[tokio::test]
async fn test_bad_request_does_not_mutate_index() {
    let engine = Arc::new(KnnEngine::new(scenario_collection().await, EngineConfig::default()));
    let handler = RequestHandler::new(engine.clone(), "instance-1");

    let request = KnnRequest::new(vec![1.0, 2.0], 3)
        .with_updates(vec![serverless_knn::Change::tombstone(1)], 1_000);
    let response = handler.handle(Envelope::knn(&request)).await;
    assert_eq!(response.status, 400);
    assert!(response.body["error"].as_str().unwrap().contains("Dimension mismatch"));

    // Rejected before bootstrap, and label 1 survives
    assert_eq!(engine.state(), EngineState::Uninitialized);
    let result = engine.search(&[1.0, 2.0, 3.0], 3).await.unwrap();
    assert_eq!(result.neighbors, vec![1, 2, 3]);
    assert_eq!(engine.stats().updates, 0);

    // A malformed update leaves the index untouched too
    let err = engine
        .update(&[
            ChangeRecord::tombstone(2, 5),
            ChangeRecord::upsert(3, vec![0.0], 5),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, KnnError::DimensionMismatch { .. }));
    assert_eq!(engine.search(&[4.0, 5.0, 6.0], 1).await.unwrap().neighbors, vec![2]);
}

#[tokio::test]
async fn test_bootstrap_failure_is_retried() {
    let inner = Arc::new(MockTableStorage::new(MockStorageConfig::fast()));
    inner.create_table("db-flaky").await.unwrap();
    let failing = Arc::new(FailingTableStorage::new(inner));
    let collection = Arc::new(TableCollection::new("db-flaky", 3, failing.clone()));
    collection.add(scenario_vectors()).await.unwrap();

    let engine = KnnEngine::new(collection, EngineConfig::default());
    failing.set_failure_mode(FailureMode::FailAll);
    let err = engine.search(&[1.0, 2.0, 3.0], 1).await.unwrap_err();
    assert!(matches!(err, KnnError::Storage(_)));
    assert_eq!(engine.state(), EngineState::Uninitialized);

    failing.set_failure_mode(FailureMode::None);
    let result = engine.search(&[1.0, 2.0, 3.0], 3).await.unwrap();
    assert_eq!(result.distances, vec![0.0, 27.0, 108.0]);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test]
async fn test_cold_start_scans_table_once() {
    let inner = Arc::new(MockTableStorage::new(MockStorageConfig::fast()));
    inner.create_table("db-once").await.unwrap();
    let counting = Arc::new(FailingTableStorage::new(inner));
    let collection = Arc::new(TableCollection::new("db-once", DIMS, counting.clone()));
    collection.add(seeded_batch(20)).await.unwrap();
    collection.remove(&[3]).await.unwrap();

    let engine = KnnEngine::new(collection, EngineConfig::default());
    counting.set_failure_mode(FailureMode::None);
    engine.ensure_ready().await.unwrap();

    assert_eq!(counting.scan_count(), 1);
    assert_eq!(engine.stats().live_vectors, 19);
}

#[tokio::test]
async fn test_refresh_catches_up_from_collection() {
    let (_storage, collection) = table_collection("db-refresh").await;
    let vectors = seeded_batch(10);
    collection.add(vectors.clone()).await.unwrap();

    let engine = KnnEngine::new(collection.clone(), EngineConfig::default());
    engine.ensure_ready().await.unwrap();
    let bootstrapped_at = engine.last_time_updated();
    assert!(bootstrapped_at > 0);

    // Written by another instance after this one went warm
    let later = bootstrapped_at + 1_000;
    collection
        .add_at(vec![LabeledVector::new(42, seeded_vector(DIMS, 42))], later)
        .await
        .unwrap();
    collection.remove_at(&[0], later).await.unwrap();

    assert_eq!(engine.refresh().await.unwrap(), 2);
    let result = engine.search(&seeded_vector(DIMS, 42), 1).await.unwrap();
    assert_eq!(result.neighbors, vec![42]);
    let result = engine.search(&vectors[0].vector, 10).await.unwrap();
    assert!(!result.neighbors.contains(&0));

    assert!(engine.last_time_updated() >= bootstrapped_at);
}

#[tokio::test]
async fn test_concurrent_first_searches_share_bootstrap() {
    let (_storage, collection) = table_collection("db-concurrent").await;
    collection.add(seeded_batch(100)).await.unwrap();

    let engine = Arc::new(KnnEngine::new(collection, EngineConfig::default()));
    let searches = (0..8).map(|seed| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.search(&seeded_vector(DIMS, seed), 1).await })
    });

    for result in futures::future::join_all(searches).await {
        let result = result.unwrap().unwrap();
        assert_eq!(result.distances, vec![0.0]);
    }
    assert_eq!(engine.stats().live_vectors, 100);
}
