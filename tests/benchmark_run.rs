use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use ulid::Ulid;

use availbench::error::BenchError;
use availbench::generator::Generator;
use availbench::model::*;
use availbench::report;
use availbench::runner::{BenchmarkRunner, Growth, Step, run_benchmark};
use availbench::store::*;

// ── Test infrastructure ──────────────────────────────────────

/// Wraps a `MemoryStore` to simulate a store with missing statistics,
/// failing drops or an unreachable server.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    refuse_connect: bool,
    hide_sizes: bool,
    fail_drop: bool,
    disconnected: AtomicBool,
    drop_attempts: AtomicUsize,
}

#[async_trait]
impl StorageDriver for FlakyStore {
    async fn connect(&self) -> Result<(), StoreError> {
        if self.refuse_connect {
            return Err(StoreError::Connection("connection refused".into()));
        }
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.inner.disconnect().await
    }

    async fn insert_many(
        &self,
        collection: Collection,
        documents: Vec<Document>,
        options: InsertOptions,
    ) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_many(collection, documents, options).await
    }

    async fn find(&self, collection: Collection, predicate: &Predicate) -> Result<Vec<Document>, StoreError> {
        self.inner.find(collection, predicate).await
    }

    async fn distinct(
        &self,
        collection: Collection,
        field: Field,
        predicate: &Predicate,
    ) -> Result<BTreeSet<Value>, StoreError> {
        self.inner.distinct(collection, field, predicate).await
    }

    async fn explain(&self, collection: Collection, predicate: &Predicate) -> Result<Explain, StoreError> {
        self.inner.explain(collection, predicate).await
    }

    async fn create_index(&self, collection: Collection, spec: &IndexSpec) -> Result<bool, StoreError> {
        self.inner.create_index(collection, spec).await
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.inner.count(collection).await
    }

    async fn estimated_count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.inner.estimated_count(collection).await
    }

    async fn collection_size_bytes(&self, collection: Collection) -> Result<u64, StatsUnavailable> {
        if self.hide_sizes {
            return Err(StatsUnavailable {
                collection,
                reason: "collStats not permitted".into(),
            });
        }
        self.inner.collection_size_bytes(collection).await
    }

    async fn drop_collection(&self, collection: Collection) -> Result<(), StoreError> {
        self.drop_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_drop {
            return Err(StoreError::WalError("disk full".into()));
        }
        self.inner.drop_collection(collection).await
    }
}

fn small_plan() -> Vec<Step> {
    vec![
        Step { size: 60, growth: Growth::Fresh },
        Step { size: 150, growth: Growth::Incremental },
        Step { size: 400, growth: Growth::Incremental },
    ]
}

async fn all_documents(store: &MemoryStore, collection: Collection) -> Vec<Document> {
    store.find(collection, &Predicate::And(vec![])).await.unwrap()
}

// ── End-to-end ───────────────────────────────────────────────

#[tokio::test]
async fn small_plan_produces_two_measurements_per_size() {
    let store = MemoryStore::new();
    let measurements = run_benchmark(&store, Generator::new(21), 50, &small_plan())
        .await
        .unwrap();

    assert_eq!(measurements.len(), 6);
    let sizes: Vec<usize> = measurements.iter().map(|m| m.dataset_size).collect();
    assert_eq!(sizes, vec![60, 60, 150, 150, 400, 400]);
    for pair in measurements.chunks(2) {
        assert_eq!(pair[0].query, "Available Aug 14-28, 2025");
        assert_eq!(pair[1].query, "Available for 7-day period in Aug 2025");
        assert_eq!(pair[0].total_resources, Some(pair[0].dataset_size as u64));
        assert!(pair[0].resources_size_mb.is_some());
        assert!(pair[0].plan.documents_examined.is_some());
    }

    let report = report::aggregate(&measurements);
    assert_eq!(report.tabular.lines().count(), 7);
    assert!(!report.narrative.contains("N/A"));
}

#[tokio::test]
async fn store_is_disconnected_after_run() {
    let store = MemoryStore::new();
    run_benchmark(&store, Generator::new(1), 50, &small_plan()[..1])
        .await
        .unwrap();
    assert!(matches!(
        store.count(Collection::Resources).await,
        Err(StoreError::Connection(_))
    ));
}

#[tokio::test]
async fn incremental_growth_keeps_earlier_records() {
    let store = MemoryStore::new();
    store.connect().await.unwrap();
    let mut runner = BenchmarkRunner::new(&store, Generator::new(33), 40);
    let mut measurements = Vec::new();

    runner
        .run_step(Step { size: 100, growth: Growth::Fresh }, &mut measurements)
        .await
        .unwrap();
    let resources_before = all_documents(&store, Collection::Resources).await;
    let bookings_before = all_documents(&store, Collection::Bookings).await;

    runner
        .run_step(Step { size: 250, growth: Growth::Incremental }, &mut measurements)
        .await
        .unwrap();
    let resources_after = all_documents(&store, Collection::Resources).await;
    let bookings_after = all_documents(&store, Collection::Bookings).await;

    assert_eq!(resources_after.len(), 250);
    for doc in resources_before.iter().chain(bookings_before.iter()) {
        assert!(resources_after.contains(doc) || bookings_after.contains(doc));
    }

    // new bookings only reference resources added by the second step
    let old_ids: HashSet<Ulid> = resources_before.iter().map(Document::id).collect();
    let old_booking_ids: HashSet<Ulid> = bookings_before.iter().map(Document::id).collect();
    let all_ids: HashSet<Ulid> = resources_after.iter().map(Document::id).collect();
    for doc in &bookings_after {
        let Some(b) = doc.as_booking() else { panic!("non-booking in bookings") };
        assert!(all_ids.contains(&b.resource_id));
        if !old_booking_ids.contains(&b.id) {
            assert!(!old_ids.contains(&b.resource_id));
        }
    }
}

#[tokio::test]
async fn fresh_step_clears_previous_data() {
    let store = MemoryStore::new();
    store.connect().await.unwrap();
    let mut runner = BenchmarkRunner::new(&store, Generator::new(2), 40);
    let mut measurements = Vec::new();
    runner
        .run_step(Step { size: 80, growth: Growth::Fresh }, &mut measurements)
        .await
        .unwrap();
    runner
        .run_step(Step { size: 90, growth: Growth::Fresh }, &mut measurements)
        .await
        .unwrap();
    assert_eq!(store.count(Collection::Resources).await.unwrap(), 90);
}

#[tokio::test]
async fn shrinking_plan_is_rejected() {
    let store = MemoryStore::new();
    let plan = [
        Step { size: 100, growth: Growth::Fresh },
        Step { size: 50, growth: Growth::Incremental },
    ];
    let err = run_benchmark(&store, Generator::new(4), 50, &plan).await.unwrap_err();
    assert!(matches!(err, BenchError::NonIncreasingSize { previous: 100, next: 50 }));
}

#[tokio::test]
async fn missing_size_stats_fall_back_to_estimate() {
    let store = FlakyStore {
        hide_sizes: true,
        ..Default::default()
    };
    let measurements = run_benchmark(&store, Generator::new(5), 100, &small_plan()[..1])
        .await
        .unwrap();

    let m = &measurements[0];
    let resources = m.total_resources.unwrap();
    let bookings = m.total_bookings.unwrap();
    let expected = |count: u64, kb: f64| ((count as f64 * kb / 1024.0) * 100.0).round() / 100.0;
    assert_eq!(m.resources_size_mb, Some(expected(resources, 0.5)));
    assert_eq!(m.bookings_size_mb, Some(expected(bookings, 0.2)));
    assert!(store.disconnected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_drop_is_logged_and_run_continues() {
    let store = FlakyStore {
        fail_drop: true,
        ..Default::default()
    };
    let measurements = run_benchmark(&store, Generator::new(8), 100, &[Step { size: 40, growth: Growth::Fresh }])
        .await
        .unwrap();

    assert_eq!(store.drop_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(measurements.len(), 2);
    assert_eq!(measurements[0].total_resources, Some(40));
}

#[tokio::test]
async fn unreachable_store_aborts_without_measurements() {
    let store = FlakyStore {
        refuse_connect: true,
        ..Default::default()
    };
    let err = run_benchmark(&store, Generator::new(6), 100, &small_plan())
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::Store(StoreError::Connection(_))));
}

#[tokio::test]
async fn durable_store_run_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("availbench_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("availbench.wal");

    let store = MemoryStore::open(&path).unwrap();
    let measurements = run_benchmark(&store, Generator::new(7), 25, &small_plan()[..2])
        .await
        .unwrap();
    let bookings = measurements[2].total_bookings.unwrap();
    drop(store);

    let reopened = MemoryStore::open(&path).unwrap();
    reopened.connect().await.unwrap();
    assert_eq!(reopened.count(Collection::Resources).await.unwrap(), 150);
    assert_eq!(reopened.count(Collection::Bookings).await.unwrap(), bookings);
    // every index from the run came back with the data
    assert!(
        !reopened
            .create_index(Collection::Bookings, &IndexSpec::ascending(&[Field::Start, Field::End]))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn available_results_never_overlap_a_booking() {
    let store = MemoryStore::new();
    store.connect().await.unwrap();
    let mut runner = BenchmarkRunner::new(&store, Generator::new(77), 100);
    runner
        .run_step(Step { size: 300, growth: Growth::Fresh }, &mut Vec::new())
        .await
        .unwrap();

    let bookings: Vec<Booking> = all_documents(&store, Collection::Bookings)
        .await
        .iter()
        .filter_map(|d| d.as_booking().cloned())
        .collect();
    for query in availbench::runner::benchmark_queries(runner.reference()).unwrap() {
        let predicate = query.resolve(&store).await.unwrap();
        let available: HashSet<Ulid> = store
            .find(Collection::Resources, &predicate)
            .await
            .unwrap()
            .iter()
            .map(Document::id)
            .collect();
        for b in &bookings {
            if query.window.overlaps(b.start, b.end) {
                assert!(!available.contains(&b.resource_id));
            }
        }
    }
}
