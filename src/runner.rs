use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::BenchError;
use crate::generator::{Generator, ReferenceData, insert_in_batches};
use crate::model::*;
use crate::query::AvailabilityQuery;
use crate::store::{Collection, Document, Field, IndexSpec, StatsUnavailable, StorageDriver, StoreError};

/// 2025-08-14T00:00:00Z
pub const AUG_14: Ms = 1_755_129_600_000;
/// 2025-08-28T00:00:00Z
pub const AUG_28: Ms = 1_756_339_200_000;
/// 2025-08-15T00:00:00Z
pub const AUG_15: Ms = 1_755_216_000_000;
/// 2025-08-22T00:00:00Z
pub const AUG_22: Ms = 1_755_820_800_000;

/// Estimated KB per document when the store cannot report a size.
const RESOURCE_KB_PER_DOC: f64 = 0.5;
const BOOKING_KB_PER_DOC: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Drop both collections before generating.
    Fresh,
    /// Top up to the target size; existing documents stay.
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub size: usize,
    pub growth: Growth,
}

/// 2k fresh, then 10k and 100k incremental.
pub fn standard_plan() -> Vec<Step> {
    vec![
        Step { size: 2_000, growth: Growth::Fresh },
        Step { size: 10_000, growth: Growth::Incremental },
        Step { size: 100_000, growth: Growth::Incremental },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing(usize),
    Generating,
    Indexing,
    Querying,
    Recorded,
    Done,
}

/// Index set a production deployment would carry.
pub fn standard_indexes() -> Vec<(Collection, IndexSpec)> {
    use Collection::*;
    vec![
        (Resources, IndexSpec::ascending(&[Field::Status])),
        (Resources, IndexSpec::ascending(&[Field::Category])),
        (Resources, IndexSpec::ascending(&[Field::Subcategory])),
        (Resources, IndexSpec::geo(Field::Location)),
        (Resources, IndexSpec::ascending(&[Field::Status, Field::Category])),
        (Bookings, IndexSpec::ascending(&[Field::ResourceRef])),
        (Bookings, IndexSpec::ascending(&[Field::Start, Field::End])),
        (Bookings, IndexSpec::ascending(&[Field::ResourceRef, Field::Start, Field::End])),
    ]
}

/// The two canonical queries: one category over Aug 14-28, and every
/// category over the week of Aug 15-22.
pub fn benchmark_queries(reference: &ReferenceData) -> Result<Vec<AvailabilityQuery>, InvalidWindow> {
    Ok(vec![
        AvailabilityQuery::new(
            "Available Aug 14-28, 2025",
            AUG_14,
            AUG_28,
            reference.categories.first().copied(),
        )?,
        AvailabilityQuery::new("Available for 7-day period in Aug 2025", AUG_15, AUG_22, None)?,
    ])
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

/// Count-based size guess in MB.
pub fn estimate_mb(collection: Collection, count: u64) -> f64 {
    let kb_per_doc = match collection {
        Collection::Resources => RESOURCE_KB_PER_DOC,
        Collection::Bookings => BOOKING_KB_PER_DOC,
    };
    round2(count as f64 * kb_per_doc / 1024.0)
}

/// Exact size when the store has it, otherwise the per-document estimate.
/// `None` only when neither is known.
pub fn size_or_estimate(
    exact: Result<u64, StatsUnavailable>,
    collection: Collection,
    count: Option<u64>,
) -> Option<f64> {
    exact.map(bytes_to_mb).or_else(|e| {
        warn!("{e}; estimating from document count");
        metrics::counter!(crate::observability::STATS_FALLBACKS_TOTAL, "collection" => collection.name())
            .increment(1);
        count.map(|c| estimate_mb(collection, c)).ok_or(e)
    })
    .ok()
}

/// Statistics that may be missing: connection loss is still fatal.
fn optional_stat(result: Result<u64, StoreError>, what: &str) -> Result<Option<u64>, StoreError> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(e @ StoreError::Connection(_)) => Err(e),
        Err(e) => {
            warn!("{what} unavailable: {e}");
            Ok(None)
        }
    }
}

/// Drives one store through the dataset plan. Phases run strictly one after
/// another; nothing runs in the background while a query is timed.
pub struct BenchmarkRunner<'a, D: StorageDriver + ?Sized> {
    driver: &'a D,
    generator: Generator,
    batch_size: usize,
    phase: Phase,
    last_size: Option<usize>,
}

impl<'a, D: StorageDriver + ?Sized> BenchmarkRunner<'a, D> {
    pub fn new(driver: &'a D, generator: Generator, batch_size: usize) -> Self {
        Self {
            driver,
            generator,
            batch_size,
            phase: Phase::Idle,
            last_size: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.generator.reference
    }

    fn enter(&mut self, phase: Phase) {
        debug!("phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run every step, appending two measurements per step.
    pub async fn run(&mut self, plan: &[Step], measurements: &mut Vec<Measurement>) -> Result<(), BenchError> {
        for step in plan {
            self.run_step(*step, measurements).await?;
        }
        self.enter(Phase::Done);
        Ok(())
    }

    pub async fn run_step(&mut self, step: Step, measurements: &mut Vec<Measurement>) -> Result<(), BenchError> {
        if let Some(previous) = self.last_size
            && step.size <= previous
        {
            return Err(BenchError::NonIncreasingSize {
                previous,
                next: step.size,
            });
        }
        self.last_size = Some(step.size);

        info!("{}", "=".repeat(60));
        info!("TESTING WITH {} RESOURCES ({:?})", step.size, step.growth);
        info!("{}", "=".repeat(60));

        self.enter(Phase::Preparing(step.size));
        if step.growth == Growth::Fresh {
            self.clear_collections().await?;
        }

        self.enter(Phase::Generating);
        self.grow_to(step.size).await?;

        self.enter(Phase::Indexing);
        self.create_indexes().await?;

        self.enter(Phase::Querying);
        for query in benchmark_queries(&self.generator.reference)? {
            let m = self.measure(step.size, &query).await?;
            measurements.push(m);
        }

        self.enter(Phase::Recorded);
        let resources = self.driver.count(Collection::Resources).await?;
        let bookings = self.driver.count(Collection::Bookings).await?;
        info!("dataset summary: {resources} resources, {bookings} bookings");
        Ok(())
    }

    /// Drop both collections. A missing collection is expected; other
    /// failures are logged and the run goes on, except a lost connection.
    async fn clear_collections(&self) -> Result<(), BenchError> {
        info!("clearing existing collections...");
        for collection in [Collection::Resources, Collection::Bookings] {
            match self.driver.drop_collection(collection).await {
                Ok(()) => info!("dropped {}", collection.name()),
                Err(StoreError::CollectionNotFound(_)) => {
                    debug!("{} did not exist", collection.name())
                }
                Err(e @ StoreError::Connection(_)) => return Err(e.into()),
                Err(e) => warn!("error dropping {}: {e}", collection.name()),
            }
        }
        Ok(())
    }

    /// Top up resources to `size`, with bookings for the new ones only.
    async fn grow_to(&mut self, size: usize) -> Result<(), BenchError> {
        let current = self.driver.count(Collection::Resources).await? as usize;
        let to_add = size.saturating_sub(current);
        if to_add == 0 {
            info!("already at {current} resources, nothing to generate");
            return Ok(());
        }

        info!("generating {to_add} resources...");
        let started = Instant::now();
        let resources = self.generator.generate_resources(to_add);
        let ids: Vec<Ulid> = resources.iter().map(|r| r.id).collect();
        let docs = resources.into_iter().map(Document::Resource).collect();
        let report = insert_in_batches(self.driver, Collection::Resources, docs, self.batch_size).await?;
        info!(
            "generated {} resources in {:.3}s",
            report.inserted,
            started.elapsed().as_secs_f64()
        );

        let accepted: Vec<Ulid> = if report.rejected.is_empty() {
            ids
        } else {
            ids.into_iter().filter(|id| !report.rejected.contains(id)).collect()
        };

        info!("generating bookings for {} resources...", accepted.len());
        let started = Instant::now();
        let bookings = self.generator.generate_bookings(&accepted);
        let docs = bookings.into_iter().map(Document::Booking).collect();
        let report = insert_in_batches(self.driver, Collection::Bookings, docs, self.batch_size).await?;
        info!(
            "generated {} bookings in {:.3}s",
            report.inserted,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Build the standard index set. Returns how many were new.
    pub async fn create_indexes(&self) -> Result<usize, StoreError> {
        info!("creating indexes...");
        let started = Instant::now();
        let mut built = 0;
        for (collection, spec) in standard_indexes() {
            if self.driver.create_index(collection, &spec).await? {
                built += 1;
            }
        }
        info!(
            "created {built} indexes in {:.3}s",
            started.elapsed().as_secs_f64()
        );
        Ok(built)
    }

    /// Execute one query and capture timing, plan and collection stats.
    /// The exclusion list is built before the clock starts.
    pub async fn measure(&self, size: usize, query: &AvailabilityQuery) -> Result<Measurement, BenchError> {
        info!("=== {} ===", query.label);
        let predicate = query.resolve(self.driver).await?;

        let started = Instant::now();
        let results = self.driver.find(Collection::Resources, &predicate).await?;
        let elapsed = started.elapsed();
        let execution_ms = elapsed.as_secs_f64() * 1000.0;

        metrics::counter!(crate::observability::QUERIES_TOTAL, "query" => query.label.clone()).increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "query" => query.label.clone())
            .record(elapsed.as_secs_f64());
        info!("found {} available resources", results.len());
        info!("execution time: {execution_ms:.3}ms");

        let explain = self.driver.explain(Collection::Resources, &predicate).await?;
        debug!("plan: {:?} via {:?}", explain.stats, explain.index);

        let total_resources = optional_stat(
            self.driver.estimated_count(Collection::Resources).await,
            "resource count",
        )?;
        let total_bookings = optional_stat(
            self.driver.estimated_count(Collection::Bookings).await,
            "booking count",
        )?;
        let resources_size_mb = size_or_estimate(
            self.driver.collection_size_bytes(Collection::Resources).await,
            Collection::Resources,
            total_resources,
        );
        let bookings_size_mb = size_or_estimate(
            self.driver.collection_size_bytes(Collection::Bookings).await,
            Collection::Bookings,
            total_bookings,
        );

        Ok(Measurement {
            dataset_size: size,
            query: query.label.clone(),
            result_count: results.len(),
            execution_ms,
            plan: explain.stats,
            total_resources,
            total_bookings,
            resources_size_mb,
            bookings_size_mb,
        })
    }
}

/// Connect, run the plan, disconnect on every path.
pub async fn run_benchmark<D: StorageDriver + ?Sized>(
    driver: &D,
    generator: Generator,
    batch_size: usize,
    plan: &[Step],
) -> Result<Vec<Measurement>, BenchError> {
    info!("connecting to store...");
    driver.connect().await?;
    info!("connected");

    let mut measurements = Vec::new();
    let result = BenchmarkRunner::new(driver, generator, batch_size)
        .run(plan, &mut measurements)
        .await;

    match driver.disconnect().await {
        Ok(()) => info!("disconnected"),
        Err(e) => warn!("disconnect failed: {e}"),
    }
    result.map(|()| measurements)
}
