use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::{Collection, Document, InsertOptions, StorageDriver, StoreError};

pub const BATCH_SIZE: usize = 1000;
pub const CATEGORY_COUNT: usize = 3;
pub const SUBCATEGORY_COUNT: usize = 12;
const MAX_OWNERS: usize = 100;
const PROGRESS_EVERY: usize = 10_000;

/// Identity for the `index`-th generated record. Time part is the sequence
/// index so ids sort in generation order; the rest comes from `rng`.
pub fn id_at(index: u64, rng: &mut impl Rng) -> Ulid {
    Ulid::from_parts(SEASON_START as u64 + index, rng.r#gen())
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

/// Categories and subcategories shared by every generated resource.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub categories: Vec<Ulid>,
    pub subcategories: Vec<Ulid>,
}

/// Seeded source of synthetic resources and bookings. Two generators built
/// from the same seed produce the same records in the same order.
pub struct Generator {
    rng: StdRng,
    next_index: u64,
    pub reference: ReferenceData,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        let mut g = Self {
            rng: StdRng::seed_from_u64(seed),
            next_index: 0,
            reference: ReferenceData {
                categories: Vec::new(),
                subcategories: Vec::new(),
            },
        };
        g.reference.categories = g.fresh_ids(CATEGORY_COUNT);
        g.reference.subcategories = g.fresh_ids(SUBCATEGORY_COUNT);
        g
    }

    fn next_id(&mut self) -> Ulid {
        let id = id_at(self.next_index, &mut self.rng);
        self.next_index += 1;
        id
    }

    fn fresh_ids(&mut self, n: usize) -> Vec<Ulid> {
        (0..n).map(|_| self.next_id()).collect()
    }

    fn pick(&mut self, ids: &[Ulid]) -> Ulid {
        ids[self.rng.gen_range(0..ids.len())]
    }

    fn location(&mut self) -> GeoPoint {
        let lat = round6(self.rng.r#gen::<f64>() * 180.0 - 90.0);
        let lon = round6(self.rng.r#gen::<f64>() * 360.0 - 180.0);
        GeoPoint { lon, lat }
    }

    /// `n` active resources, each with a fresh id. Owners are drawn from a
    /// pool of `n / 10` (at least 1, at most 100) created for this call.
    pub fn generate_resources(&mut self, n: usize) -> Vec<Resource> {
        let owners = self.fresh_ids((n / 10).clamp(1, MAX_OWNERS));
        let categories = self.reference.categories.clone();
        let subcategories = self.reference.subcategories.clone();
        (0..n)
            .map(|_| Resource {
                id: self.next_id(),
                owner_id: self.pick(&owners),
                category_id: self.pick(&categories),
                subcategory_id: self.pick(&subcategories),
                location: self.location(),
                status: ResourceStatus::Active,
            })
            .collect()
    }

    /// Bookings for the given resources: half of them get between 2 and 6
    /// bookings inside the season, each 1 to 31 days long. Bookings that
    /// would run past the season end are dropped.
    pub fn generate_bookings(&mut self, resource_ids: &[Ulid]) -> Vec<Booking> {
        let season = (SEASON_END - SEASON_START) as f64;
        let mut bookings = Vec::new();
        for &resource_id in resource_ids {
            let count = self.rng.gen_range(2..=6);
            if !self.rng.gen_bool(0.5) {
                continue;
            }
            for _ in 0..count {
                let start = SEASON_START + (self.rng.r#gen::<f64>() * season) as Ms;
                let days = self.rng.r#gen::<f64>() * 30.0 + 1.0;
                let end = start + (days * DAY_MS as f64) as Ms;
                let status = BookingStatus::ALL[self.rng.gen_range(0..BookingStatus::ALL.len())];
                let id = self.next_id();
                if end > SEASON_END {
                    continue;
                }
                bookings.push(Booking {
                    id,
                    resource_id,
                    start,
                    end,
                    status,
                });
            }
        }
        bookings
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    /// Ids of documents the store refused.
    pub rejected: Vec<Ulid>,
}

/// Write `documents` in unordered batches of `batch_size`. Documents the
/// store rejects are logged and skipped; a connection failure aborts.
pub async fn insert_in_batches<D: StorageDriver + ?Sized>(
    driver: &D,
    collection: Collection,
    documents: Vec<Document>,
    batch_size: usize,
) -> Result<InsertReport, StoreError> {
    let batch_size = batch_size.max(1);
    let mut report = InsertReport::default();
    let mut offset = 0usize;
    let mut docs = documents.into_iter().peekable();

    while docs.peek().is_some() {
        let batch: Vec<Document> = docs.by_ref().take(batch_size).collect();
        let len = batch.len();
        let ids: Vec<Ulid> = batch.iter().map(Document::id).collect();
        let outcome = driver
            .insert_many(collection, batch, InsertOptions::unordered())
            .await?;

        for (pos, err) in &outcome.failures {
            warn!(
                "partial batch failure in {}: document {} skipped: {err}",
                collection.name(),
                offset + pos
            );
            report.rejected.push(ids[*pos]);
        }
        metrics::counter!(crate::observability::DOCUMENTS_INSERTED_TOTAL, "collection" => collection.name())
            .increment(outcome.inserted as u64);
        metrics::counter!(crate::observability::INSERT_FAILURES_TOTAL, "collection" => collection.name())
            .increment(outcome.failures.len() as u64);

        report.inserted += outcome.inserted;
        if offset % PROGRESS_EVERY == 0 {
            info!("inserted {} {}...", offset + len, collection.name());
        }
        offset += len;
    }

    Ok(report)
}
