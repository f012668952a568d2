mod error;
mod index;
mod memory;

pub use error::{StatsUnavailable, StoreError};
pub use index::{IndexKind, IndexSpec};
pub use memory::MemoryStore;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// Geohash precision for geo index keys (~5m cells).
pub const GEO_PRECISION: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Resources,
    Bookings,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Resources => "resources",
            Collection::Bookings => "bookings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Id,
    Owner,
    Status,
    Category,
    Subcategory,
    Location,
    ResourceRef,
    Start,
    End,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::Owner => "owner",
            Field::Status => "status",
            Field::Category => "category",
            Field::Subcategory => "subcategory",
            Field::Location => "location",
            Field::ResourceRef => "resource",
            Field::Start => "start",
            Field::End => "end",
        }
    }
}

/// A comparable field value. Only values of the same variant are ordered
/// against each other by predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Id(Ulid),
    Text(String),
    Time(Ms),
}

impl Value {
    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Id(a), Value::Id(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<Ulid> for Value {
    fn from(id: Ulid) -> Self {
        Value::Id(id)
    }
}

impl From<ResourceStatus> for Value {
    fn from(status: ResourceStatus) -> Self {
        Value::Text(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Document {
    Resource(Resource),
    Booking(Booking),
}

impl Document {
    pub fn id(&self) -> Ulid {
        match self {
            Document::Resource(r) => r.id,
            Document::Booking(b) => b.id,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Document::Resource(_) => Collection::Resources,
            Document::Booking(_) => Collection::Bookings,
        }
    }

    pub fn get(&self, field: Field) -> Option<Value> {
        match (self, field) {
            (_, Field::Id) => Some(Value::Id(self.id())),
            (Document::Resource(r), Field::Owner) => Some(Value::Id(r.owner_id)),
            (Document::Resource(r), Field::Status) => Some(r.status.into()),
            (Document::Resource(r), Field::Category) => Some(Value::Id(r.category_id)),
            (Document::Resource(r), Field::Subcategory) => Some(Value::Id(r.subcategory_id)),
            (Document::Resource(r), Field::Location) => {
                Some(Value::Text(r.location.cell(GEO_PRECISION)))
            }
            (Document::Booking(b), Field::Status) => Some(Value::Text(b.status.as_str().to_string())),
            (Document::Booking(b), Field::ResourceRef) => Some(Value::Id(b.resource_id)),
            (Document::Booking(b), Field::Start) => Some(Value::Time(b.start)),
            (Document::Booking(b), Field::End) => Some(Value::Time(b.end)),
            _ => None,
        }
    }

    pub fn as_booking(&self) -> Option<&Booking> {
        match self {
            Document::Booking(b) => Some(b),
            Document::Resource(_) => None,
        }
    }
}

/// Filter expression evaluated against documents. Pure data; the store
/// decides how to execute it.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Field, Value),
    Lte(Field, Value),
    Gte(Field, Value),
    NotIn(Field, BTreeSet<Value>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Eq(field, v) => doc.get(*field).is_some_and(|x| x == *v),
            Predicate::Lte(field, v) => doc
                .get(*field)
                .and_then(|x| x.compare(v))
                .is_some_and(|o| o != Ordering::Greater),
            Predicate::Gte(field, v) => doc
                .get(*field)
                .and_then(|x| x.compare(v))
                .is_some_and(|o| o != Ordering::Less),
            Predicate::NotIn(field, set) => doc.get(*field).is_none_or(|x| !set.contains(&x)),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(doc)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(doc)),
        }
    }

    /// Top-level conjuncts usable for index selection. A single-branch `Or`
    /// is treated as its only branch; wider disjunctions yield nothing.
    pub(crate) fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(ps) => ps.iter().flat_map(|p| p.conjuncts()).collect(),
            Predicate::Or(ps) if ps.len() == 1 => ps[0].conjuncts(),
            Predicate::Or(_) => Vec::new(),
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Stop at the first failing document. When false, every document is
    /// attempted independently.
    pub ordered: bool,
}

impl InsertOptions {
    pub fn unordered() -> Self {
        Self { ordered: false }
    }
}

#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// `(position in batch, error)` for each rejected document.
    pub failures: Vec<(usize, StoreError)>,
}

/// `explain` output: how much of the collection a query touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explain {
    pub stats: PlanStats,
    /// Index used, or `None` for a full collection scan.
    pub index: Option<String>,
}

/// Capability set the benchmark needs from a backing store.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn connect(&self) -> Result<(), StoreError>;
    async fn disconnect(&self) -> Result<(), StoreError>;

    async fn insert_many(
        &self,
        collection: Collection,
        documents: Vec<Document>,
        options: InsertOptions,
    ) -> Result<InsertOutcome, StoreError>;

    async fn find(
        &self,
        collection: Collection,
        predicate: &Predicate,
    ) -> Result<Vec<Document>, StoreError>;

    async fn distinct(
        &self,
        collection: Collection,
        field: Field,
        predicate: &Predicate,
    ) -> Result<BTreeSet<Value>, StoreError>;

    async fn explain(
        &self,
        collection: Collection,
        predicate: &Predicate,
    ) -> Result<Explain, StoreError>;

    /// Returns `true` if the index was built, `false` if it already existed.
    async fn create_index(&self, collection: Collection, spec: &IndexSpec) -> Result<bool, StoreError>;

    async fn count(&self, collection: Collection) -> Result<u64, StoreError>;
    async fn estimated_count(&self, collection: Collection) -> Result<u64, StoreError>;
    async fn collection_size_bytes(&self, collection: Collection) -> Result<u64, StatsUnavailable>;

    async fn drop_collection(&self, collection: Collection) -> Result<(), StoreError>;
}

/// WAL record format for the embedded store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    Inserted { document: Document },
    IndexCreated { collection: Collection, spec: IndexSpec },
    Dropped { collection: Collection },
}
