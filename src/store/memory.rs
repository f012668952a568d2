use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use ulid::Ulid;

use crate::model::PlanStats;
use crate::wal::Wal;

use super::index::{self, SecondaryIndex};
use super::*;

type SharedCollection = Arc<RwLock<CollectionState>>;
type WalGuard<'a> = Option<MutexGuard<'a, Wal>>;

#[derive(Default)]
struct CollectionState {
    documents: BTreeMap<Ulid, Document>,
    indexes: Vec<SecondaryIndex>,
    size_bytes: u64,
}

impl CollectionState {
    fn insert(&mut self, doc: Document) {
        self.size_bytes += bincode::serialized_size(&doc).unwrap_or(0);
        for idx in &mut self.indexes {
            idx.insert(&doc);
        }
        self.documents.insert(doc.id(), doc);
    }

    fn has_index(&self, spec: &IndexSpec) -> bool {
        self.indexes.iter().any(|i| &i.spec == spec)
    }

    fn add_index(&mut self, spec: IndexSpec) {
        let mut idx = SecondaryIndex::new(spec);
        for doc in self.documents.values() {
            idx.insert(doc);
        }
        self.indexes.push(idx);
    }

    /// Run `predicate` through the chosen index (or a scan) and report
    /// what was touched on the way.
    fn execute(&self, predicate: &Predicate) -> (Vec<&Document>, Explain) {
        let conds = index::field_conditions(predicate);
        match index::choose(&self.indexes, &conds) {
            Some(idx) => {
                let (ids, keys_examined) = idx.scan(&conds);
                let fetched: Vec<&Document> =
                    ids.iter().filter_map(|id| self.documents.get(id)).collect();
                let documents_examined = fetched.len() as u64;
                let matched = fetched.into_iter().filter(|d| predicate.matches(d)).collect();
                let explain = Explain {
                    stats: PlanStats {
                        documents_examined: Some(documents_examined),
                        keys_examined: Some(keys_examined),
                    },
                    index: Some(idx.name().to_string()),
                };
                (matched, explain)
            }
            None => {
                let matched = self.documents.values().filter(|d| predicate.matches(d)).collect();
                let explain = Explain {
                    stats: PlanStats {
                        documents_examined: Some(self.documents.len() as u64),
                        keys_examined: Some(0),
                    },
                    index: None,
                };
                (matched, explain)
            }
        }
    }

    /// Events that recreate this collection from nothing.
    fn snapshot(&self, collection: Collection) -> Vec<StoreEvent> {
        let mut events: Vec<StoreEvent> = self
            .indexes
            .iter()
            .map(|i| StoreEvent::IndexCreated {
                collection,
                spec: i.spec.clone(),
            })
            .collect();
        events.extend(self.documents.values().map(|d| StoreEvent::Inserted {
            document: d.clone(),
        }));
        events
    }
}

/// Embedded document store with secondary indexes and an optional WAL.
///
/// Lock order: the WAL mutex is always taken before any collection lock, so
/// a compaction snapshot never misses a write that is already logged.
pub struct MemoryStore {
    collections: DashMap<Collection, SharedCollection>,
    wal: Option<Mutex<Wal>>,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store; contents vanish with the process.
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            wal: None,
            connected: AtomicBool::new(false),
        }
    }

    /// Durable store backed by the WAL at `path`, replayed on open.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, recovered) = Wal::open(path)?;

        let mut state: HashMap<Collection, CollectionState> = HashMap::new();
        for event in recovered.events {
            match event {
                StoreEvent::Inserted { document } => {
                    state.entry(document.collection()).or_default().insert(document);
                }
                StoreEvent::IndexCreated { collection, spec } => {
                    let coll = state.entry(collection).or_default();
                    if !coll.has_index(&spec) {
                        coll.add_index(spec);
                    }
                }
                StoreEvent::Dropped { collection } => {
                    state.remove(&collection);
                }
            }
        }

        let collections = DashMap::new();
        for (c, s) in state {
            collections.insert(c, Arc::new(RwLock::new(s)));
        }
        tracing::debug!(
            "replayed {} commits into {} collections from {}",
            recovered.commits,
            collections.len(),
            path.display()
        );

        Ok(Self {
            collections,
            wal: Some(Mutex::new(wal)),
            connected: AtomicBool::new(false),
        })
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Connection("not connected".into()))
        }
    }

    fn collection(&self, c: Collection) -> Option<SharedCollection> {
        self.collections.get(&c).map(|e| e.value().clone())
    }

    fn collection_or_create(&self, c: Collection) -> SharedCollection {
        self.collections.entry(c).or_default().value().clone()
    }

    async fn lock_wal(&self) -> WalGuard<'_> {
        match &self.wal {
            Some(wal) => Some(wal.lock().await),
            None => None,
        }
    }

    /// Group commit: the events of one store call go out as a single frame.
    fn log(wal: &mut WalGuard<'_>, events: &[StoreEvent]) -> Result<(), StoreError> {
        let Some(wal) = wal.as_mut() else { return Ok(()) };
        if events.is_empty() {
            return Ok(());
        }
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = wal.commit(events);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        result
            .map(|_| ())
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Rewrite the WAL from the collections that remain. The caller holds
    /// the WAL lock, so no write can slip in between snapshot and rewrite.
    async fn compact_wal(&self, wal: &mut WalGuard<'_>) -> Result<(), StoreError> {
        let Some(wal) = wal.as_mut() else { return Ok(()) };
        let mut names: Vec<Collection> = self.collections.iter().map(|e| *e.key()).collect();
        names.sort();
        let mut events = Vec::new();
        for c in names {
            if let Some(coll) = self.collection(c) {
                events.extend(coll.read().await.snapshot(c));
            }
        }
        wal.rewrite(&events)
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        tracing::debug!("compacted {} to {} events", wal.path().display(), events.len());
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for MemoryStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: Collection,
        documents: Vec<Document>,
        options: InsertOptions,
    ) -> Result<InsertOutcome, StoreError> {
        self.ensure_connected()?;
        let mut wal = self.lock_wal().await;
        let coll = self.collection_or_create(collection);
        let mut guard = coll.write().await;

        let mut outcome = InsertOutcome::default();
        let mut accepted: Vec<Document> = Vec::with_capacity(documents.len());
        let mut batch_ids: HashSet<Ulid> = HashSet::new();
        for (pos, doc) in documents.into_iter().enumerate() {
            let id = doc.id();
            let rejected = if doc.collection() != collection {
                Some(StoreError::WrongCollection { expected: collection, id })
            } else if guard.documents.contains_key(&id) || !batch_ids.insert(id) {
                Some(StoreError::DuplicateKey(id))
            } else {
                None
            };
            match rejected {
                Some(err) => {
                    outcome.failures.push((pos, err));
                    if options.ordered {
                        break;
                    }
                }
                None => accepted.push(doc),
            }
        }

        let events: Vec<StoreEvent> = accepted
            .iter()
            .map(|d| StoreEvent::Inserted { document: d.clone() })
            .collect();
        Self::log(&mut wal, &events)?;

        outcome.inserted = accepted.len();
        for doc in accepted {
            guard.insert(doc);
        }
        Ok(outcome)
    }

    async fn find(
        &self,
        collection: Collection,
        predicate: &Predicate,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_connected()?;
        let Some(coll) = self.collection(collection) else {
            return Ok(Vec::new());
        };
        let guard = coll.read().await;
        let (docs, _) = guard.execute(predicate);
        Ok(docs.into_iter().cloned().collect())
    }

    async fn distinct(
        &self,
        collection: Collection,
        field: Field,
        predicate: &Predicate,
    ) -> Result<BTreeSet<Value>, StoreError> {
        self.ensure_connected()?;
        let Some(coll) = self.collection(collection) else {
            return Ok(BTreeSet::new());
        };
        let guard = coll.read().await;
        let (docs, _) = guard.execute(predicate);
        Ok(docs.into_iter().filter_map(|d| d.get(field)).collect())
    }

    async fn explain(
        &self,
        collection: Collection,
        predicate: &Predicate,
    ) -> Result<Explain, StoreError> {
        self.ensure_connected()?;
        let Some(coll) = self.collection(collection) else {
            return Ok(Explain {
                stats: PlanStats {
                    documents_examined: Some(0),
                    keys_examined: Some(0),
                },
                index: None,
            });
        };
        let guard = coll.read().await;
        let (_, explain) = guard.execute(predicate);
        Ok(explain)
    }

    async fn create_index(&self, collection: Collection, spec: &IndexSpec) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        let mut wal = self.lock_wal().await;
        let coll = self.collection_or_create(collection);
        let mut guard = coll.write().await;
        if guard.has_index(spec) {
            return Ok(false);
        }
        Self::log(
            &mut wal,
            &[StoreEvent::IndexCreated {
                collection,
                spec: spec.clone(),
            }],
        )?;
        guard.add_index(spec.clone());
        Ok(true)
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        match self.collection(collection) {
            Some(coll) => Ok(coll.read().await.documents.len() as u64),
            None => Ok(0),
        }
    }

    async fn estimated_count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        match self.collection(collection) {
            Some(coll) => Ok(coll.read().await.documents.len() as u64),
            None => Ok(0),
        }
    }

    async fn collection_size_bytes(&self, collection: Collection) -> Result<u64, StatsUnavailable> {
        if let Err(e) = self.ensure_connected() {
            return Err(StatsUnavailable {
                collection,
                reason: e.to_string(),
            });
        }
        match self.collection(collection) {
            Some(coll) => Ok(coll.read().await.size_bytes),
            None => Err(StatsUnavailable {
                collection,
                reason: "collection does not exist".into(),
            }),
        }
    }

    async fn drop_collection(&self, collection: Collection) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let mut wal = self.lock_wal().await;
        if self.collections.remove(&collection).is_none() {
            return Err(StoreError::CollectionNotFound(collection));
        }
        Self::log(&mut wal, &[StoreEvent::Dropped { collection }])?;
        self.compact_wal(&mut wal).await
    }
}
