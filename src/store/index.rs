use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{Document, Field, Predicate, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Ascending,
    /// Geohash cell of a point field.
    Geo,
}

/// Ordered list of indexed fields. Equality is by key list, so two specs
/// naming the same fields in the same order are the same index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<(Field, IndexKind)>,
}

impl IndexSpec {
    pub fn ascending(fields: &[Field]) -> Self {
        Self {
            keys: fields.iter().map(|f| (*f, IndexKind::Ascending)).collect(),
        }
    }

    pub fn geo(field: Field) -> Self {
        Self {
            keys: vec![(field, IndexKind::Geo)],
        }
    }

    /// `status_1_category_1`, `location_geo`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(f, k)| match k {
                IndexKind::Ascending => format!("{}_1", f.name()),
                IndexKind::Geo => format!("{}_geo", f.name()),
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Conditions a single field must satisfy, gathered from the conjuncts of a
/// predicate.
#[derive(Debug, Default, Clone)]
pub(super) struct FieldCond {
    eq: Option<Value>,
    lower: Option<Value>,
    upper: Option<Value>,
}

impl FieldCond {
    fn admits(&self, v: &Value) -> bool {
        if let Some(eq) = &self.eq
            && eq != v
        {
            return false;
        }
        if let Some(lo) = &self.lower
            && v < lo
        {
            return false;
        }
        if let Some(hi) = &self.upper
            && v > hi
        {
            return false;
        }
        true
    }

    fn is_range(&self) -> bool {
        self.eq.is_none() && (self.lower.is_some() || self.upper.is_some())
    }
}

pub(super) fn field_conditions(predicate: &Predicate) -> HashMap<Field, FieldCond> {
    let mut conds: HashMap<Field, FieldCond> = HashMap::new();
    for p in predicate.conjuncts() {
        match p {
            Predicate::Eq(f, v) => conds.entry(*f).or_default().eq = Some(v.clone()),
            Predicate::Gte(f, v) => conds.entry(*f).or_default().lower = Some(v.clone()),
            Predicate::Lte(f, v) => conds.entry(*f).or_default().upper = Some(v.clone()),
            _ => {}
        }
    }
    conds
}

pub(super) struct SecondaryIndex {
    pub spec: IndexSpec,
    name: String,
    entries: BTreeSet<(Vec<Value>, Ulid)>,
}

impl SecondaryIndex {
    pub fn new(spec: IndexSpec) -> Self {
        let name = spec.name();
        Self {
            spec,
            name,
            entries: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key_for(&self, doc: &Document) -> Option<Vec<Value>> {
        self.spec.keys.iter().map(|(f, _)| doc.get(*f)).collect()
    }

    /// Documents missing an indexed field are left out of the index.
    pub fn insert(&mut self, doc: &Document) {
        if let Some(key) = self.key_for(doc) {
            self.entries.insert((key, doc.id()));
        }
    }

    /// How many leading fields are pinned by equality, and whether the
    /// following field carries a range bound.
    pub fn usable_prefix(&self, conds: &HashMap<Field, FieldCond>) -> (usize, bool) {
        let mut prefix = 0;
        for (field, _) in &self.spec.keys {
            match conds.get(field) {
                Some(c) if c.eq.is_some() => prefix += 1,
                Some(c) if c.is_range() => return (prefix, true),
                _ => return (prefix, false),
            }
        }
        (prefix, false)
    }

    /// Walk the index for the given conditions. Returns candidate ids whose
    /// keys satisfy every condition on indexed fields, and the number of
    /// keys visited.
    pub fn scan(&self, conds: &HashMap<Field, FieldCond>) -> (Vec<Ulid>, u64) {
        let (prefix_len, has_range) = self.usable_prefix(conds);
        let fields: Vec<Field> = self.spec.keys.iter().map(|(f, _)| *f).collect();

        let mut start: Vec<Value> = fields[..prefix_len]
            .iter()
            .filter_map(|f| conds.get(f).and_then(|c| c.eq.clone()))
            .collect();
        let prefix = start.clone();
        let range_cond = if has_range { conds.get(&fields[prefix_len]) } else { None };
        if let Some(lo) = range_cond.and_then(|c| c.lower.clone()) {
            start.push(lo);
        }

        let mut ids = Vec::new();
        let mut keys_examined = 0u64;
        let lower = Bound::Included((start, Ulid::nil()));
        for (key, id) in self.entries.range((lower, Bound::Unbounded)) {
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(hi) = range_cond.and_then(|c| c.upper.as_ref())
                && &key[prefix_len] > hi
            {
                break;
            }
            keys_examined += 1;
            let rest_ok = fields
                .iter()
                .zip(key.iter())
                .skip(prefix_len)
                .all(|(f, v)| conds.get(f).is_none_or(|c| c.admits(v)));
            if rest_ok {
                ids.push(*id);
            }
        }
        (ids, keys_examined)
    }
}

/// Pick the index with the longest usable prefix. Ties go to the index with
/// fewer fields, then to the one built first. `None` means scan.
pub(super) fn choose<'a>(
    indexes: &'a [SecondaryIndex],
    conds: &HashMap<Field, FieldCond>,
) -> Option<&'a SecondaryIndex> {
    let mut best: Option<(&SecondaryIndex, (usize, bool))> = None;
    for idx in indexes {
        let score = idx.usable_prefix(conds);
        if score == (0, false) {
            continue;
        }
        let better = match best {
            None => true,
            Some((b, bs)) => {
                score > bs || (score == bs && idx.spec.keys.len() < b.spec.keys.len())
            }
        };
        if better {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn booking(start: Ms, end: Ms) -> Document {
        Document::Booking(Booking {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            start,
            end,
            status: BookingStatus::Reserved,
        })
    }

    fn overlap(start: Ms, end: Ms) -> Predicate {
        Predicate::Or(vec![Predicate::And(vec![
            Predicate::Lte(Field::Start, Value::Time(end)),
            Predicate::Gte(Field::End, Value::Time(start)),
        ])])
    }

    #[test]
    fn index_names() {
        assert_eq!(
            IndexSpec::ascending(&[Field::Status, Field::Category]).name(),
            "status_1_category_1"
        );
        assert_eq!(IndexSpec::geo(Field::Location).name(), "location_geo");
    }

    #[test]
    fn range_scan_stops_at_upper_bound() {
        let mut idx = SecondaryIndex::new(IndexSpec::ascending(&[Field::Start, Field::End]));
        for (s, e) in [(0, 50), (100, 150), (200, 250), (300, 350)] {
            idx.insert(&booking(s, e));
        }
        let conds = field_conditions(&overlap(140, 200));
        let (ids, keys) = idx.scan(&conds);
        // keys with start <= 200 are walked; end >= 140 filters on the key
        assert_eq!(keys, 3);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn choose_prefers_longer_prefix_then_narrower_index() {
        let indexes = vec![
            SecondaryIndex::new(IndexSpec::ascending(&[Field::Status])),
            SecondaryIndex::new(IndexSpec::ascending(&[Field::Category])),
            SecondaryIndex::new(IndexSpec::ascending(&[Field::Status, Field::Category])),
        ];
        let both = Predicate::And(vec![
            Predicate::Eq(Field::Status, ResourceStatus::Active.into()),
            Predicate::Eq(Field::Category, Value::Id(Ulid::new())),
        ]);
        let chosen = choose(&indexes, &field_conditions(&both)).unwrap();
        assert_eq!(chosen.name(), "status_1_category_1");

        let status_only = Predicate::Eq(Field::Status, ResourceStatus::Active.into());
        let chosen = choose(&indexes, &field_conditions(&status_only)).unwrap();
        assert_eq!(chosen.name(), "status_1");
    }

    #[test]
    fn choose_skips_unusable_compound() {
        let indexes = vec![SecondaryIndex::new(IndexSpec::ascending(&[
            Field::ResourceRef,
            Field::Start,
            Field::End,
        ]))];
        assert!(choose(&indexes, &field_conditions(&overlap(0, 10))).is_none());
    }

    #[test]
    fn wide_disjunction_is_not_indexable() {
        let p = Predicate::Or(vec![
            Predicate::Eq(Field::Status, ResourceStatus::Active.into()),
            Predicate::Eq(Field::Status, ResourceStatus::Retired.into()),
        ]);
        assert!(field_conditions(&p).is_empty());
    }
}
