use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::*;
use crate::store::{Collection, Field, Predicate, StorageDriver, StoreError, Value};

/// "Which active resources have no booking touching this window?"
///
/// Built with the exclusion-list strategy: the ids of resources with an
/// overlapping booking are fetched by a separate `distinct` over bookings,
/// then the resource query filters them out with `NotIn`. Each half can be
/// served by its own index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub label: String,
    pub window: Window,
    pub category: Option<Ulid>,
}

impl AvailabilityQuery {
    pub fn new(
        label: impl Into<String>,
        start: Ms,
        end: Ms,
        category: Option<Ulid>,
    ) -> Result<Self, InvalidWindow> {
        Ok(Self {
            label: label.into(),
            window: Window::new(start, end)?,
            category,
        })
    }

    /// Bookings whose closed interval meets the window.
    pub fn blocking_predicate(&self) -> Predicate {
        Predicate::Or(vec![Predicate::And(vec![
            Predicate::Lte(Field::Start, Value::Time(self.window.end)),
            Predicate::Gte(Field::End, Value::Time(self.window.start)),
        ])])
    }

    /// Main query once the exclusion list is known.
    pub fn resource_predicate(&self, excluded: BTreeSet<Value>) -> Predicate {
        let mut clauses = vec![Predicate::Eq(Field::Status, ResourceStatus::Active.into())];
        if let Some(category) = self.category {
            clauses.push(Predicate::Eq(Field::Category, Value::Id(category)));
        }
        clauses.push(Predicate::NotIn(Field::Id, excluded));
        Predicate::And(clauses)
    }

    /// Run the exclusion sub-query against the store and return the
    /// resource predicate. Recomputed on every call; nothing is cached.
    pub async fn resolve<D: StorageDriver + ?Sized>(&self, driver: &D) -> Result<Predicate, StoreError> {
        let excluded = driver
            .distinct(Collection::Bookings, Field::ResourceRef, &self.blocking_predicate())
            .await?;
        tracing::debug!(
            "{}: {} resources excluded by overlapping bookings",
            self.label,
            excluded.len()
        );
        Ok(self.resource_predicate(excluded))
    }
}
