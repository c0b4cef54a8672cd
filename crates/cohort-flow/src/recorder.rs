//! Event recording.
//!
//! The recorder turns [`NewEvent`]s into [`Event`]s, assigning an identifier and
//! the transaction time, and persists them through the [`EventStore`] of the
//! current transaction.

use cohort_core::EventId;

use crate::context::RequestContext;
use crate::error::Result;
use crate::events::{Event, NewEvent};
use crate::store::EventStore;

/// Records domain events in the current transaction.
#[derive(Clone, Copy)]
pub struct EventRecorder<'a> {
    store: &'a dyn EventStore,
}

impl std::fmt::Debug for EventRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder").finish_non_exhaustive()
    }
}

impl<'a> EventRecorder<'a> {
    /// Creates a recorder writing to `store`.
    #[must_use]
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self { store }
    }

    /// Records events in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the events cannot be persisted; the whole request
    /// fails with it.
    pub fn record(
        &self,
        ctx: &mut RequestContext,
        events: impl IntoIterator<Item = NewEvent>,
    ) -> Result<Vec<EventId>> {
        let events = events
            .into_iter()
            .map(|new| -> Result<Event> {
                Ok(Event {
                    id: ctx.next_event_id(self.store)?,
                    asset_key: new.asset.asset_key(),
                    asset_kind: new.asset.asset_type(),
                    event_kind: new.kind,
                    timestamp: ctx.transaction_time(),
                    asset: new.asset,
                    metadata: new.metadata,
                })
            })
            .collect::<Result<Vec<Event>>>()?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        self.store.add_events(&events)?;
        tracing::trace!(count = events.len(), "recorded events");
        Ok(events.into_iter().map(|event| event.id).collect())
    }

    /// Records a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be persisted.
    pub fn record_one(&self, ctx: &mut RequestContext, event: NewEvent) -> Result<EventId> {
        let mut ids = self.record(ctx, [event])?;
        ids.pop()
            .ok_or_else(|| crate::error::Error::internal("event recorder returned no id"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use cohort_core::{ComputePlanKey, OrganizationId};

    use super::*;
    use crate::events::{AssetType, EventAsset, EventKind};
    use crate::plan::ComputePlan;
    use crate::store::memory::InMemoryStore;

    fn plan_event() -> NewEvent {
        NewEvent::created(EventAsset::ComputePlan(ComputePlan {
            key: ComputePlanKey::generate(),
            owner: OrganizationId::new_unchecked("org-1"),
            name: "plan".into(),
            tag: String::new(),
            metadata: BTreeMap::new(),
            creation_date: Utc::now(),
            cancelation_date: None,
            failure_date: None,
        }))
    }

    #[test]
    fn events_get_transaction_time_and_sequential_ids() {
        let store = InMemoryStore::new();
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let mut ctx = RequestContext::new(at);

        let ids = EventRecorder::new(&store)
            .record(&mut ctx, [plan_event(), plan_event()])
            .unwrap();

        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(ids, vec![events[0].id, events[1].id]);
        assert!(events.iter().all(|e| e.timestamp == at));
        assert_eq!(events[0].asset_kind, AssetType::ComputePlan);
        assert_eq!(events[0].event_kind, EventKind::AssetCreated);
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let store = InMemoryStore::new();
        let mut ctx = RequestContext::new(Utc::now());
        let ids = EventRecorder::new(&store).record(&mut ctx, []).unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.event_count().unwrap(), 0);
    }
}
