use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    api::{CollectionKey, Entity, EntityId, UserId},
    normalize, Classification, Collection, CollectionState, DuplicateGuard, MutationToken,
    OptimisticMutator, Payload, PendingLedger, PendingMutation, SubscriptionHandle,
};

/// What a snapshot changed
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeReport {
    /// The snapshot belonged to a released or replaced subscription
    pub ignored: bool,
    pub new: usize,
    pub updated: usize,
    pub removed: usize,
    pub malformed: usize,

    /// Pending mutations the snapshot confirmed
    pub resolved: Vec<MutationToken>,
}

impl MergeReport {
    fn ignored() -> MergeReport {
        MergeReport {
            ignored: true,
            ..MergeReport::default()
        }
    }
}

/// Single owner of the local entity graph
///
/// Snapshots enter through `apply_snapshot`, local intents through `mutator`; all
/// other methods are projections.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    collections: HashMap<CollectionKey, Collection>,
    pending: PendingLedger,
}

impl ReconciliationEngine {
    pub fn new() -> ReconciliationEngine {
        ReconciliationEngine {
            collections: HashMap::new(),
            pending: PendingLedger::new(),
        }
    }

    pub fn mutator(&mut self) -> OptimisticMutator<'_> {
        OptimisticMutator::new(self)
    }

    /// Enters `Loading` for the handle's key; snapshots of any older handle are ignored from now on
    pub fn begin_loading(&mut self, handle: SubscriptionHandle) {
        self.collections
            .entry(handle.key.clone())
            .or_insert_with(|| Collection::new(handle.key.clone()))
            .attach(handle);
    }

    /// Stops accepting snapshots of `handle`, keeping what was received
    pub fn detach(&mut self, handle: &SubscriptionHandle) {
        if let Some(c) = self.collections.get_mut(&handle.key) {
            if c.handle() == Some(handle) {
                c.detach();
            }
        }
    }

    /// Drops the collection of `handle`, back to `Empty`, unless it was resubscribed since
    pub fn clear(&mut self, handle: &SubscriptionHandle) -> bool {
        let owned = match self.collections.get(&handle.key) {
            None => return false,
            Some(c) => c.owned_by(handle),
        };
        if owned {
            self.collections.remove(&handle.key);
            tracing::debug!(key = %handle.key, "cleared collection");
        }
        owned
    }

    /// Merges a full snapshot of the handle's feed path
    pub fn apply_snapshot(
        &mut self,
        handle: &SubscriptionHandle,
        snapshot: Option<Value>,
    ) -> MergeReport {
        let Self {
            collections,
            pending,
        } = self;
        let coll = match collections.get_mut(&handle.key) {
            Some(c) if c.handle() == Some(handle) => c,
            _ => {
                tracing::debug!(key = %handle.key, "ignoring snapshot of released subscription");
                return MergeReport::ignored();
            }
        };

        let records = match snapshot {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(records)) => records,
            Some(other) => {
                tracing::warn!(key = %handle.key, ?other, "snapshot is not a collection, treating as empty");
                serde_json::Map::new()
            }
        };

        let mut report = MergeReport::default();
        let mut incoming = Vec::with_capacity(records.len());
        let mut guard = DuplicateGuard::new(pending);
        for (key, raw) in records.iter() {
            let e = match normalize(key, raw, &handle.key) {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(%err, "dropping malformed record");
                    report.malformed += 1;
                    continue;
                }
            };
            if !handle.key.admits(&e) {
                continue;
            }
            match guard.classify(&e.id, coll) {
                Classification::New => report.new += 1,
                Classification::Update => report.updated += 1,
                Classification::DuplicateOfPending(token) => {
                    report.resolved.push(token);
                    report.updated += 1;
                }
            }
            report.resolved.extend(guard.resolve_like_echoes(&e));
            incoming.push(Arc::new(e));
        }
        report.removed = coll.merge_snapshot(incoming);
        coll.mark_live();
        tracing::trace!(key = %handle.key, ?report, "merged snapshot");
        report
    }

    pub fn state_of(&self, key: &CollectionKey) -> CollectionState {
        self.collections
            .get(key)
            .map(|c| c.state())
            .unwrap_or(CollectionState::Empty)
    }

    /// Confirmed entities, then still-pending inserts, with pending likes applied
    pub fn view(&self, key: &CollectionKey) -> Vec<Arc<Entity>> {
        let confirmed = self.collections.get(key);
        let mut res = confirmed
            .map(|c| c.iter().map(|e| self.overlaid(e)).collect::<Vec<_>>())
            .unwrap_or_default();
        for e in self.pending.creates_for(key) {
            if !confirmed.map(|c| c.contains(&e.id)).unwrap_or(false) {
                res.push(self.overlaid(e));
            }
        }
        res
    }

    /// Current local version of an entity, confirmed or provisional
    pub fn entity(&self, id: &EntityId) -> Option<Arc<Entity>> {
        self.confirmed(id)
            .or_else(|| self.pending.provisional(id))
            .map(|e| self.overlaid(e))
    }

    pub fn like_count_for(&self, id: &EntityId) -> Option<usize> {
        self.entity(id).map(|e| e.like_count())
    }

    pub fn is_liked_by(&self, id: &EntityId, user: &UserId) -> bool {
        self.entity(id)
            .map(|e| e.likes.contains(user))
            .unwrap_or(false)
    }

    pub fn is_pending(&self, id: &EntityId) -> bool {
        self.pending.touches(id)
    }

    pub fn pending(&self) -> &PendingLedger {
        &self.pending
    }

    pub(crate) fn stage(&mut self, m: PendingMutation) {
        self.pending.push(m);
    }

    /// The remote write of `token` went through: what it did becomes confirmed state
    pub(crate) fn settle_committed(&mut self, token: &MutationToken) {
        let m = match self.pending.remove(token) {
            Some(m) => m,
            // Already confirmed by the feed
            None => return,
        };
        match m.payload {
            Payload::Create(e) => {
                for c in self.collections.values_mut() {
                    c.promote(e.clone());
                }
            }
            Payload::Like { user, now_liked } => {
                for c in self.collections.values_mut() {
                    c.set_like(&m.target, &user, now_liked);
                }
            }
        }
    }

    /// The remote write of `token` failed: drop its local effect
    pub(crate) fn settle_failed(&mut self, token: &MutationToken) -> Option<PendingMutation> {
        let m = self.pending.remove(token);
        if m.is_none() {
            tracing::warn!(
                ?token,
                "write reported failed after the feed confirmed it, keeping feed state"
            );
        }
        m
    }

    /// The call that issued `token` went away before its write settled: drop its local effect
    ///
    /// The write may still have landed, in which case the feed brings it back.
    pub(crate) fn abandon(&mut self, token: &MutationToken) {
        if let Some(m) = self.pending.remove(token) {
            tracing::info!(?token, target = %m.target, "reverted mutation of an abandoned call");
        }
    }

    fn confirmed(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.collections.values().find_map(|c| c.get(id))
    }

    fn overlaid(&self, e: &Arc<Entity>) -> Arc<Entity> {
        let overlay = self.pending.like_overlay(&e.id);
        if overlay
            .iter()
            .all(|(user, liked)| e.likes.contains(user) == *liked)
        {
            return e.clone();
        }
        let mut res = (**e).clone();
        for (user, liked) in overlay {
            res.likes.set(user, liked);
        }
        Arc::new(res)
    }
}
