use std::{collections::HashMap, sync::Arc};

use crate::{
    api::{CollectionKey, Entity, EntityId, UserId},
    SubscriptionHandle,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollectionState {
    /// Never subscribed, or cleared
    Empty,

    /// Subscribed, first snapshot not received yet
    Loading,

    /// At least one snapshot received
    Live,
}

/// Confirmed entities of one collection key, in arrival order
#[derive(Clone, Debug)]
pub struct Collection {
    pub key: CollectionKey,
    state: CollectionState,

    /// Last subscription attached, kept after release
    handle: Option<SubscriptionHandle>,

    /// Whether snapshots of `handle` are still accepted
    accepting: bool,

    entities: Vec<Arc<Entity>>,
}

impl Collection {
    pub fn new(key: CollectionKey) -> Collection {
        Collection {
            key,
            state: CollectionState::Empty,
            handle: None,
            accepting: false,
            entities: Vec::new(),
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    /// Subscription whose snapshots are accepted, `None` once released
    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref().filter(|_| self.accepting)
    }

    /// Returns true if `handle` is the last subscription attached, released or not
    pub fn owned_by(&self, handle: &SubscriptionHandle) -> bool {
        self.handle.as_ref() == Some(handle)
    }

    pub fn attach(&mut self, handle: SubscriptionHandle) {
        self.handle = Some(handle);
        self.accepting = true;
        self.state = CollectionState::Loading;
    }

    pub fn detach(&mut self) {
        self.accepting = false;
    }

    pub fn mark_live(&mut self) {
        self.state = CollectionState::Live;
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.iter().any(|e| e.id == *id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.iter().find(|e| e.id == *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Replaces the content with a full snapshot, returning the number of removed entities
    ///
    /// Entities already known keep their position, entities seen for the first time
    /// are appended by creation date.
    pub fn merge_snapshot(&mut self, incoming: Vec<Arc<Entity>>) -> usize {
        let mut by_id = incoming
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect::<HashMap<_, _>>();
        let mut removed = 0;
        let mut merged = Vec::with_capacity(by_id.len());
        for old in self.entities.drain(..) {
            match by_id.remove(&old.id) {
                // Keep the old allocation when nothing changed
                Some(new) if new == old => merged.push(old),
                Some(new) => merged.push(new),
                None => removed += 1,
            }
        }
        let mut fresh = by_id.into_values().collect::<Vec<_>>();
        fresh.sort_unstable_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        merged.extend(fresh);
        self.entities = merged;
        removed
    }

    /// Appends `e` unless an entity with the same id is already confirmed
    pub fn promote(&mut self, e: Arc<Entity>) -> bool {
        if self.contains(&e.id) || !self.key.admits(&e) {
            return false;
        }
        self.entities.push(e);
        true
    }

    pub fn set_like(&mut self, id: &EntityId, user: &UserId, now_liked: bool) -> bool {
        match self.entities.iter_mut().find(|e| e.id == *id) {
            None => false,
            Some(e) => Arc::make_mut(e).likes.set(user.clone(), now_liked),
        }
    }
}
