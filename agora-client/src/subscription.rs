use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::{CollectionKey, Error, Feed, Store};

/// Identifies one subscription to one collection key
///
/// Handles of successive subscriptions to the same key differ by their generation,
/// so a handle kept after its subscription was replaced never matches again.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionHandle {
    pub key: CollectionKey,
    pub(crate) generation: u64,
}

#[derive(Debug)]
struct LiveSubscription {
    handle: SubscriptionHandle,
    feed: Feed,
}

/// Keeps at most one live feed per collection key
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    live: BTreeMap<CollectionKey, LiveSubscription>,
    next_generation: u64,
}

impl SubscriptionManager {
    pub fn new() -> SubscriptionManager {
        SubscriptionManager {
            live: BTreeMap::new(),
            next_generation: 0,
        }
    }

    /// Opens the feed for `key`, releasing any previous subscription to it first
    pub fn subscribe<S: Store + ?Sized>(
        &mut self,
        store: &S,
        key: CollectionKey,
    ) -> Result<SubscriptionHandle, Error> {
        if let Some(old) = self.live.remove(&key) {
            tracing::info!(%key, "releasing previous subscription before resubscribing");
            store.unsubscribe(old.feed.id);
        }
        let feed = store.subscribe(&key.feed_path())?;
        self.next_generation += 1;
        let handle = SubscriptionHandle {
            key: key.clone(),
            generation: self.next_generation,
        };
        tracing::info!(%key, feed = ?feed.id, "subscribed");
        self.live.insert(
            key,
            LiveSubscription {
                handle: handle.clone(),
                feed,
            },
        );
        Ok(handle)
    }

    /// Stops the feed of `handle`, returning false if it was not live anymore
    pub fn release<S: Store + ?Sized>(&mut self, store: &S, handle: &SubscriptionHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        if let Some(sub) = self.live.remove(&handle.key) {
            store.unsubscribe(sub.feed.id);
            tracing::info!(key = %handle.key, "released subscription");
        }
        true
    }

    pub fn release_all<S: Store + ?Sized>(&mut self, store: &S) {
        for (_, sub) in std::mem::take(&mut self.live) {
            store.unsubscribe(sub.feed.id);
        }
    }

    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        self.live
            .get(&handle.key)
            .map(|sub| sub.handle == *handle)
            .unwrap_or(false)
    }

    pub fn handle_for(&self, key: &CollectionKey) -> Option<&SubscriptionHandle> {
        self.live.get(key).map(|sub| &sub.handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Takes every snapshot already delivered, in feed order for each key
    pub fn drain(&mut self) -> Vec<(SubscriptionHandle, Option<Value>)> {
        let mut res = Vec::new();
        for sub in self.live.values_mut() {
            while let Some(snapshot) = sub.feed.try_next() {
                res.push((sub.handle.clone(), snapshot));
            }
        }
        res
    }
}
