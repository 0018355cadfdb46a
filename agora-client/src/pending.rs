use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use chrono::Utc;

use crate::api::{CollectionKey, Entity, EntityId, EntityKind, Time, UserId, Uuid};

/// Correlates a local mutation with its settlement
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MutationToken(pub Uuid);

impl MutationToken {
    pub fn issue() -> MutationToken {
        MutationToken(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationKind {
    Create,
    Like,
    Reply,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// Provisional entity, whose id is also the store key it is written under
    Create(Arc<Entity>),
    Like { user: UserId, now_liked: bool },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingMutation {
    pub token: MutationToken,
    pub target: EntityId,
    pub payload: Payload,
    pub issued_at: Time,
}

impl PendingMutation {
    pub fn create(entity: impl Into<Arc<Entity>>) -> PendingMutation {
        let entity = entity.into();
        PendingMutation {
            token: MutationToken::issue(),
            target: entity.id.clone(),
            payload: Payload::Create(entity),
            issued_at: Utc::now(),
        }
    }

    pub fn like(target: EntityId, user: UserId, now_liked: bool) -> PendingMutation {
        PendingMutation {
            token: MutationToken::issue(),
            target,
            payload: Payload::Like { user, now_liked },
            issued_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> MutationKind {
        match &self.payload {
            Payload::Create(e) if e.kind == EntityKind::Reply => MutationKind::Reply,
            Payload::Create(_) => MutationKind::Create,
            Payload::Like { .. } => MutationKind::Like,
        }
    }
}

/// Local mutations not yet confirmed, in issue order
#[derive(Clone, Debug, Default)]
pub struct PendingLedger {
    queue: VecDeque<PendingMutation>, // push_back, remove anywhere
}

impl PendingLedger {
    pub fn new() -> PendingLedger {
        PendingLedger {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, m: PendingMutation) {
        tracing::trace!(token = ?m.token, kind = ?m.kind(), target = %m.target, "mutation pending");
        self.queue.push_back(m);
    }

    pub fn remove(&mut self, token: &MutationToken) -> Option<PendingMutation> {
        let pos = self.queue.iter().position(|m| m.token == *token)?;
        let m = self.queue.remove(pos);
        tracing::trace!(?token, remaining = self.queue.len(), "mutation no longer pending");
        m
    }

    pub fn get(&self, token: &MutationToken) -> Option<&PendingMutation> {
        self.queue.iter().find(|m| m.token == *token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMutation> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pending creation of an entity with this id, if any
    pub fn pending_create(&self, id: &EntityId) -> Option<&PendingMutation> {
        self.queue
            .iter()
            .find(|m| m.target == *id && matches!(m.payload, Payload::Create(_)))
    }

    /// Provisional entities belonging in `key`, in issue order
    pub fn creates_for<'a>(
        &'a self,
        key: &'a CollectionKey,
    ) -> impl 'a + Iterator<Item = &'a Arc<Entity>> {
        self.queue.iter().filter_map(move |m| match &m.payload {
            Payload::Create(e) if key.admits(e) => Some(e),
            _ => None,
        })
    }

    pub fn provisional(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        match &self.pending_create(id)?.payload {
            Payload::Create(e) => Some(e),
            Payload::Like { .. } => None,
        }
    }

    /// Membership each user will have on `target` once their pending likes land
    pub fn like_overlay(&self, target: &EntityId) -> BTreeMap<UserId, bool> {
        let mut res = BTreeMap::new();
        for m in self.queue.iter().filter(|m| m.target == *target) {
            if let Payload::Like { user, now_liked } = &m.payload {
                res.insert(user.clone(), *now_liked);
            }
        }
        res
    }

    /// Oldest pending like of `user` on `target`
    pub fn oldest_like(&self, target: &EntityId, user: &UserId) -> Option<(MutationToken, bool)> {
        self.queue.iter().find_map(|m| match &m.payload {
            Payload::Like { user: u, now_liked } if m.target == *target && u == user => {
                Some((m.token, *now_liked))
            }
            _ => None,
        })
    }

    /// Users with at least one pending like on `target`
    pub fn likers_of(&self, target: &EntityId) -> Vec<UserId> {
        self.like_overlay(target).into_keys().collect()
    }

    pub fn touches(&self, id: &EntityId) -> bool {
        self.queue.iter().any(|m| m.target == *id)
    }
}
