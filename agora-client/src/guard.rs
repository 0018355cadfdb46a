use crate::{
    api::{Entity, EntityId},
    Collection, MutationToken, PendingLedger,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    New,
    Update,

    /// Feed echo of a local optimistic insert; the pending entry has been resolved
    DuplicateOfPending(MutationToken),
}

/// Decides how an incoming record relates to what is already known locally
pub struct DuplicateGuard<'a> {
    pending: &'a mut PendingLedger,
}

impl<'a> DuplicateGuard<'a> {
    pub fn new(pending: &'a mut PendingLedger) -> DuplicateGuard<'a> {
        DuplicateGuard { pending }
    }

    /// Classifies `incoming` against `collection`, resolving the pending insert it echoes
    pub fn classify(&mut self, incoming: &EntityId, collection: &Collection) -> Classification {
        if let Some(token) = self.pending.pending_create(incoming).map(|m| m.token) {
            self.pending.remove(&token);
            tracing::debug!(id = %incoming, ?token, "feed echoed optimistic insert");
            return Classification::DuplicateOfPending(token);
        }
        match collection.contains(incoming) {
            true => Classification::Update,
            false => Classification::New,
        }
    }

    /// Resolves the pending likes on `e` that its observed like set confirms
    ///
    /// Likes have no per-event id, so they are matched by (user, target). Only the
    /// oldest pending like of a user can be confirmed: writes of one user on one
    /// target land in issue order, and a later intent is not visible before an
    /// earlier one.
    pub fn resolve_like_echoes(&mut self, e: &Entity) -> Vec<MutationToken> {
        let mut resolved = Vec::new();
        for user in self.pending.likers_of(&e.id) {
            let observed = e.likes.contains(&user);
            while let Some((token, now_liked)) = self.pending.oldest_like(&e.id, &user) {
                if now_liked != observed {
                    break;
                }
                self.pending.remove(&token);
                resolved.push(token);
            }
        }
        if !resolved.is_empty() {
            tracing::debug!(id = %e.id, num = resolved.len(), "feed confirmed pending likes");
        }
        resolved
    }
}
