use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::{
    api::{Auth, Entity, EntityId, EntityKind, Error, LikeSet, StorePath, Time, UserId, Write},
    plan_creation, MutationToken, PendingMutation, ReconciliationEngine,
};

/// A local insert already visible in the engine, with the writes that persist it
#[derive(Clone, Debug)]
pub struct StagedCreate {
    pub token: MutationToken,
    pub entity: Arc<Entity>,
    pub writes: Vec<Write>,
}

/// A like flip already visible in the engine, with the write that persists it
#[derive(Clone, Debug)]
pub struct StagedLike {
    pub token: MutationToken,
    pub target: EntityId,
    pub user: UserId,
    pub now_liked: bool,
    pub writes: Vec<Write>,
}

/// Applies local intents to the engine ahead of the remote writes, and settles them
pub struct OptimisticMutator<'a> {
    engine: &'a mut ReconciliationEngine,
}

impl<'a> OptimisticMutator<'a> {
    pub fn new(engine: &'a mut ReconciliationEngine) -> OptimisticMutator<'a> {
        OptimisticMutator { engine }
    }

    pub fn create_post(
        &mut self,
        auth: &dyn Auth,
        category: EntityId,
        title: String,
        content: String,
    ) -> Result<StagedCreate, Error> {
        self.create(auth, EntityKind::Post, category, None, Some(title), content)
    }

    pub fn create_comment(
        &mut self,
        auth: &dyn Auth,
        post: EntityId,
        content: String,
    ) -> Result<StagedCreate, Error> {
        self.create(auth, EntityKind::Comment, post, None, None, content)
    }

    /// The comment must be known locally, as its post locates the reply index
    pub fn create_reply(
        &mut self,
        auth: &dyn Auth,
        comment: EntityId,
        content: String,
    ) -> Result<StagedCreate, Error> {
        // Checked first so that no lookup happens for a signed-out user
        auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let post = self
            .engine
            .entity(&comment)
            .filter(|c| c.kind == EntityKind::Comment)
            .and_then(|c| c.parent_id.clone())
            .ok_or_else(|| Error::NotFound(comment.clone()))?;
        self.create(auth, EntityKind::Reply, comment, Some(post), None, content)
    }

    fn create(
        &mut self,
        auth: &dyn Auth,
        kind: EntityKind,
        parent: EntityId,
        post_id: Option<EntityId>,
        title: Option<String>,
        content: String,
    ) -> Result<StagedCreate, Error> {
        let uid = auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let profile = auth.current_user_profile().unwrap_or_default();
        let entity = Entity {
            id: EntityId::issue(),
            kind,
            parent_id: Some(parent),
            post_id,
            author: profile.author_ref(&uid),
            created_at: now(),
            updated_at: None,
            title,
            content,
            likes: LikeSet::new(),
        };
        let writes = plan_creation(&entity)?;
        let entity = Arc::new(entity);
        let m = PendingMutation::create(entity.clone());
        let token = m.token;
        self.engine.stage(m);
        tracing::debug!(?token, id = %entity.id, ?kind, "staged optimistic insert");
        Ok(StagedCreate {
            token,
            entity,
            writes,
        })
    }

    /// Flips the current user's like on `target`
    ///
    /// The direction comes from the local state at call time, pending flips
    /// included, so that two calls in a row always cancel out.
    pub fn toggle_like(&mut self, auth: &dyn Auth, target: &EntityId) -> Result<StagedLike, Error> {
        let user = auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let current = self
            .engine
            .entity(target)
            .ok_or_else(|| Error::NotFound(target.clone()))?;
        let record = current
            .record_path()
            .ok_or_else(|| Error::NotFound(target.clone()))?;
        let now_liked = !current.likes.contains(&user);
        let path = StorePath::like(&record, &user);
        let writes = vec![match now_liked {
            true => Write::set(path, Value::Bool(true)),
            false => Write::delete(path),
        }];
        let m = PendingMutation::like(target.clone(), user.clone(), now_liked);
        let token = m.token;
        self.engine.stage(m);
        tracing::debug!(?token, %target, %user, now_liked, "staged like flip");
        Ok(StagedLike {
            token,
            target: target.clone(),
            user,
            now_liked,
            writes,
        })
    }

    /// Settles `token` with the outcome of its remote writes
    ///
    /// The pending entry is gone afterwards whatever the outcome. A partial commit
    /// keeps the local effect, since its primary record is already visible remotely.
    pub fn settle(
        &mut self,
        token: &MutationToken,
        outcome: Result<Vec<StorePath>, Error>,
    ) -> Result<(), Error> {
        match outcome {
            Ok(_) => {
                self.engine.settle_committed(token);
                Ok(())
            }
            Err(err @ Error::PartialCommit { .. }) => {
                if let Error::PartialCommit { committed, .. } = &err {
                    if committed.is_empty() {
                        self.engine.settle_failed(token);
                        return Err(err);
                    }
                }
                tracing::warn!(?token, %err, "keeping partially committed mutation");
                self.engine.settle_committed(token);
                Err(err)
            }
            Err(err) => {
                if let Some(m) = self.engine.settle_failed(token) {
                    tracing::info!(?token, kind = ?m.kind(), target = %m.target, %err, "reverted optimistic mutation");
                }
                Err(err)
            }
        }
    }
}

fn now() -> Time {
    // Millisecond precision, like the stored records
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}
