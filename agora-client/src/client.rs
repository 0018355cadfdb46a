use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::Utc;
use futures::channel::oneshot;
use serde_json::{Map, Value};

use crate::{
    api::{
        Auth, CollectionKey, Entity, EntityId, Error, Role, Store, StorePath, UserId, Write,
    },
    normalize, plan_deletion, CollectionState, DualWriteCoordinator, MergeReport, MutationToken,
    ReconciliationEngine, StagedCreate, SubscriptionHandle, SubscriptionManager,
};

/// Serializes the like writes of each (target, user) pair
///
/// Like echoes are matched by membership only, so writes of one pair must land in
/// the order they were issued.
#[derive(Debug, Default)]
struct LikeQueue {
    /// Calls of each pair in issue order, the head one writing
    queues: HashMap<(EntityId, UserId), VecDeque<Turn>>,
}

#[derive(Debug)]
struct Turn {
    token: MutationToken,
    wake: Option<oneshot::Sender<()>>,
}

impl LikeQueue {
    /// Queues `token`, returning what to wait on if an earlier write of `pair` is in flight
    fn enter(
        &mut self,
        pair: (EntityId, UserId),
        token: MutationToken,
    ) -> Option<oneshot::Receiver<()>> {
        let queue = self.queues.entry(pair).or_default();
        if queue.is_empty() {
            queue.push_back(Turn { token, wake: None });
            return None;
        }
        let (tx, rx) = oneshot::channel();
        queue.push_back(Turn {
            token,
            wake: Some(tx),
        });
        Some(rx)
    }

    /// Removes `token` wherever it is queued, handing the turn over if it was writing
    fn leave(&mut self, pair: &(EntityId, UserId), token: MutationToken) {
        let queue = match self.queues.get_mut(pair) {
            Some(q) => q,
            None => return,
        };
        let was_head = queue.front().map(|t| t.token == token).unwrap_or(false);
        queue.retain(|t| t.token != token);
        if queue.is_empty() {
            self.queues.remove(pair);
            return;
        }
        if was_head {
            if let Some(tx) = queue.front_mut().and_then(|t| t.wake.take()) {
                // The waiting call may have been dropped
                let _ = tx.send(());
            }
        }
    }
}

/// Undoes the bookkeeping of a call dropped before its write settled
struct InFlight<'a, S: Store> {
    client: &'a ForumClient<S>,
    token: MutationToken,
    like: Option<(EntityId, UserId)>,
    settled: bool,
}

impl<'a, S: Store> InFlight<'a, S> {
    fn new(client: &'a ForumClient<S>, token: MutationToken) -> InFlight<'a, S> {
        InFlight {
            client,
            token,
            like: None,
            settled: false,
        }
    }

    /// Marks the write as done, ending the like turn if any
    fn finish(mut self) {
        self.settled = true;
    }
}

impl<'a, S: Store> Drop for InFlight<'a, S> {
    fn drop(&mut self) {
        if let Some(pair) = &self.like {
            self.client.likes.borrow_mut().leave(pair, self.token);
        }
        if !self.settled {
            self.client.engine.borrow_mut().abandon(&self.token);
        }
    }
}

/// Local view of the forum, kept in sync with a remote `Store`
///
/// Everything runs on one logical thread: feeds are merged by `pump`, intents are
/// applied locally at once and settled when their remote writes complete.
pub struct ForumClient<S: Store> {
    store: S,
    engine: RefCell<ReconciliationEngine>,
    subscriptions: RefCell<SubscriptionManager>,
    likes: RefCell<LikeQueue>,
}

impl<S: Store> ForumClient<S> {
    pub fn new(store: S) -> ForumClient<S> {
        ForumClient {
            store,
            engine: RefCell::new(ReconciliationEngine::new()),
            subscriptions: RefCell::new(SubscriptionManager::new()),
            likes: RefCell::new(LikeQueue::default()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self, key: CollectionKey) -> Result<SubscriptionHandle, Error> {
        let handle = self
            .subscriptions
            .borrow_mut()
            .subscribe(&self.store, key)?;
        self.engine.borrow_mut().begin_loading(handle.clone());
        Ok(handle)
    }

    /// Idempotent; what was received stays visible
    pub fn release(&self, handle: &SubscriptionHandle) -> bool {
        let released = self
            .subscriptions
            .borrow_mut()
            .release(&self.store, handle);
        self.engine.borrow_mut().detach(handle);
        released
    }

    /// Releases `handle` and brings its collection back to `Empty`
    pub fn release_and_clear(&self, handle: &SubscriptionHandle) -> bool {
        let released = self.release(handle);
        let cleared = self.engine.borrow_mut().clear(handle);
        released || cleared
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.borrow().live_count()
    }

    /// Merges every snapshot delivered so far, returning how many there were
    pub fn pump(&self) -> usize {
        let snapshots = self.subscriptions.borrow_mut().drain();
        let num = snapshots.len();
        let mut engine = self.engine.borrow_mut();
        for (handle, snapshot) in snapshots {
            engine.apply_snapshot(&handle, snapshot);
        }
        num
    }

    /// Merges one snapshot as if delivered by the feed of `handle`
    pub fn deliver(&self, handle: &SubscriptionHandle, snapshot: Option<Value>) -> MergeReport {
        self.engine.borrow_mut().apply_snapshot(handle, snapshot)
    }

    pub fn comments_for(&self, post: &EntityId) -> Vec<Arc<Entity>> {
        self.view(&CollectionKey::comments_of(post.clone()))
    }

    pub fn replies_for(&self, comment: &EntityId) -> Vec<Arc<Entity>> {
        self.view(&CollectionKey::replies_of(comment.clone()))
    }

    pub fn posts_in(&self, category: &EntityId) -> Vec<Arc<Entity>> {
        self.view(&CollectionKey::posts_in(category.clone()))
    }

    pub fn all_posts(&self) -> Vec<Arc<Entity>> {
        self.view(&CollectionKey::all_posts())
    }

    pub fn view(&self, key: &CollectionKey) -> Vec<Arc<Entity>> {
        self.engine.borrow().view(key)
    }

    pub fn entity(&self, id: &EntityId) -> Option<Arc<Entity>> {
        self.engine.borrow().entity(id)
    }

    pub fn like_count_for(&self, id: &EntityId) -> Option<usize> {
        self.engine.borrow().like_count_for(id)
    }

    pub fn is_liked_by(&self, id: &EntityId, user: &UserId) -> bool {
        self.engine.borrow().is_liked_by(id, user)
    }

    pub fn is_pending(&self, id: &EntityId) -> bool {
        self.engine.borrow().is_pending(id)
    }

    pub fn state_of(&self, key: &CollectionKey) -> CollectionState {
        self.engine.borrow().state_of(key)
    }

    pub fn pending_count(&self) -> usize {
        self.engine.borrow().pending().len()
    }

    pub async fn create_post(
        &self,
        auth: &dyn Auth,
        category: EntityId,
        title: String,
        content: String,
    ) -> Result<Arc<Entity>, Error> {
        let staged = self
            .engine
            .borrow_mut()
            .mutator()
            .create_post(auth, category, title, content)?;
        self.submit(staged).await
    }

    pub async fn create_comment(
        &self,
        auth: &dyn Auth,
        post: EntityId,
        content: String,
    ) -> Result<Arc<Entity>, Error> {
        let staged = self
            .engine
            .borrow_mut()
            .mutator()
            .create_comment(auth, post, content)?;
        self.submit(staged).await
    }

    pub async fn create_reply(
        &self,
        auth: &dyn Auth,
        comment: EntityId,
        content: String,
    ) -> Result<Arc<Entity>, Error> {
        let staged = self
            .engine
            .borrow_mut()
            .mutator()
            .create_reply(auth, comment, content)?;
        self.submit(staged).await
    }

    async fn submit(&self, staged: StagedCreate) -> Result<Arc<Entity>, Error> {
        let in_flight = InFlight::new(self, staged.token);
        let outcome = DualWriteCoordinator::new(&self.store)
            .commit(staged.writes)
            .await;
        in_flight.finish();
        self.engine
            .borrow_mut()
            .mutator()
            .settle(&staged.token, outcome)?;
        Ok(staged.entity)
    }

    /// Flips the current user's like on `target`, returning whether it is now liked
    pub async fn toggle_like(&self, auth: &dyn Auth, target: &EntityId) -> Result<bool, Error> {
        let staged = self
            .engine
            .borrow_mut()
            .mutator()
            .toggle_like(auth, target)?;
        let pair = (staged.target.clone(), staged.user.clone());
        let turn = self.likes.borrow_mut().enter(pair.clone(), staged.token);
        let mut in_flight = InFlight::new(self, staged.token);
        in_flight.like = Some(pair);
        if let Some(turn) = turn {
            // The sender only goes away along with its own turn
            let _ = turn.await;
        }
        let outcome = DualWriteCoordinator::new(&self.store)
            .commit(staged.writes)
            .await;
        in_flight.finish();
        self.engine
            .borrow_mut()
            .mutator()
            .settle(&staged.token, outcome)?;
        Ok(staged.now_liked)
    }

    /// Changes the title and content of a post
    ///
    /// This is a single-location patch, so it is not applied optimistically: the
    /// change becomes visible through the feed.
    pub async fn update_post(
        &self,
        auth: &dyn Auth,
        post: &EntityId,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<(), Error> {
        auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let current = self.fetch_post(post).await?;
        check_may_modify(auth, &current)?;
        let mut fields = Map::new();
        if let Some(title) = title {
            fields.insert(String::from("title"), Value::String(title));
        }
        if let Some(content) = content {
            fields.insert(String::from("content"), Value::String(content));
        }
        fields.insert(
            String::from("updatedAt"),
            Value::from(Utc::now().timestamp_millis()),
        );
        self.store.patch(&StorePath::post(post), fields).await
    }

    pub async fn delete_post(&self, auth: &dyn Auth, post: &EntityId) -> Result<(), Error> {
        auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let current = self.fetch_post(post).await?;
        check_may_modify(auth, &current)?;
        self.delete(&current).await
    }

    pub async fn delete_comment(
        &self,
        auth: &dyn Auth,
        post: &EntityId,
        comment: &EntityId,
    ) -> Result<(), Error> {
        auth.current_user_id().ok_or(Error::Unauthenticated)?;
        let raw = self
            .store
            .read(&StorePath::comment(post, comment))
            .await?
            .ok_or_else(|| Error::NotFound(comment.clone()))?;
        let current = normalize(
            comment.as_str(),
            &raw,
            &CollectionKey::comments_of(post.clone()),
        )?;
        check_may_modify(auth, &current)?;
        self.delete(&current).await
    }

    async fn delete(&self, e: &Entity) -> Result<(), Error> {
        DualWriteCoordinator::new(&self.store)
            .commit(plan_deletion(e)?)
            .await?;
        tracing::info!(id = %e.id, kind = ?e.kind, "deleted");
        Ok(())
    }

    /// Reads one post from the store, bypassing the local view
    pub async fn fetch_post(&self, post: &EntityId) -> Result<Entity, Error> {
        let raw = self
            .store
            .read(&StorePath::post(post))
            .await?
            .ok_or_else(|| Error::NotFound(post.clone()))?;
        normalize(post.as_str(), &raw, &CollectionKey::all_posts())
    }

    /// Reads the posts of `category` through its index, newest first
    pub async fn fetch_posts_by_category(&self, category: &EntityId) -> Result<Vec<Entity>, Error> {
        let index = match self.store.read(&StorePath::category_index(category)).await? {
            Some(Value::Object(index)) => index,
            Some(_) | None => return Ok(Vec::new()),
        };
        let mut res = Vec::with_capacity(index.len());
        for id in index.keys() {
            let id = EntityId(id.clone());
            match self.fetch_post(&id).await {
                Ok(p) => res.push(p),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(%category, post = %id, "index entry points to missing post")
                }
                Err(Error::MalformedRecord { path, reason }) => {
                    tracing::warn!(%path, %reason, "skipping malformed indexed post")
                }
                Err(e) => return Err(e),
            }
        }
        res.sort_unstable_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(res)
    }

    /// Applies again the writes a `PartialCommit` reported as remaining
    pub async fn retry_writes(&self, remaining: Vec<Write>) -> Result<Vec<StorePath>, Error> {
        DualWriteCoordinator::new(&self.store).commit(remaining).await
    }
}

impl<S: Store> Drop for ForumClient<S> {
    fn drop(&mut self) {
        self.subscriptions.get_mut().release_all(&self.store);
    }
}

fn check_may_modify(auth: &dyn Auth, e: &Entity) -> Result<(), Error> {
    let user = auth.current_user_id().ok_or(Error::Unauthenticated)?;
    let is_superuser = auth
        .current_user_profile()
        .map(|p| p.role == Role::Superuser)
        .unwrap_or(false);
    if e.author.uid != user && !is_superuser {
        tracing::debug!(%user, id = %e.id, kind = ?e.kind, "refusing change to someone else's entity");
        return Err(Error::PermissionDenied);
    }
    Ok(())
}
