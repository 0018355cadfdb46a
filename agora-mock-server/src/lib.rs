use std::{cell::RefCell, rc::Rc};

use agora_client::api::{Error, Feed, FeedId, Store, StorePath};
use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::{Map, Value};
use tokio::sync::watch;

/// In-memory tree store, relaying full snapshots to its feeds as writes land
///
/// Clones share the same tree.
#[derive(Clone, Debug, Default)]
pub struct MockStore(Rc<RefCell<Tree>>);

#[derive(Debug, Default)]
struct Tree {
    root: Value,
    feeds: Vec<FeedSender>,
    next_feed: u64,
    failing: Vec<(StorePath, String)>,
    offline: bool,
    gate: Option<watch::Receiver<bool>>,

    /// Paths of the applied writes, in order
    log: Vec<StorePath>,
}

#[derive(Debug)]
struct FeedSender {
    id: FeedId,
    path: StorePath,
    sender: mpsc::UnboundedSender<Option<Value>>,
}

/// Holds every write of a `MockStore` until opened or dropped
#[derive(Debug)]
pub struct WriteGate(watch::Sender<bool>);

impl WriteGate {
    pub fn open(self) {
        // Nobody waiting is fine
        let _ = self.0.send(true);
    }
}

impl Tree {
    fn get(&self, path: &StorePath) -> Option<&Value> {
        let mut cur = &self.root;
        for seg in path.segments() {
            cur = cur.as_object()?.get(seg)?;
        }
        match cur {
            Value::Null => None,
            v => Some(v),
        }
    }

    fn check_online(&self) -> Result<(), Error> {
        match self.offline {
            true => Err(Error::unavailable("store is offline")),
            false => Ok(()),
        }
    }

    fn check_writable(&self, path: &StorePath) -> Result<(), Error> {
        self.check_online()?;
        match self
            .failing
            .iter()
            .find(|(prefix, _)| prefix.is_prefix_of(path))
        {
            Some((_, reason)) => Err(Error::unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn set(&mut self, path: &StorePath, value: Value) {
        let segs = path.segments();
        match (value.is_null(), segs.is_empty()) {
            (true, true) => self.root = Value::Object(Map::new()),
            (true, false) => remove(&mut self.root, segs),
            (false, _) => {
                let mut cur = &mut self.root;
                for seg in segs {
                    cur = ensure_object(cur)
                        .entry(seg.clone())
                        .or_insert(Value::Null);
                }
                *cur = value;
            }
        }
        self.log.push(path.clone());
    }

    /// Sends the new value to every feed that can see a change at `changed`
    fn relay(&mut self, changed: &StorePath) {
        let mut feeds = std::mem::take(&mut self.feeds);
        feeds.retain_mut(|f| {
            if !f.path.overlaps(changed) {
                return !f.sender.is_closed();
            }
            let snapshot = self.get(&f.path).cloned();
            matches!(f.sender.unbounded_send(snapshot), Ok(()))
        });
        self.feeds = feeds;
    }
}

fn ensure_object(v: &mut Value) -> &mut Map<String, Value> {
    match v {
        Value::Object(o) => o,
        other => {
            *other = Value::Object(Map::new());
            ensure_object(other)
        }
    }
}

/// Removes the value at `segs`, then the objects this left empty
fn remove(cur: &mut Value, segs: &[String]) {
    let obj = match cur {
        Value::Object(obj) => obj,
        _ => return,
    };
    match segs {
        [] => (),
        [last] => {
            obj.remove(last);
        }
        [first, rest @ ..] => {
            let emptied = match obj.get_mut(first) {
                Some(child) => {
                    remove(child, rest);
                    child.as_object().map(|o| o.is_empty()).unwrap_or(false)
                }
                None => false,
            };
            if emptied {
                obj.remove(first);
            }
        }
    }
}

impl MockStore {
    pub fn new() -> MockStore {
        MockStore::import(Value::Object(Map::new()))
    }

    /// Store initially holding `root`
    pub fn import(root: Value) -> MockStore {
        MockStore(Rc::new(RefCell::new(Tree {
            root,
            ..Tree::default()
        })))
    }

    pub fn export(&self) -> Value {
        self.0.borrow().root.clone()
    }

    /// Synchronous read, for test assertions
    pub fn test_get(&self, path: &StorePath) -> Option<Value> {
        self.0.borrow().get(path).cloned()
    }

    /// Writes under `prefix` fail with `Error::RemoteUnavailable(reason)` until `heal`
    pub fn fail_writes_under(&self, prefix: StorePath, reason: impl Into<String>) {
        self.0.borrow_mut().failing.push((prefix, reason.into()));
    }

    pub fn go_offline(&self) {
        tracing::debug!("mock store going offline");
        self.0.borrow_mut().offline = true;
    }

    /// Back online, with no injected failure left
    pub fn heal(&self) {
        let mut tree = self.0.borrow_mut();
        tree.offline = false;
        tree.failing.clear();
    }

    /// Makes every write wait until the returned gate is opened
    pub fn hold_writes(&self) -> WriteGate {
        let (sender, receiver) = watch::channel(false);
        self.0.borrow_mut().gate = Some(receiver);
        WriteGate(sender)
    }

    /// Feeds still able to deliver
    pub fn live_feed_count(&self) -> usize {
        self.0
            .borrow()
            .feeds
            .iter()
            .filter(|f| !f.sender.is_closed())
            .count()
    }

    pub fn write_log(&self) -> Vec<StorePath> {
        self.0.borrow().log.clone()
    }

    async fn pass_gate(&self) {
        let gate = self.0.borrow().gate.clone();
        if let Some(mut gate) = gate {
            loop {
                let open = *gate.borrow();
                if open || gate.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn apply(&self, path: &StorePath, value: Value) -> Result<(), Error> {
        let mut tree = self.0.borrow_mut();
        tree.check_writable(path)?;
        tree.set(path, value);
        tree.relay(path);
        Ok(())
    }
}

#[async_trait(?Send)]
impl Store for MockStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, Error> {
        let tree = self.0.borrow();
        tree.check_online()?;
        Ok(tree.get(path).cloned())
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), Error> {
        self.pass_gate().await;
        self.apply(path, value)
    }

    async fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), Error> {
        self.pass_gate().await;
        let mut tree = self.0.borrow_mut();
        tree.check_writable(path)?;
        for (field, value) in fields {
            tree.set(&path.child(field), value);
        }
        tree.relay(path);
        Ok(())
    }

    fn subscribe(&self, path: &StorePath) -> Result<Feed, Error> {
        let mut tree = self.0.borrow_mut();
        tree.check_online()?;
        let (sender, receiver) = mpsc::unbounded();
        let id = FeedId(tree.next_feed);
        tree.next_feed += 1;
        // Cannot fail, the receiver is alive
        let _ = sender.unbounded_send(tree.get(path).cloned());
        tree.feeds.push(FeedSender {
            id,
            path: path.clone(),
            sender,
        });
        Ok(Feed {
            id,
            path: path.clone(),
            receiver,
        })
    }

    fn unsubscribe(&self, feed: FeedId) {
        self.0.borrow_mut().feeds.retain(|f| f.id != feed);
    }
}
