use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::{Map, Value};

use crate::{Error, StorePath};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FeedId(pub u64);

/// Stream of full snapshots of the value at one path
///
/// `None` means nothing is stored there. Dropping the feed stops delivery on the
/// store's next change; `Store::unsubscribe` stops it immediately.
#[derive(Debug)]
pub struct Feed {
    pub id: FeedId,
    pub path: StorePath,
    pub receiver: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Feed {
    /// Returns the next snapshot if one is already queued
    pub fn try_next(&mut self) -> Option<Option<Value>> {
        match self.receiver.try_next() {
            Ok(Some(snapshot)) => Some(snapshot),
            // Channel closed or nothing queued
            Ok(None) | Err(_) => None,
        }
    }
}

/// One physical write of a logical mutation
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Write {
    pub path: StorePath,

    /// `Value::Null` deletes the location
    pub value: Value,
}

impl Write {
    pub fn set(path: StorePath, value: Value) -> Write {
        Write { path, value }
    }

    pub fn delete(path: StorePath) -> Write {
        Write {
            path,
            value: Value::Null,
        }
    }
}

/// The remote tree-structured store
///
/// Everything runs on a single logical thread, hence the `?Send`.
#[async_trait(?Send)]
pub trait Store {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, Error>;

    /// Full overwrite of the value at `path`
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), Error>;

    /// Merge `fields` into the object at `path`
    async fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), Error>;

    /// Delivers the current value, then a new full value on every change visible at `path`
    fn subscribe(&self, path: &StorePath) -> Result<Feed, Error>;

    /// Stops delivery for `feed`; unknown ids are ignored
    fn unsubscribe(&self, feed: FeedId);
}
