use serde_json::Value;

use crate::{
    api::{Entity, Error, Store, StorePath, Write},
    to_record,
};

/// Applies the physical writes of one logical mutation, in order
///
/// The store has no transaction spanning several locations: a failure midway leaves
/// the earlier writes in place and is reported as `Error::PartialCommit`.
pub struct DualWriteCoordinator<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> DualWriteCoordinator<'a, S> {
    pub fn new(store: &'a S) -> DualWriteCoordinator<'a, S> {
        DualWriteCoordinator { store }
    }

    /// Returns the written locations, in order
    pub async fn commit(&self, writes: Vec<Write>) -> Result<Vec<StorePath>, Error> {
        let mut committed = Vec::with_capacity(writes.len());
        let mut writes = writes.into_iter();
        while let Some(w) = writes.next() {
            if let Err(err) = self.store.write(&w.path, w.value.clone()).await {
                if committed.is_empty() {
                    return Err(err);
                }
                let failed = w.path.clone();
                tracing::warn!(?committed, %failed, %err, "multi-location write partially committed");
                return Err(Error::PartialCommit {
                    committed,
                    failed,
                    remaining: std::iter::once(w).chain(writes).collect(),
                    reason: err.to_string(),
                });
            }
            tracing::trace!(path = %w.path, "committed write");
            committed.push(w.path);
        }
        Ok(committed)
    }
}

fn locations(e: &Entity) -> Result<(StorePath, StorePath), Error> {
    let record = e.record_path().ok_or_else(|| Error::NotFound(e.id.clone()))?;
    let index = e.index_path().ok_or_else(|| {
        Error::malformed(record.clone(), "cannot locate the index entry of this record")
    })?;
    Ok((record, index))
}

/// Primary record first, so that the index never points to a missing record
pub fn plan_creation(e: &Entity) -> Result<Vec<Write>, Error> {
    let (record, index) = locations(e)?;
    Ok(vec![
        Write::set(record, to_record(e)),
        Write::set(index, Value::Bool(true)),
    ])
}

/// Index entry first, then the primary record
///
/// A record that was never indexed, like an uncategorized post, only has its
/// primary location removed.
pub fn plan_deletion(e: &Entity) -> Result<Vec<Write>, Error> {
    let record = e.record_path().ok_or_else(|| Error::NotFound(e.id.clone()))?;
    match e.index_path() {
        Some(index) => Ok(vec![Write::delete(index), Write::delete(record)]),
        None => {
            tracing::debug!(%record, "deleting record that has no index entry");
            Ok(vec![Write::delete(record)])
        }
    }
}
