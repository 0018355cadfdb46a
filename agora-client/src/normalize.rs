use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::api::{
    fallback_time, AuthorRef, CollectionKey, Entity, EntityId, EntityKind, Error, LikeSet, Time,
    UserId,
};

/// Turns a raw record, as found under `key` in the feed of `collection`, into an `Entity`
///
/// Only a missing identity is fatal. Every other gap is filled with a default, and
/// the like set is rebuilt from whatever membership shape the record uses.
pub fn normalize(key: &str, raw: &Value, collection: &CollectionKey) -> Result<Entity, Error> {
    let path = collection.feed_path().child(key);
    let rec = raw
        .as_object()
        .ok_or_else(|| Error::malformed(path.clone(), "record is not an object"))?;

    let id = match key.is_empty() {
        false => EntityId(String::from(key)),
        true => match string_field(rec, "id") {
            Some(id) => EntityId(id),
            None => return Err(Error::malformed(path, "record has no id")),
        },
    };

    let kind = collection.kind;
    let recorded_parent = string_field(rec, kind.parent_field()).map(EntityId);
    let parent_id = match kind {
        // Category views filter the global post collection on the stored category
        EntityKind::Post => recorded_parent,
        // Comments and replies are located by the path they are stored under
        EntityKind::Comment | EntityKind::Reply => {
            collection.parent.clone().or(recorded_parent)
        }
    };
    let post_id = match kind {
        EntityKind::Reply => string_field(rec, "postId").map(EntityId),
        _ => None,
    };

    Ok(Entity {
        id,
        kind,
        parent_id,
        post_id,
        author: normalize_author(rec),
        created_at: parse_time(rec.get("createdAt")).unwrap_or_else(fallback_time),
        updated_at: parse_time(rec.get("updatedAt")),
        title: string_field(rec, "title"),
        content: string_field(rec, "content")
            .or_else(|| string_field(rec, "text"))
            .unwrap_or_default(),
        likes: normalize_likes(rec.get("likes")),
    })
}

/// Canonical stored shape of `e`
pub fn to_record(e: &Entity) -> Value {
    let mut rec = Map::new();
    rec.insert(String::from("id"), Value::String(e.id.0.clone()));
    rec.insert(String::from("content"), Value::String(e.content.clone()));
    if let Some(title) = &e.title {
        rec.insert(String::from("title"), Value::String(title.clone()));
    }
    if let Some(parent) = &e.parent_id {
        rec.insert(
            String::from(e.kind.parent_field()),
            Value::String(parent.0.clone()),
        );
    }
    if let (EntityKind::Reply, Some(post)) = (e.kind, &e.post_id) {
        rec.insert(String::from("postId"), Value::String(post.0.clone()));
    }
    rec.insert(
        String::from("author"),
        json!({
            "uid": e.author.uid.0,
            "username": e.author.display_name,
            "avatarUrl": e.author.avatar_url,
            "signature": e.author.signature,
        }),
    );
    rec.insert(
        String::from("createdAt"),
        Value::from(e.created_at.timestamp_millis()),
    );
    if let Some(t) = e.updated_at {
        rec.insert(String::from("updatedAt"), Value::from(t.timestamp_millis()));
    }
    if !e.likes.is_empty() {
        rec.insert(String::from("likes"), e.likes.to_value());
    }
    Value::Object(rec)
}

fn string_field(rec: &Map<String, Value>, name: &str) -> Option<String> {
    rec.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn normalize_author(rec: &Map<String, Value>) -> AuthorRef {
    let nested = rec
        .get("author")
        .or_else(|| rec.get("user"))
        .and_then(Value::as_object);
    let from_nested = |names: &[&str]| {
        nested.and_then(|a| names.iter().find_map(|n| string_field(a, n)))
    };
    let guest = AuthorRef::guest();
    AuthorRef {
        uid: from_nested(&["uid", "id"])
            .or_else(|| string_field(rec, "userId"))
            .or_else(|| string_field(rec, "authorId"))
            .map(UserId)
            .unwrap_or(guest.uid),
        display_name: from_nested(&["username", "displayName"])
            .or_else(|| string_field(rec, "username"))
            .unwrap_or(guest.display_name),
        avatar_url: from_nested(&["avatarUrl", "avatar"])
            .or_else(|| string_field(rec, "userAvatar"))
            .unwrap_or(guest.avatar_url),
        signature: from_nested(&["signature"]).unwrap_or(guest.signature),
    }
}

fn normalize_likes(raw: Option<&Value>) -> LikeSet {
    match raw {
        None | Some(Value::Null) => LikeSet::new(),
        Some(Value::Object(members)) => members
            .iter()
            .filter(|(_, marker)| !matches!(marker, Value::Null | Value::Bool(false)))
            .map(|(uid, _)| UserId(uid.clone()))
            .collect(),
        // Legacy shape: array of user ids
        Some(Value::Array(uids)) => uids
            .iter()
            .filter_map(Value::as_str)
            .map(|uid| UserId(String::from(uid)))
            .collect(),
        Some(counter) => {
            tracing::debug!(?counter, "ignoring like counter that carries no membership");
            LikeSet::new()
        }
    }
}

fn from_millis(ms: i64) -> Option<Time> {
    Utc.timestamp_millis_opt(ms).single()
}

fn parse_time(raw: Option<&Value>) -> Option<Time> {
    match raw? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_millis),
        Value::String(s) => s.parse::<i64>().ok().and_then(from_millis).or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        }),
        // Includes unresolved server-timestamp placeholders
        _ => None,
    }
}
