use chrono::{TimeZone, Utc};

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod auth;
pub use auth::{Auth, Role, UserProfile};

mod entity;
pub use entity::{AuthorRef, CollectionKey, Entity, EntityKind, LikeSet};

mod error;
pub use error::Error;

mod path;
pub use path::StorePath;

mod store;
pub use store::{Feed, FeedId, Store, Write};

pub const GUEST_NAME: &str = "Guest";
pub const DEFAULT_AVATAR_URL: &str = "/image/empty_avatar.png";
pub const DEFAULT_SIGNATURE: &str = "New User";

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub String);

impl UserId {
    pub fn stub() -> UserId {
        UserId(String::from("guest"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store key of a post, comment, reply or category
#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct EntityId(pub String);

impl EntityId {
    /// Issue a fresh id on the client side, to be reused as the store key so that
    /// the feed echo of an optimistic insert can be recognized
    pub fn issue() -> EntityId {
        EntityId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> EntityId {
        EntityId(String::from(s))
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> UserId {
        UserId(String::from(s))
    }
}

/// Timestamp used when a record carries no usable creation date
pub fn fallback_time() -> Time {
    Utc.timestamp_millis_opt(0).single().unwrap_or(Time::MIN_UTC)
}
