use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::{
    EntityId, StorePath, Time, UserId, DEFAULT_AVATAR_URL, DEFAULT_SIGNATURE, GUEST_NAME,
};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub enum EntityKind {
    Post,
    Comment,
    Reply,
}

impl EntityKind {
    /// Name of the record field holding the parent id
    pub fn parent_field(&self) -> &'static str {
        match self {
            EntityKind::Post => "categoryId",
            EntityKind::Comment => "postId",
            EntityKind::Reply => "commentId",
        }
    }
}

/// Identifies one collection of the local view, and the feed that fills it
///
/// `parent` is the category for posts (`None` meaning every post), the post for
/// comments and the comment for replies.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CollectionKey {
    pub kind: EntityKind,
    pub parent: Option<EntityId>,
}

impl CollectionKey {
    pub fn all_posts() -> CollectionKey {
        CollectionKey {
            kind: EntityKind::Post,
            parent: None,
        }
    }

    pub fn posts_in(category: EntityId) -> CollectionKey {
        CollectionKey {
            kind: EntityKind::Post,
            parent: Some(category),
        }
    }

    pub fn comments_of(post: EntityId) -> CollectionKey {
        CollectionKey {
            kind: EntityKind::Comment,
            parent: Some(post),
        }
    }

    pub fn replies_of(comment: EntityId) -> CollectionKey {
        CollectionKey {
            kind: EntityKind::Reply,
            parent: Some(comment),
        }
    }

    /// Path whose snapshots fill this collection
    ///
    /// Posts of a category are read from the global collection and filtered on
    /// `categoryId`, so that the feed carries full records and not index markers.
    pub fn feed_path(&self) -> StorePath {
        match (&self.kind, &self.parent) {
            (EntityKind::Post, _) => StorePath::posts(),
            (EntityKind::Comment, Some(post)) => StorePath::comments(post),
            (EntityKind::Reply, Some(comment)) => StorePath::replies(comment),
            (EntityKind::Comment, None) => StorePath::root().child("comments"),
            (EntityKind::Reply, None) => StorePath::root().child("replies"),
        }
    }

    /// Returns true if `e` belongs in this collection
    pub fn admits(&self, e: &Entity) -> bool {
        self.kind == e.kind
            && match &self.parent {
                None => true,
                Some(parent) => e.parent_id.as_ref() == Some(parent),
            }
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            None => write!(f, "{:?}(*)", self.kind),
            Some(p) => write!(f, "{:?}({})", self.kind, p),
        }
    }
}

/// Author profile, copied into the record at write time
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRef {
    pub uid: UserId,
    #[serde(rename = "username")]
    pub display_name: String,
    pub avatar_url: String,
    pub signature: String,
}

impl AuthorRef {
    pub fn guest() -> AuthorRef {
        AuthorRef {
            uid: UserId::stub(),
            display_name: String::from(GUEST_NAME),
            avatar_url: String::from(DEFAULT_AVATAR_URL),
            signature: String::from(DEFAULT_SIGNATURE),
        }
    }
}

/// Users who like an entity
///
/// The like count is always `len()`, there is no separately stored counter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LikeSet(BTreeSet<UserId>);

impl LikeSet {
    pub fn new() -> LikeSet {
        LikeSet(BTreeSet::new())
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.0.contains(user)
    }

    /// Sets the membership of `user`, returning whether it changed
    pub fn set(&mut self, user: UserId, member: bool) -> bool {
        match member {
            true => self.0.insert(user),
            false => self.0.remove(&user),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter()
    }

    /// Stored shape: `{ uid: true }`
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|u| (u.0.clone(), Value::Bool(true)))
                .collect::<Map<_, _>>(),
        )
    }
}

impl FromIterator<UserId> for LikeSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> LikeSet {
        LikeSet(iter.into_iter().collect())
    }
}

/// A post, comment or reply
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,

    /// Category for a post, post for a comment, comment for a reply
    pub parent_id: Option<EntityId>,

    /// Only set for replies, whose records live under the comment alone
    pub post_id: Option<EntityId>,

    pub author: AuthorRef,
    pub created_at: Time,
    pub updated_at: Option<Time>,

    /// Posts only
    pub title: Option<String>,
    pub content: String,

    pub likes: LikeSet,
}

impl Entity {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    /// Location of this entity's primary record
    pub fn record_path(&self) -> Option<StorePath> {
        match (self.kind, &self.parent_id) {
            (EntityKind::Post, _) => Some(StorePath::post(&self.id)),
            (EntityKind::Comment, Some(post)) => Some(StorePath::comment(post, &self.id)),
            (EntityKind::Reply, Some(comment)) => Some(StorePath::reply(comment, &self.id)),
            (_, None) => None,
        }
    }

    /// Location of the denormalized index entry pointing to this entity
    pub fn index_path(&self) -> Option<StorePath> {
        match (self.kind, &self.parent_id, &self.post_id) {
            (EntityKind::Post, Some(category), _) => {
                Some(StorePath::category_entry(category, &self.id))
            }
            (EntityKind::Comment, Some(post), _) => Some(StorePath::comment_entry(post, &self.id)),
            (EntityKind::Reply, Some(comment), Some(post)) => {
                Some(StorePath::reply_entry(post, comment, &self.id))
            }
            _ => None,
        }
    }
}
