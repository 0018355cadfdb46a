use crate::{EntityId, UserId};

/// Slash-separated location in the remote tree
#[derive(
    Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> StorePath {
        StorePath(Vec::new())
    }

    pub fn parse(s: &str) -> StorePath {
        StorePath(
            s.split('/')
                .filter(|seg| !seg.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn child(&self, segment: impl AsRef<str>) -> StorePath {
        let mut res = self.clone();
        res.0.push(String::from(segment.as_ref()));
        res
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s as &str)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` is `other` or one of its ancestors
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Returns true if a change at one of the paths is visible from the other
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    pub fn posts() -> StorePath {
        StorePath::root().child("posts")
    }

    pub fn post(post: &EntityId) -> StorePath {
        StorePath::posts().child(post.as_str())
    }

    pub fn category_index(category: &EntityId) -> StorePath {
        StorePath::root()
            .child("categories")
            .child(category.as_str())
            .child("posts")
    }

    pub fn category_entry(category: &EntityId, post: &EntityId) -> StorePath {
        StorePath::category_index(category).child(post.as_str())
    }

    pub fn comments(post: &EntityId) -> StorePath {
        StorePath::root().child("comments").child(post.as_str())
    }

    pub fn comment(post: &EntityId, comment: &EntityId) -> StorePath {
        StorePath::comments(post).child(comment.as_str())
    }

    pub fn comment_entry(post: &EntityId, comment: &EntityId) -> StorePath {
        StorePath::post(post).child("commentIds").child(comment.as_str())
    }

    pub fn replies(comment: &EntityId) -> StorePath {
        StorePath::root().child("replies").child(comment.as_str())
    }

    pub fn reply(comment: &EntityId, reply: &EntityId) -> StorePath {
        StorePath::replies(comment).child(reply.as_str())
    }

    pub fn reply_entry(post: &EntityId, comment: &EntityId, reply: &EntityId) -> StorePath {
        StorePath::comment(post, comment)
            .child("replyIds")
            .child(reply.as_str())
    }

    pub fn like(record: &StorePath, user: &UserId) -> StorePath {
        record.child("likes").child(user.as_str())
    }

    pub fn profile(user: &UserId) -> StorePath {
        StorePath::root()
            .child("users")
            .child(user.as_str())
            .child("profile")
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}
