use crate::{AuthorRef, UserId, DEFAULT_AVATAR_URL, DEFAULT_SIGNATURE, GUEST_NAME};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Superuser,
}

/// Public profile, as stored under `users/{uid}/profile`
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_avatar_url")]
    pub avatar_url: String,

    #[serde(default = "default_signature")]
    pub signature: String,

    #[serde(default)]
    pub role: Role,
}

fn default_username() -> String {
    String::from(GUEST_NAME)
}

fn default_avatar_url() -> String {
    String::from(DEFAULT_AVATAR_URL)
}

fn default_signature() -> String {
    String::from(DEFAULT_SIGNATURE)
}

impl Default for UserProfile {
    fn default() -> UserProfile {
        UserProfile {
            username: default_username(),
            avatar_url: default_avatar_url(),
            signature: default_signature(),
            role: Role::User,
        }
    }
}

impl UserProfile {
    /// Snapshot of this profile to be embedded in a record written by `uid`
    pub fn author_ref(&self, uid: &UserId) -> AuthorRef {
        AuthorRef {
            uid: uid.clone(),
            display_name: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Supplies the identity used to stamp writes
pub trait Auth {
    fn current_user_id(&self) -> Option<UserId>;
    fn current_user_profile(&self) -> Option<UserProfile>;
}
