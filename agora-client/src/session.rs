use crate::api::{Auth, Role, Store, StorePath, UserId, UserProfile};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub user: UserId,
    pub profile: UserProfile,
}

/// Identity of the acting user, handed explicitly to every mutating call
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    session: Option<Session>,
}

impl SessionContext {
    /// Signed-out context
    pub fn new() -> SessionContext {
        SessionContext { session: None }
    }

    pub fn signed_in(user: UserId, profile: UserProfile) -> SessionContext {
        SessionContext {
            session: Some(Session { user, profile }),
        }
    }

    /// Signs `user` in, with the profile stored for them
    ///
    /// A missing or unreadable profile is not an error: the default profile is used,
    /// as for a user who never filled theirs in.
    pub async fn sign_in<S: Store + ?Sized>(&mut self, store: &S, user: UserId) -> &Session {
        let profile = match store.read(&StorePath::profile(&user)).await {
            Ok(Some(raw)) => match serde_json::from_value::<UserProfile>(raw) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(%user, %err, "unreadable profile, using defaults");
                    UserProfile::default()
                }
            },
            Ok(None) => UserProfile::default(),
            Err(err) => {
                tracing::warn!(%user, %err, "failed fetching profile, using defaults");
                UserProfile::default()
            }
        };
        self.sign_in_with(user, profile)
    }

    pub fn sign_in_with(&mut self, user: UserId, profile: UserProfile) -> &Session {
        tracing::info!(%user, role = ?profile.role, "signed in");
        self.session.insert(Session { user, profile })
    }

    pub fn sign_out(&mut self) {
        if let Some(s) = self.session.take() {
            tracing::info!(user = %s.user, "signed out");
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_superuser(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.profile.role == Role::Superuser)
            .unwrap_or(false)
    }
}

impl Auth for SessionContext {
    fn current_user_id(&self) -> Option<UserId> {
        self.session.as_ref().map(|s| s.user.clone())
    }

    fn current_user_profile(&self) -> Option<UserProfile> {
        self.session.as_ref().map(|s| s.profile.clone())
    }
}
