use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
}

impl Identity {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
        }
    }
}

/// Source of the acting user's identity for likes, bookmarks and comments.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Identity;

    fn current_user_id(&self) -> String {
        self.current_identity().id
    }
}

/// Holds the active identity; switching takes effect on the next action.
pub struct Session {
    active: RwLock<Identity>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            active: RwLock::new(identity),
        }
    }

    pub fn switch(&self, identity: Identity) {
        tracing::info!(user = %identity.id, "switched active identity");
        *self.active.write() = identity;
    }
}

impl IdentityProvider for Session {
    fn current_identity(&self) -> Identity {
        self.active.read().clone()
    }
}
