use std::fmt;

/// Role handed out by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// The current actor, as resolved by the identity provider.
/// `user_id` is the stable identity shipments are keyed by (the login email).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: Role,
}

impl ActorIdentity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            role,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the user id
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
