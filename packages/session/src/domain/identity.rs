//! Identity collaborator.
//!
//! Authentication and token storage live outside the session layer; all it
//! needs is the id of the user currently logged in.

use super::UserId;

/// Source of the current user's identity
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    /// The user the session acts for
    fn current_user_id(&self) -> UserId;
}

/// Fixed identity, for CLIs and tests
#[derive(Debug, Clone)]
pub struct StaticIdentity(UserId);

impl StaticIdentity {
    /// Create a provider that always answers `user_id`
    pub fn new(user_id: UserId) -> Self {
        Self(user_id)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> UserId {
        self.0.clone()
    }
}
