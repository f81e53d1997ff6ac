//! Registration token resolution.

use crate::error::{PipelineError, Result};
use crate::store::ProfileStore;
use crate::types::UserId;
use std::fmt;
use std::sync::Arc;

/// A push registration token bound to its owner.
///
/// Construction goes through the resolver or an explicit `new`, so a token
/// in hand is always non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationToken {
    owner: UserId,
    token: String,
}

impl RegistrationToken {
    pub fn new(owner: UserId, token: impl Into<String>) -> Self {
        Self {
            owner,
            token: token.into(),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistrationToken({})", self.owner)
    }
}

/// Resolves a user to their registration token.
///
/// Lookups are read-only point reads; resolving the same user twice returns
/// the same answer as long as the store is unchanged.
#[derive(Clone)]
pub struct TokenResolver {
    store: Arc<dyn ProfileStore>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Look up the registration token for a user.
    ///
    /// `Ok(None)` means the user exists without a registered device (token
    /// field absent or empty), a normal outcome. A user with no record at
    /// all is an `UnknownUser` error.
    pub fn resolve(&self, owner: &UserId) -> Result<Option<RegistrationToken>> {
        let profile = self
            .store
            .profile(owner)?
            .ok_or_else(|| PipelineError::UnknownUser(owner.clone()))?;

        Ok(profile
            .notification_token
            .filter(|token| !token.is_empty())
            .map(|token| RegistrationToken::new(owner.clone(), token)))
    }
}
