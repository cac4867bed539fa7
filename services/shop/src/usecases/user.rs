//! User registration. Nothing is asked of another service; a successful
//! registration only publishes the welcome notification.

use super::notify;
use crate::domain::{NewUser, User};
use crate::error::{Rejection, Result};
use crate::ports::UserDirectory;
use relay_runtime::RequestReplyOrchestrator;
use std::sync::Arc;

/// Whether `email` looks deliverable: one `@`, a non-empty local part and a
/// dotted domain, no whitespace.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, rest)| !host.is_empty() && !rest.is_empty() && !rest.ends_with('.'))
}

/// User service.
#[derive(Clone)]
pub struct UserService {
    orchestrator: RequestReplyOrchestrator,
    users: Arc<dyn UserDirectory>,
}

impl UserService {
    /// Create the service.
    #[must_use]
    pub fn new(orchestrator: RequestReplyOrchestrator, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            orchestrator,
            users,
        }
    }

    /// Register a user and send the welcome email.
    ///
    /// # Errors
    ///
    /// [`Rejection::InvalidEmail`], or a repository error such as a duplicate
    /// address.
    pub async fn register(&self, user: NewUser) -> Result<User> {
        if !is_valid_email(&user.email) {
            return Err(Rejection::InvalidEmail(user.email).into());
        }
        let registered = self.users.register(&user).await?;
        notify(&self.orchestrator, &registered.email, "user", "register", &registered.name).await;
        Ok(registered)
    }
}
