use futures::Future;

use crate::domain::User;

// Mods

pub mod memory;

// Types

pub type Result<T = ()> = std::result::Result<T, Error>;

// Errors

#[derive(Debug, thiserror::Error)]
#[error("user store error: {0}")]
pub struct Error(#[source] pub Box<dyn std::error::Error + Send + Sync>);

// Traits

/// Where users and their credentials live.
///
/// Emails are matched case-insensitively.
#[cfg_attr(test, mockall::automock)]
pub trait UserStore: Send + Sync {
    fn find_by_email(&self, email: &str) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Inserts `user` unless its email is taken. Returns whether the user was inserted.
    fn insert(&self, user: &User) -> impl Future<Output = Result<bool>> + Send;

    /// Swaps the credential of the user identified by `email`. Returns whether the user exists.
    fn replace_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<bool>> + Send;
}
