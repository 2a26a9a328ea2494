pub mod cred;
pub mod pbkdf2;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("secret is empty")]
    EmptySecret,
    #[error("password encoder error: {0}")]
    Encoder(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Hashes secrets into storable credentials and checks secrets against them.
///
/// Implementations must fail closed: a stored credential they can't parse is a mismatch, never a
/// match.
#[cfg_attr(test, mockall::automock)]
pub trait PasswordEncoder: Send + Sync {
    /// Derives a freshly salted credential from `secret`.
    fn encode(&self, secret: &str) -> Result<String>;

    /// Checks `secret` against a credential previously returned by [`Self::encode`].
    fn verify(&self, stored: &str, secret: &str) -> Result<bool>;
}
