use std::{fmt::Debug, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_trim::string_trim;
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{normalize_email, User},
    pwd::PasswordEncoder,
    store::UserStore,
};

// Consts

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

// Types

pub type Result<T = ()> = std::result::Result<T, Error>;

// Errors

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("email is already taken")]
    EmailTaken,
    #[error("password derivation didn't complete: {0}")]
    Join(
        #[from]
        #[source]
        JoinError,
    ),
    #[error("{0}")]
    PasswordEncoder(
        #[from]
        #[source]
        crate::pwd::Error,
    ),
    #[error("password must contain at least {0} characters")]
    PasswordTooShort(usize),
    #[error("{0}")]
    Store(
        #[from]
        #[source]
        crate::store::Error,
    ),
    #[error("validation failed")]
    Validation(
        #[from]
        #[source]
        validator::ValidationErrors,
    ),
}

// AuthConfig

#[derive(clap::Args, Clone, Debug, Eq, PartialEq)]
pub struct AuthConfig {
    #[arg(
        long = "min-password-length",
        env = "MIN_PASSWORD_LENGTH",
        name = "MIN_PASSWORD_LENGTH",
        default_value_t = DEFAULT_MIN_PASSWORD_LEN,
        long_help = "Minimum number of characters of a password"
    )]
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

// Inputs

#[derive(Clone, Deserialize, Eq, JsonSchema, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Email.
    #[serde(deserialize_with = "string_trim")]
    #[validate(email)]
    pub email: String,
    /// Password.
    pub password: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize, Eq, JsonSchema, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    /// Email.
    #[serde(deserialize_with = "string_trim")]
    #[validate(email)]
    pub email: String,
    /// Name.
    #[serde(deserialize_with = "string_trim")]
    #[validate(length(min = 1))]
    pub name: String,
    /// Password.
    pub password: String,
}

impl Debug for Enrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrollment")
            .field("email", &self.email)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// AuthService

/// Login, enrollment and password change on top of a user store.
///
/// Key derivations run on the blocking thread pool.
pub struct AuthService<P: PasswordEncoder, S: UserStore> {
    config: AuthConfig,
    encoder: Arc<P>,
    store: S,
}

impl<P: PasswordEncoder + 'static, S: UserStore> AuthService<P, S> {
    pub fn new(config: AuthConfig, encoder: P, store: S) -> Self {
        Self {
            config,
            encoder: Arc::new(encoder),
            store,
        }
    }

    /// Returns the user if the credentials match, `None` otherwise.
    #[instrument(skip(self, creds), fields(user.email = creds.email))]
    pub async fn authenticate(&self, creds: &Credentials) -> Result<Option<User>> {
        creds.validate()?;
        self.check_password(&creds.password)?;
        debug!("authenticating user");
        let user = self.store.find_by_email(&creds.email).await?;
        // Unknown users still pay a derivation against an empty record.
        let stored = match &user {
            Some(user) => user.password.clone(),
            None => {
                debug!("user doesn't exist");
                String::new()
            }
        };
        let valid = self.verify(stored, creds.password.clone()).await?;
        match user {
            Some(user) if valid => {
                info!(user.id = %user.id, "user authenticated");
                Ok(Some(user))
            }
            _ => {
                debug!("wrong credentials");
                Ok(None)
            }
        }
    }

    /// Authenticates with `creds` then replaces the credential with one derived from `new_password`.
    ///
    /// Returns `false` if the credentials don't match.
    #[instrument(skip(self, creds, new_password), fields(user.email = creds.email))]
    pub async fn change_password(&self, creds: &Credentials, new_password: &str) -> Result<bool> {
        self.check_password(new_password)?;
        let user = match self.authenticate(creds).await? {
            Some(user) => user,
            None => return Ok(false),
        };
        let password = self.encode(new_password.into()).await?;
        debug!("replacing password");
        let replaced = self.store.replace_password(&user.email, &password).await?;
        if replaced {
            info!(user.id = %user.id, "password changed");
        }
        Ok(replaced)
    }

    pub async fn enroll(&self, enrollment: &Enrollment) -> Result<User> {
        self.enroll_as(Uuid::new_v4(), enrollment).await
    }

    #[instrument(skip(self, enrollment), fields(user.email = enrollment.email, user.id = %id))]
    pub async fn enroll_as(&self, id: Uuid, enrollment: &Enrollment) -> Result<User> {
        enrollment.validate()?;
        self.check_password(&enrollment.password)?;
        if self.store.find_by_email(&enrollment.email).await?.is_some() {
            debug!("email is already taken");
            return Err(Error::EmailTaken);
        }
        let password = self.encode(enrollment.password.clone()).await?;
        let user = User {
            email: normalize_email(&enrollment.email),
            id,
            name: enrollment.name.clone(),
            password,
        };
        if self.store.insert(&user).await? {
            info!("user enrolled");
            Ok(user)
        } else {
            debug!("email was taken during enrollment");
            Err(Error::EmailTaken)
        }
    }

    fn check_password(&self, password: &str) -> Result {
        let min = self.config.min_password_len.max(1);
        if password.chars().count() < min {
            debug!("password is too short");
            Err(Error::PasswordTooShort(min))
        } else {
            Ok(())
        }
    }

    async fn encode(&self, secret: String) -> Result<String> {
        let encoder = self.encoder.clone();
        let stored = spawn_blocking(move || encoder.encode(&secret)).await??;
        Ok(stored)
    }

    async fn verify(&self, stored: String, secret: String) -> Result<bool> {
        let encoder = self.encoder.clone();
        let valid = spawn_blocking(move || encoder.verify(&stored, &secret)).await??;
        Ok(valid)
    }
}

// Tests

#[cfg(test)]
mod test {
    use mockall::predicate::*;

    use crate::{
        pwd::{
            pbkdf2::{Pbkdf2PasswordEncoder, Pbkdf2PasswordEncoderArgs},
            MockPasswordEncoder,
        },
        store::{memory::MemoryUserStore, MockUserStore},
        test::*,
    };

    use super::*;

    // Consts

    const EMAIL: &str = "user@nextmail.com";
    const PASSWORD: &str = "123456";
    const STORED: &str = "salt:key";

    // Functions

    fn creds(password: &str) -> Credentials {
        Credentials {
            email: EMAIL.into(),
            password: password.into(),
        }
    }

    fn enrollment(password: &str) -> Enrollment {
        Enrollment {
            email: EMAIL.into(),
            name: "User".into(),
            password: password.into(),
        }
    }

    fn user() -> User {
        User {
            email: EMAIL.into(),
            id: Uuid::new_v4(),
            name: "User".into(),
            password: STORED.into(),
        }
    }

    // Mods

    mod auth_service {
        use super::*;

        // Mods

        mod authenticate {
            use super::*;

            // Tests

            #[tokio::test]
            async fn authenticated() {
                init_tracer();
                let expected = user();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .with(eq(EMAIL))
                    .times(1)
                    .returning({
                        let user = expected.clone();
                        move |_| async_ok(Some(user.clone()))
                    });
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .with(eq(STORED), eq(PASSWORD))
                    .times(1)
                    .returning(|_, _| Ok(true));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let user = service.authenticate(&creds(PASSWORD)).await.unwrap();
                assert_eq!(user, Some(expected));
            }

            #[tokio::test]
            async fn wrong_password() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(Some(user())));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .with(eq(STORED), eq("654321"))
                    .times(1)
                    .returning(|_, _| Ok(false));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let user = service.authenticate(&creds("654321")).await.unwrap();
                assert!(user.is_none());
            }

            #[tokio::test]
            async fn unknown_user_still_verifies() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(None));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .with(eq(""), eq(PASSWORD))
                    .times(1)
                    .returning(|_, _| Ok(false));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let user = service.authenticate(&creds(PASSWORD)).await.unwrap();
                assert!(user.is_none());
            }

            #[tokio::test]
            async fn encoder_error_fails_closed() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(Some(user())));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .times(1)
                    .returning(|_, _| Err(crate::pwd::Error::Encoder("boom".into())));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let err = service.authenticate(&creds(PASSWORD)).await.unwrap_err();
                assert!(matches!(err, Error::PasswordEncoder(_)));
            }

            #[tokio::test]
            async fn invalid_email() {
                init_tracer();
                let service = AuthService::new(
                    AuthConfig::default(),
                    MockPasswordEncoder::new(),
                    MockUserStore::new(),
                );
                let creds = Credentials {
                    email: "not-an-email".into(),
                    password: PASSWORD.into(),
                };
                let err = service.authenticate(&creds).await.unwrap_err();
                assert!(matches!(err, Error::Validation(_)));
            }

            #[tokio::test]
            async fn password_too_short() {
                init_tracer();
                let service = AuthService::new(
                    AuthConfig::default(),
                    MockPasswordEncoder::new(),
                    MockUserStore::new(),
                );
                let err = service.authenticate(&creds("12345")).await.unwrap_err();
                assert!(matches!(err, Error::PasswordTooShort(6)));
            }

            #[tokio::test]
            async fn empty_password_with_zero_min() {
                init_tracer();
                let config = AuthConfig {
                    min_password_len: 0,
                };
                let service =
                    AuthService::new(config, MockPasswordEncoder::new(), MockUserStore::new());
                let err = service.authenticate(&creds("")).await.unwrap_err();
                assert!(matches!(err, Error::PasswordTooShort(1)));
            }
        }

        mod change_password {
            use super::*;

            // Tests

            #[tokio::test]
            async fn changed() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(Some(user())));
                store
                    .expect_replace_password()
                    .with(eq(EMAIL), eq("new:cred"))
                    .times(1)
                    .returning(|_, _| async_ok(true));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .times(1)
                    .returning(|_, _| Ok(true));
                encoder
                    .expect_encode()
                    .with(eq("abcdef"))
                    .times(1)
                    .returning(|_| Ok("new:cred".into()));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let changed = service
                    .change_password(&creds(PASSWORD), "abcdef")
                    .await
                    .unwrap();
                assert!(changed);
            }

            #[tokio::test]
            async fn wrong_credentials() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(Some(user())));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_verify()
                    .times(1)
                    .returning(|_, _| Ok(false));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let changed = service
                    .change_password(&creds(PASSWORD), "abcdef")
                    .await
                    .unwrap();
                assert!(!changed);
            }

            #[tokio::test]
            async fn new_password_too_short() {
                init_tracer();
                let service = AuthService::new(
                    AuthConfig::default(),
                    MockPasswordEncoder::new(),
                    MockUserStore::new(),
                );
                let err = service
                    .change_password(&creds(PASSWORD), "abc")
                    .await
                    .unwrap_err();
                assert!(matches!(err, Error::PasswordTooShort(6)));
            }
        }

        mod enroll {
            use super::*;

            // Tests

            #[tokio::test]
            async fn enrolled() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .with(eq(EMAIL))
                    .times(1)
                    .returning(|_| async_ok(None));
                store
                    .expect_insert()
                    .withf(|user: &User| user.email == EMAIL && user.password == STORED)
                    .times(1)
                    .returning(|_| async_ok(true));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_encode()
                    .with(eq(PASSWORD))
                    .times(1)
                    .returning(|_| Ok(STORED.into()));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let user = service.enroll(&enrollment(PASSWORD)).await.unwrap();
                assert_eq!(user.email, EMAIL);
                assert_eq!(user.name, "User");
                assert_eq!(user.password, STORED);
            }

            #[tokio::test]
            async fn email_taken() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(Some(user())));
                let service =
                    AuthService::new(AuthConfig::default(), MockPasswordEncoder::new(), store);
                let err = service.enroll(&enrollment(PASSWORD)).await.unwrap_err();
                assert!(matches!(err, Error::EmailTaken));
            }

            #[tokio::test]
            async fn email_taken_during_insert() {
                init_tracer();
                let mut store = MockUserStore::new();
                store
                    .expect_find_by_email()
                    .times(1)
                    .returning(|_| async_ok(None));
                store
                    .expect_insert()
                    .times(1)
                    .returning(|_| async_ok(false));
                let mut encoder = MockPasswordEncoder::new();
                encoder
                    .expect_encode()
                    .times(1)
                    .returning(|_| Ok(STORED.into()));
                let service = AuthService::new(AuthConfig::default(), encoder, store);
                let err = service.enroll(&enrollment(PASSWORD)).await.unwrap_err();
                assert!(matches!(err, Error::EmailTaken));
            }

            #[tokio::test]
            async fn empty_name() {
                init_tracer();
                let service = AuthService::new(
                    AuthConfig::default(),
                    MockPasswordEncoder::new(),
                    MockUserStore::new(),
                );
                let enrollment = Enrollment {
                    name: String::new(),
                    ..enrollment(PASSWORD)
                };
                let err = service.enroll(&enrollment).await.unwrap_err();
                assert!(matches!(err, Error::Validation(_)));
            }
        }

        mod end_to_end {
            use super::*;

            // Tests

            #[tokio::test]
            async fn enroll_authenticate_change() {
                init_tracer();
                let encoder =
                    Pbkdf2PasswordEncoder::new(Pbkdf2PasswordEncoderArgs { iterations: 1000 })
                        .unwrap();
                let service =
                    AuthService::new(AuthConfig::default(), encoder, MemoryUserStore::new());
                let enrolled = service.enroll(&enrollment("Sup3rSecret!")).await.unwrap();
                let user = service
                    .authenticate(&creds("Sup3rSecret!"))
                    .await
                    .unwrap();
                assert_eq!(user, Some(enrolled.clone()));
                let user = service
                    .authenticate(&creds("sup3rsecret!"))
                    .await
                    .unwrap();
                assert!(user.is_none());
                let changed = service
                    .change_password(&creds("Sup3rSecret!"), "N3wSecret!")
                    .await
                    .unwrap();
                assert!(changed);
                let old = service
                    .authenticate(&creds("Sup3rSecret!"))
                    .await
                    .unwrap();
                assert!(old.is_none());
                let new = service.authenticate(&creds("N3wSecret!")).await.unwrap();
                assert_eq!(new.map(|user| user.id), Some(enrolled.id));
            }
        }
    }
}
