use std::{fs::File, path::Path};

use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    auth::{AuthService, Enrollment, Error as AuthError},
    pwd::PasswordEncoder,
    store::UserStore,
};

// Types

pub type Result<T = ()> = std::result::Result<T, Error>;

// Errors

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Auth(
        #[from]
        #[source]
        AuthError,
    ),
    #[error("failed to read seed file: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),
    #[error("failed to parse seed file: {0}")]
    Yaml(
        #[from]
        #[source]
        serde_yaml::Error,
    ),
}

// SeedUser

/// User fixture with a plaintext password, hashed when seeded.
#[derive(Clone, Debug, Deserialize)]
pub struct SeedUser {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(flatten)]
    pub enrollment: Enrollment,
}

// Functions

pub fn load_seed_file(path: &Path) -> Result<Vec<SeedUser>> {
    debug!(seed.path = %path.display(), "reading seed file");
    let file = File::open(path)?;
    let users = serde_yaml::from_reader(file)?;
    Ok(users)
}

/// Enrolls every user whose email is free, leaves the others untouched.
///
/// Returns the number of enrolled users.
#[instrument(skip(auth, users), fields(seed.users = users.len()))]
pub async fn seed_users<P: PasswordEncoder + 'static, S: UserStore>(
    auth: &AuthService<P, S>,
    users: &[SeedUser],
) -> Result<usize> {
    let mut count = 0;
    for user in users {
        let id = user.id.unwrap_or_else(Uuid::new_v4);
        match auth.enroll_as(id, &user.enrollment).await {
            Ok(_) => count += 1,
            Err(AuthError::EmailTaken) => {
                debug!(user.email = user.enrollment.email, "user already exists");
            }
            Err(err) => return Err(err.into()),
        }
    }
    info!(seed.count = count, "users seeded");
    Ok(count)
}

// Tests
