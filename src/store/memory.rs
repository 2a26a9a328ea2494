use std::collections::{hash_map::Entry, HashMap};

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{normalize_email, User};

use super::{Result, UserStore};

// MemoryUserStore

#[derive(Debug, Default)]
pub struct MemoryUserStore(RwLock<HashMap<String, User>>);

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    #[instrument(skip(self, email), fields(user.email = email))]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        debug!("looking up user");
        let users = self.0.read().await;
        Ok(users.get(&normalize_email(email)).cloned())
    }

    #[instrument(skip(self, user), fields(user.email = user.email, user.id = %user.id))]
    async fn insert(&self, user: &User) -> Result<bool> {
        let email = normalize_email(&user.email);
        let mut users = self.0.write().await;
        match users.entry(email.clone()) {
            Entry::Occupied(_) => {
                debug!("email is already taken");
                Ok(false)
            }
            Entry::Vacant(entry) => {
                debug!("inserting user");
                entry.insert(User {
                    email,
                    ..user.clone()
                });
                Ok(true)
            }
        }
    }

    #[instrument(skip(self, email, password), fields(user.email = email))]
    async fn replace_password(&self, email: &str, password: &str) -> Result<bool> {
        let mut users = self.0.write().await;
        match users.get_mut(&normalize_email(email)) {
            Some(user) => {
                debug!("replacing password");
                user.password = password.into();
                Ok(true)
            }
            None => {
                debug!("user doesn't exist");
                Ok(false)
            }
        }
    }
}

// Tests
