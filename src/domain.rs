use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    pub email: String,
    pub id: Uuid,
    pub name: String,
    /// Serialized credential, never the plaintext password.
    pub password: String,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            email: self.email.clone(),
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// User without its credential, safe to hand out.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Email.
    pub email: String,
    /// ID.
    pub id: Uuid,
    /// Name.
    pub name: String,
}

// Functions

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
