use std::{fmt::Display, str::FromStr};

// Consts

pub const DELIMITER: char = ':';

// Errors

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum MalformedCredential {
    #[error("credential doesn't contain exactly one delimiter")]
    Delimiter,
    #[error("credential key is empty")]
    EmptyKey,
    #[error("credential key is {0} bytes long")]
    KeyLength(usize),
    #[error("credential salt is empty")]
    EmptySalt,
    #[error("credential {0} isn't hexadecimal")]
    NotHex(&'static str),
}

// StoredCredential

/// Salt and derived key, stored together as `<salt>:<key>`.
///
/// The salt is kept in its hexadecimal text form because that text is what gets fed to the key
/// derivation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredCredential {
    pub key: Vec<u8>,
    pub salt: String,
}

impl Display for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.salt, hex::encode(&self.key))
    }
}

impl FromStr for StoredCredential {
    type Err = MalformedCredential;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(DELIMITER);
        let (salt, key) = match (parts.next(), parts.next(), parts.next()) {
            (Some(salt), Some(key), None) => (salt, key),
            _ => return Err(MalformedCredential::Delimiter),
        };
        if salt.is_empty() {
            return Err(MalformedCredential::EmptySalt);
        }
        if key.is_empty() {
            return Err(MalformedCredential::EmptyKey);
        }
        if !salt.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MalformedCredential::NotHex("salt"));
        }
        let key = hex::decode(key).map_err(|_| MalformedCredential::NotHex("key"))?;
        Ok(Self {
            key,
            salt: salt.into(),
        })
    }
}

// Tests
