use std::num::NonZeroU32;

use ::pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use super::{
    cred::{MalformedCredential, StoredCredential},
    PasswordEncoder, Result,
};

// Consts

pub const DEFAULT_ITERATIONS: u32 = 210_000;
pub const KEY_LEN: usize = 64;
pub const SALT_LEN: usize = 16;

const DUMMY_SALT: &str = "00000000000000000000000000000000";
const RECOMMENDED_MIN_ITERATIONS: u32 = 100_000;

// Errors

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("iteration count must be greater than zero")]
    ZeroIterations,
    #[error("failed to generate salt: {0}")]
    Rng(
        #[from]
        #[source]
        rand::Error,
    ),
}

// Pbkdf2PasswordEncoderArgs

#[derive(clap::Args, Clone, Debug, Eq, PartialEq)]
pub struct Pbkdf2PasswordEncoderArgs {
    #[arg(
        long = "pwd-iterations",
        env = "PWD_ITERATIONS",
        name = "PWD_ITERATIONS",
        default_value_t = DEFAULT_ITERATIONS,
        long_help = "Number of PBKDF2 iterations. Changing it invalidates every stored credential"
    )]
    pub iterations: u32,
}

impl Default for Pbkdf2PasswordEncoderArgs {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

// Pbkdf2PasswordEncoder

/// PBKDF2-HMAC-SHA512 with a 16-byte random salt and a 64-byte key.
///
/// The derivation is salted with the hexadecimal text of the salt, not its bytes. Credentials
/// already stored by the dashboard follow that convention with 1000 iterations.
#[derive(Clone, Debug)]
pub struct Pbkdf2PasswordEncoder {
    iterations: NonZeroU32,
}

impl Pbkdf2PasswordEncoder {
    pub fn new(args: Pbkdf2PasswordEncoderArgs) -> anyhow::Result<Self> {
        let iterations = NonZeroU32::new(args.iterations).ok_or(Error::ZeroIterations)?;
        if iterations.get() < RECOMMENDED_MIN_ITERATIONS {
            warn!(
                pwd.iterations = iterations.get(),
                "iteration count is below {RECOMMENDED_MIN_ITERATIONS}"
            );
        }
        Ok(Self { iterations })
    }

    fn derive(&self, secret: &str, salt: &str) -> [u8; KEY_LEN] {
        let mut key = [0; KEY_LEN];
        pbkdf2_hmac::<Sha512>(secret.as_bytes(), salt.as_bytes(), self.iterations.get(), &mut key);
        key
    }
}

impl PasswordEncoder for Pbkdf2PasswordEncoder {
    #[instrument("encode_password", skip(self, secret))]
    fn encode(&self, secret: &str) -> Result<String> {
        if secret.is_empty() {
            return Err(super::Error::EmptySecret);
        }
        let mut salt = [0; SALT_LEN];
        OsRng.try_fill_bytes(&mut salt).map_err(Error::from)?;
        let salt = hex::encode(salt);
        debug!("deriving key");
        let key = self.derive(secret, &salt);
        let cred = StoredCredential {
            key: key.to_vec(),
            salt,
        };
        Ok(cred.to_string())
    }

    #[instrument("verify_password", skip(self, stored, secret))]
    fn verify(&self, stored: &str, secret: &str) -> Result<bool> {
        if secret.is_empty() {
            return Err(super::Error::EmptySecret);
        }
        let cred = stored
            .parse::<StoredCredential>()
            .and_then(|cred| {
                if cred.key.len() == KEY_LEN {
                    Ok(cred)
                } else {
                    Err(MalformedCredential::KeyLength(cred.key.len()))
                }
            });
        match cred {
            Ok(cred) => {
                debug!("deriving key");
                let key = self.derive(secret, &cred.salt);
                Ok(key.as_slice().ct_eq(cred.key.as_slice()).into())
            }
            Err(err) => {
                debug!("stored credential is malformed: {err}");
                std::hint::black_box(self.derive(secret, DUMMY_SALT));
                Ok(false)
            }
        }
    }
}

impl From<Error> for super::Error {
    fn from(err: Error) -> Self {
        Self::Encoder(Box::new(err))
    }
}

// Tests
