//! Credential tooling: identifiers, salts, security codes and password hashes

use argon2::{Algorithm, Argon2, Params, Version};
use common::{AppError, AppResult};
use rand::{Rng, RngCore, rngs::OsRng};
use uuid::Uuid;

/// Salt length used for new accounts
pub const DEFAULT_SALT_LENGTH: usize = 16;
/// Shortest salt Argon2 accepts
pub const MIN_SALT_LENGTH: usize = 8;

const ARGON2_TIME_COST: u32 = 3;
const ARGON2_MEMORY_COST_KIB: u32 = 64 * 1024;
const ARGON2_LANES: u32 = 4;
const ARGON2_OUTPUT_LENGTH: usize = 32;

const SECURITY_CODE_UPPER_BOUND: u32 = 1_000_000;

/// Source of fresh credentials for new accounts
pub trait CredentialTools: Send + Sync + 'static {
    /// Time-ordered unique identifier
    fn new_identifier(&self) -> AppResult<Uuid>;

    /// `length` bytes from a cryptographically secure source
    fn new_salt(&self, length: usize) -> AppResult<Vec<u8>>;

    /// Deterministic salted password hash
    fn hash_password(&self, password: &str, salt: &[u8]) -> Vec<u8>;

    /// Six decimal digits, zero padded
    fn new_security_code(&self) -> String;
}

/// Production credential tooling backed by the OS random source and Argon2id
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureCredentialTools;

impl SecureCredentialTools {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialTools for SecureCredentialTools {
    // uuid keeps a per-process counter, so identifiers minted within the same
    // millisecond still sort in creation order.
    fn new_identifier(&self) -> AppResult<Uuid> {
        Ok(Uuid::now_v7())
    }

    fn new_salt(&self, length: usize) -> AppResult<Vec<u8>> {
        let mut salt = vec![0u8; length];
        OsRng.try_fill_bytes(&mut salt).map_err(|e| {
            AppError::generation(
                "Error occurred while generating salt",
                "SecureCredentialTools::new_salt",
            )
            .with_argument(format!("length: {}", length))
            .with_source(e)
        })?;
        Ok(salt)
    }

    fn hash_password(&self, password: &str, salt: &[u8]) -> Vec<u8> {
        let params = Params::new(
            ARGON2_MEMORY_COST_KIB,
            ARGON2_TIME_COST,
            ARGON2_LANES,
            Some(ARGON2_OUTPUT_LENGTH),
        )
        .expect("Argon2 parameters are constant and valid");

        let mut hash = vec![0u8; ARGON2_OUTPUT_LENGTH];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut hash)
            .expect("salt must be at least MIN_SALT_LENGTH bytes");
        hash
    }

    fn new_security_code(&self) -> String {
        let code = rand::thread_rng().gen_range(0..SECURITY_CODE_UPPER_BOUND);
        format!("{:06}", code)
    }
}
