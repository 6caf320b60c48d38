//! User model and related functionality

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use sqlx::FromRow;
use uuid::Uuid;

/// User entity
///
/// `password_hash` is the Argon2id digest of the plaintext password mixed
/// with `salt`; neither is ever serialized.
#[derive(Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[sqlx(rename = "password")]
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub registration_date: Option<DateTime<Utc>>,
    pub is_account_confirmed: bool,
    pub is_account_deleted: bool,
    pub phone_number: Option<String>,
}

impl User {
    /// A freshly registered account: unconfirmed and not deleted.
    pub fn new(
        id: Uuid,
        username: String,
        email: String,
        password_hash: Vec<u8>,
        salt: Vec<u8>,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password_hash,
            salt,
            registration_date: None,
            is_account_confirmed: false,
            is_account_deleted: false,
            phone_number,
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("registration_date", &self.registration_date)
            .field("is_account_confirmed", &self.is_account_confirmed)
            .field("is_account_deleted", &self.is_account_deleted)
            .field("phone_number", &self.phone_number)
            .finish_non_exhaustive()
    }
}

/// New user registration payload
///
/// Passwords stay wrapped in [`SecretString`] so that the `Debug` output used
/// for error arguments never contains them.
#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub confirm_email: String,
    pub password: SecretString,
    pub confirm_password: SecretString,
    #[serde(default)]
    pub phone_number: Option<String>,
}
