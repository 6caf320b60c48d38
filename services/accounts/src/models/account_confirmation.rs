//! Account confirmation model and related functionality

use secrecy::SecretString;
use serde::Deserialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One-time confirmation challenge issued at registration
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AccountConfirmation {
    pub user_id: Uuid,
    pub confirmation_code: Uuid,
    pub security_code: String,
}

/// Confirmation attempt supplied by the account owner
#[derive(Debug, Deserialize)]
pub struct ConfirmAccount {
    pub confirmation_code: Uuid,
    pub security_code: SecretString,
}

/// Values produced by a successful registration, to be delivered to the
/// user over two separate channels.
#[derive(Debug)]
pub struct RegistrationReceipt {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub confirmation_code: Uuid,
    pub security_code: SecretString,
}

/// Successful result of a confirmation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The account transitioned from unconfirmed to confirmed.
    Confirmed,
    /// The codes matched but the account was confirmed earlier; nothing was written.
    AlreadyConfirmed,
}

impl ConfirmationOutcome {
    pub fn message(self) -> &'static str {
        match self {
            ConfirmationOutcome::Confirmed => "account confirmed",
            ConfirmationOutcome::AlreadyConfirmed => "account already confirmed",
        }
    }
}
