//! Account service models

pub mod account_confirmation;
pub mod user;

// Re-export for convenience
pub use account_confirmation::{
    AccountConfirmation, ConfirmAccount, ConfirmationOutcome, RegistrationReceipt,
};
pub use user::{NewUser, User};
