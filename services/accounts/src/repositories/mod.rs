//! Repositories for user and account confirmation rows
//!
//! Every write runs against the transaction owned by the unit of work the
//! repository was handed out by. Reads run against that transaction when one
//! is open and against the shared pool otherwise.

use async_trait::async_trait;
use common::AppResult;
use uuid::Uuid;

use crate::models::{AccountConfirmation, User};

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod user;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{FailurePoint, MemoryStore, MemoryUnitOfWork, MemoryUserRepository};
pub use user::PgUserRepository;

/// Storage contract for users and their confirmation challenges
///
/// Absent rows are `Ok(None)`, never an error.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> AppResult<()>;

    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;

    async fn create_account_confirmation(
        &self,
        account_confirmation: &AccountConfirmation,
    ) -> AppResult<()>;

    async fn get_account_confirmation_by_confirmation_code(
        &self,
        confirmation_code: Uuid,
    ) -> AppResult<Option<AccountConfirmation>>;

    /// Sets `is_account_confirmed` unconditionally; callers check the current
    /// state first.
    async fn confirm_user_account(&self, user_id: Uuid) -> AppResult<()>;
}
