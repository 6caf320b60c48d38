//! PostgreSQL user repository

use async_trait::async_trait;
use common::{AppError, AppResult, ErrorKind};
use sqlx::{
    FromRow, PgPool, Postgres,
    postgres::{PgArguments, PgRow},
    query::{Query, QueryAs},
};
use tracing::debug;
use uuid::Uuid;

use super::UserRepository;
use crate::models::{AccountConfirmation, User};
use crate::unit_of_work::{SharedTransaction, TransactionState};

/// User repository bound to a [`crate::unit_of_work::PgUnitOfWork`]
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
    transaction: SharedTransaction,
}

impl PgUserRepository {
    pub(crate) fn new(pool: PgPool, transaction: SharedTransaction) -> Self {
        Self { pool, transaction }
    }

    async fn fetch_optional<T>(
        &self,
        query: QueryAs<'_, Postgres, T, PgArguments>,
    ) -> Result<Option<T>, sqlx::Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        let mut state = self.transaction.lock().await;
        match &mut *state {
            TransactionState::Active(transaction) => query.fetch_optional(&mut **transaction).await,
            TransactionState::Idle | TransactionState::Closed => {
                query.fetch_optional(&self.pool).await
            }
        }
    }

    async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        message: &'static str,
        context: &'static str,
        argument: String,
    ) -> AppResult<()> {
        let mut state = self.transaction.lock().await;
        let TransactionState::Active(transaction) = &mut *state else {
            return Err(AppError::transaction(
                "Write attempted outside of an active transaction",
                context,
            )
            .with_argument(argument));
        };

        query
            .execute(&mut **transaction)
            .await
            .map_err(|e| storage_error(message, context, argument, e))?;
        Ok(())
    }
}

/// Tag unique constraint violations so the service can report a conflict.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<ErrorKind> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(ErrorKind::UniqueViolation {
                constraint: db.constraint().map(str::to_owned),
            })
        }
        _ => None,
    }
}

fn storage_error(
    message: &'static str,
    context: &'static str,
    argument: String,
    err: sqlx::Error,
) -> AppError {
    let app_error = AppError::repository(message, context).with_argument(argument);
    let app_error = match unique_violation(&err) {
        Some(kind) => app_error.with_kind(kind),
        None => app_error,
    };
    app_error.with_source(err)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: &User) -> AppResult<()> {
        debug!(user_id = %user.id, "Creating user");

        let query = sqlx::query(
            r#"
            INSERT INTO "user" (id, username, email, password, salt, phone_number)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(&user.phone_number);

        self.execute(
            query,
            "Database error occurred while trying to create a new user",
            "PgUserRepository::create_user",
            format!("user: {:?}", user),
        )
        .await
    }

    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        debug!(user_id = %id, "Finding user by ID");

        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password, salt, registration_date,
                   is_account_confirmed, is_account_deleted, phone_number
            FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id);

        self.fetch_optional(query).await.map_err(|e| {
            storage_error(
                "Database error occurred while trying to get user by id",
                "PgUserRepository::get_user_by_id",
                format!("id: {}", id),
                e,
            )
        })
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        debug!("Finding user by email");

        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password, salt, registration_date,
                   is_account_confirmed, is_account_deleted, phone_number
            FROM "user"
            WHERE email = $1
            "#,
        )
        .bind(email);

        self.fetch_optional(query).await.map_err(|e| {
            storage_error(
                "Database error occurred while trying to get user by email",
                "PgUserRepository::get_user_by_email",
                format!("email: {}", email),
                e,
            )
        })
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        debug!(username, "Finding user by username");

        let query = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password, salt, registration_date,
                   is_account_confirmed, is_account_deleted, phone_number
            FROM "user"
            WHERE username = $1
            "#,
        )
        .bind(username);

        self.fetch_optional(query).await.map_err(|e| {
            storage_error(
                "Database error occurred while trying to get user by username",
                "PgUserRepository::get_user_by_username",
                format!("username: {}", username),
                e,
            )
        })
    }

    async fn create_account_confirmation(
        &self,
        account_confirmation: &AccountConfirmation,
    ) -> AppResult<()> {
        debug!(user_id = %account_confirmation.user_id, "Creating account confirmation");

        let query = sqlx::query(
            r#"
            INSERT INTO account_confirmation (user_id, confirmation_code, security_code)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(account_confirmation.user_id)
        .bind(account_confirmation.confirmation_code)
        .bind(&account_confirmation.security_code);

        self.execute(
            query,
            "Database error occurred while trying to create an account confirmation entry",
            "PgUserRepository::create_account_confirmation",
            format!(
                "userId: {}, confirmationCode: {}",
                account_confirmation.user_id, account_confirmation.confirmation_code
            ),
        )
        .await
    }

    async fn get_account_confirmation_by_confirmation_code(
        &self,
        confirmation_code: Uuid,
    ) -> AppResult<Option<AccountConfirmation>> {
        debug!(%confirmation_code, "Finding account confirmation");

        let query = sqlx::query_as::<_, AccountConfirmation>(
            r#"
            SELECT user_id, confirmation_code, security_code
            FROM account_confirmation
            WHERE confirmation_code = $1
            "#,
        )
        .bind(confirmation_code);

        self.fetch_optional(query).await.map_err(|e| {
            storage_error(
                "Database error occurred while trying to get account confirmation by confirmation code",
                "PgUserRepository::get_account_confirmation_by_confirmation_code",
                format!("confirmationCode: {}", confirmation_code),
                e,
            )
        })
    }

    async fn confirm_user_account(&self, user_id: Uuid) -> AppResult<()> {
        debug!(%user_id, "Confirming user account");

        let query = sqlx::query(
            r#"
            UPDATE "user"
            SET is_account_confirmed = TRUE
            WHERE id = $1
            "#,
        )
        .bind(user_id);

        self.execute(
            query,
            "Database error occurred while trying to confirm user account",
            "PgUserRepository::confirm_user_account",
            format!("userId: {}", user_id),
        )
        .await
    }
}
