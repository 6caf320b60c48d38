//! Registration and confirmation of user accounts
//!
//! Both operations run on a single unit of work. Registration validates the
//! input, checks for duplicates inside the transaction, writes the user and
//! its confirmation challenge and commits; any failure after the transaction
//! has begun rolls everything back.

use std::sync::Arc;

use common::{AppError, AppResult, ErrorKind, StatusClass};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::credentials::{CredentialTools, DEFAULT_SALT_LENGTH, MIN_SALT_LENGTH};
use crate::models::{
    AccountConfirmation, ConfirmAccount, ConfirmationOutcome, NewUser, RegistrationReceipt, User,
};
use crate::repositories::UserRepository;
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
use crate::validation::validate_new_user;

/// Message shared by every failed confirmation, whatever the reason
pub const CONFIRMATION_NOT_FOUND: &str = "content not found";

/// Registration and confirmation service
pub struct RegistrationService<F, T> {
    uow_factory: Arc<F>,
    tools: Arc<T>,
    salt_length: usize,
}

impl<F, T> Clone for RegistrationService<F, T> {
    fn clone(&self) -> Self {
        Self {
            uow_factory: Arc::clone(&self.uow_factory),
            tools: Arc::clone(&self.tools),
            salt_length: self.salt_length,
        }
    }
}

impl<F, T> RegistrationService<F, T>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
{
    pub fn new(uow_factory: F, tools: T) -> Self {
        Self {
            uow_factory: Arc::new(uow_factory),
            tools: Arc::new(tools),
            salt_length: DEFAULT_SALT_LENGTH,
        }
    }

    /// Override the salt length; values below the Argon2 minimum are raised to it.
    pub fn with_salt_length(mut self, salt_length: usize) -> Self {
        self.salt_length = salt_length.max(MIN_SALT_LENGTH);
        self
    }

    /// Register a new, unconfirmed account
    ///
    /// On success the returned receipt carries the confirmation code and the
    /// security code, which must be delivered to the user over two separate
    /// channels.
    #[instrument(name = "RegistrationService::register", skip_all, fields(username = %new_user.username))]
    pub async fn register(&self, new_user: NewUser) -> AppResult<RegistrationReceipt> {
        const CONTEXT: &str = "RegistrationService::register";
        let wrap = |err: AppError| err.wrap(CONTEXT, Some(format!("newUser: {:?}", new_user)));

        validate_new_user(&new_user).map_err(wrap)?;

        let uow = self.uow_factory.create().map_err(wrap)?;
        uow.begin_transaction().await.map_err(wrap)?;

        let receipt = match self.register_in_transaction(&uow, &new_user).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(abort(&uow, wrap(err)).await),
        };

        uow.commit()
            .await
            .map_err(|err| into_conflict(err, CONTEXT))
            .map_err(wrap)?;

        info!(user_id = %receipt.user_id, "User registered");
        Ok(receipt)
    }

    async fn register_in_transaction(
        &self,
        uow: &F::UnitOfWork,
        new_user: &NewUser,
    ) -> AppResult<RegistrationReceipt> {
        const CONTEXT: &str = "RegistrationService::register_in_transaction";
        let repository = uow.repository();

        check_duplicates(repository, &new_user.username, &new_user.email).await?;

        let user = self.build_user(new_user).await?;
        repository
            .create_user(&user)
            .await
            .map_err(|err| into_conflict(err, CONTEXT))?;

        let account_confirmation = self.build_account_confirmation(user.id)?;
        repository
            .create_account_confirmation(&account_confirmation)
            .await
            .map_err(|err| err.wrap(CONTEXT, Some(format!("userId: {}", user.id))))?;

        Ok(RegistrationReceipt {
            user_id: user.id,
            username: user.username,
            email: user.email,
            phone_number: user.phone_number,
            confirmation_code: account_confirmation.confirmation_code,
            security_code: SecretString::new(account_confirmation.security_code),
        })
    }

    async fn build_user(&self, new_user: &NewUser) -> AppResult<User> {
        const CONTEXT: &str = "RegistrationService::build_user";
        let wrap = |err: AppError| err.wrap(CONTEXT, Some(format!("username: {}", new_user.username)));

        let id = self.tools.new_identifier().map_err(wrap)?;
        let salt = self.tools.new_salt(self.salt_length).map_err(wrap)?;
        let password_hash = self.hash_password(&new_user.password, &salt).await?;

        Ok(User::new(
            id,
            new_user.username.clone(),
            new_user.email.clone(),
            password_hash,
            salt,
            new_user.phone_number.clone(),
        ))
    }

    // Argon2 with 64 MiB of memory is too heavy for an async worker thread.
    async fn hash_password(&self, password: &SecretString, salt: &[u8]) -> AppResult<Vec<u8>> {
        let tools = Arc::clone(&self.tools);
        let password = SecretString::new(password.expose_secret().to_owned());
        let salt = salt.to_vec();

        tokio::task::spawn_blocking(move || tools.hash_password(password.expose_secret(), &salt))
            .await
            .map_err(|e| {
                AppError::generation(
                    "Error occurred while hashing password",
                    "RegistrationService::hash_password",
                )
                .with_source(e)
            })
    }

    fn build_account_confirmation(&self, user_id: Uuid) -> AppResult<AccountConfirmation> {
        let confirmation_code = self.tools.new_identifier().map_err(|err| {
            err.wrap(
                "RegistrationService::build_account_confirmation",
                Some(format!("userId: {}", user_id)),
            )
        })?;

        Ok(AccountConfirmation {
            user_id,
            confirmation_code,
            security_code: self.tools.new_security_code(),
        })
    }

    /// Confirm an account with its confirmation code and security code
    ///
    /// An unknown code, a wrong security code and a deleted account all fail
    /// with the same not-found error. A repeated confirmation with valid codes
    /// succeeds without writing anything.
    #[instrument(
        name = "RegistrationService::confirm",
        skip_all,
        fields(confirmation_code = %confirm_account.confirmation_code)
    )]
    pub async fn confirm(&self, confirm_account: ConfirmAccount) -> AppResult<ConfirmationOutcome> {
        const CONTEXT: &str = "RegistrationService::confirm";
        let argument = || format!("confirmationCode: {}", confirm_account.confirmation_code);
        let wrap = |err: AppError| err.wrap(CONTEXT, Some(argument()));
        let not_found = || AppError::not_found(CONFIRMATION_NOT_FOUND, CONTEXT).with_argument(argument());

        let uow = self.uow_factory.create().map_err(wrap)?;
        let repository = uow.repository();

        let account_confirmation = repository
            .get_account_confirmation_by_confirmation_code(confirm_account.confirmation_code)
            .await
            .map_err(wrap)?
            .ok_or_else(not_found)?;

        if account_confirmation.security_code.as_str()
            != confirm_account.security_code.expose_secret().as_str()
        {
            return Err(not_found());
        }

        let user = repository
            .get_user_by_id(account_confirmation.user_id)
            .await
            .map_err(wrap)?
            .ok_or_else(not_found)?;

        if user.is_account_deleted {
            return Err(not_found());
        }

        if user.is_account_confirmed {
            info!(user_id = %user.id, "Account already confirmed");
            return Ok(ConfirmationOutcome::AlreadyConfirmed);
        }

        uow.begin_transaction().await.map_err(wrap)?;
        if let Err(err) = repository.confirm_user_account(user.id).await {
            return Err(abort(&uow, wrap(err)).await);
        }
        uow.commit().await.map_err(wrap)?;

        info!(user_id = %user.id, "Account confirmed");
        Ok(ConfirmationOutcome::Confirmed)
    }
}

/// Email is checked before username, so a double collision reports the email.
async fn check_duplicates<R: UserRepository>(
    repository: &R,
    username: &str,
    email: &str,
) -> AppResult<()> {
    const CONTEXT: &str = "RegistrationService::check_duplicates";
    let argument = || format!("username: {}, email: {}", username, email);

    let by_email = repository
        .get_user_by_email(email)
        .await
        .map_err(|err| err.wrap(CONTEXT, Some(argument())))?;
    if by_email.is_some() {
        return Err(AppError::duplicate("email already in use", CONTEXT).with_argument(argument()));
    }

    let by_username = repository
        .get_user_by_username(username)
        .await
        .map_err(|err| err.wrap(CONTEXT, Some(argument())))?;
    if by_username.is_some() {
        return Err(
            AppError::duplicate("username already in use", CONTEXT).with_argument(argument())
        );
    }

    Ok(())
}

/// Report a storage uniqueness violation on a user column as a conflict.
fn into_conflict(err: AppError, context: &'static str) -> AppError {
    let message = match err.kind() {
        ErrorKind::UniqueViolation { constraint } => conflict_message(constraint.as_deref()),
        _ => None,
    };
    match message {
        Some(message) => err.reclassify(ErrorKind::Duplicate, StatusClass::Conflict, message, context),
        None => err.wrap(context, None),
    }
}

fn conflict_message(constraint: Option<&str>) -> Option<&'static str> {
    let constraint = constraint?;
    if constraint.contains("email") {
        Some("email already in use")
    } else if constraint.contains("username") {
        Some("username already in use")
    } else {
        None
    }
}

/// Roll back after a failure. A failed rollback is logged; the original
/// error is what the caller gets.
async fn abort<U: UnitOfWork>(uow: &U, err: AppError) -> AppError {
    if let Err(rollback_error) = uow.rollback().await {
        error!("Rollback failed after: {}", err.message());
        rollback_error.log();
    }
    err
}
