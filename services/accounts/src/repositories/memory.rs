//! In-memory store with the same transactional semantics as PostgreSQL
//!
//! Writes made inside a transaction are staged on the unit of work and only
//! become visible to other units of work on commit; reads inside the
//! transaction see committed rows plus the staged ones. Uniqueness of
//! username, email and confirmation code is enforced both when a write is
//! staged and again at commit, mirroring the table constraints. Failures can
//! be injected at named points to exercise rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use common::{AppError, AppResult, ErrorKind};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::UserRepository;
use crate::models::{AccountConfirmation, User};
use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};

const USERNAME_CONSTRAINT: &str = "user_username_key";
const EMAIL_CONSTRAINT: &str = "user_email_key";
const CONFIRMATION_CODE_CONSTRAINT: &str = "account_confirmation_code_key";

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CreateUnitOfWork,
    BeginTransaction,
    Read,
    CreateUser,
    CreateAccountConfirmation,
    ConfirmUserAccount,
    Commit,
    Rollback,
}

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, User>,
    confirmations: Vec<AccountConfirmation>,
    failures: HashSet<FailurePoint>,
    commits: usize,
}

impl StoreState {
    fn fails_at(&self, point: FailurePoint) -> bool {
        self.failures.contains(&point)
    }

    fn conflicting_user_constraint(&self, user: &User) -> Option<&'static str> {
        user_conflict(self.users.values(), user)
    }

    fn has_confirmation_code(&self, code: Uuid) -> bool {
        self.confirmations.iter().any(|c| c.confirmation_code == code)
    }
}

/// Email is checked across all rows before username, matching the order the
/// table constraints are declared in.
fn user_conflict<'a>(
    mut existing: impl Iterator<Item = &'a User> + Clone,
    user: &User,
) -> Option<&'static str> {
    if existing.clone().any(|other| other.email == user.email) {
        Some(EMAIL_CONSTRAINT)
    } else if existing.any(|other| other.username == user.username) {
        Some(USERNAME_CONSTRAINT)
    } else {
        None
    }
}

fn injected(context: &'static str) -> AppError {
    AppError::repository("Injected storage failure", context)
}

fn unique_violation(message: &'static str, context: &'static str, constraint: &str) -> AppError {
    AppError::repository(message, context).with_kind(ErrorKind::UniqueViolation {
        constraint: Some(constraint.to_string()),
    })
}

/// Shared in-memory store; cloning shares the underlying rows
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    fail_create: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call at `point` fail
    pub async fn fail_on(&self, point: FailurePoint) {
        if point == FailurePoint::CreateUnitOfWork {
            self.fail_create.store(true, Ordering::SeqCst);
        }
        self.state.lock().await.failures.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.fail_create.store(false, Ordering::SeqCst);
        self.state.lock().await.failures.clear();
    }

    /// Insert a committed user row directly, bypassing any transaction
    pub async fn seed_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Committed users
    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }

    /// Committed account confirmations
    pub async fn account_confirmations(&self) -> Vec<AccountConfirmation> {
        self.state.lock().await.confirmations.clone()
    }

    /// Number of successfully committed transactions
    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.commits
    }
}

impl UnitOfWorkFactory for MemoryStore {
    type UnitOfWork = MemoryUnitOfWork;

    fn create(&self) -> AppResult<MemoryUnitOfWork> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::transaction(
                "Error occurred while creating unit of work",
                "MemoryStore::create",
            ));
        }
        Ok(MemoryUnitOfWork::new(self.clone()))
    }
}

#[derive(Default)]
struct PendingWrites {
    users: Vec<User>,
    confirmations: Vec<AccountConfirmation>,
    confirmed: Vec<Uuid>,
}

enum MemoryTransaction {
    Idle,
    Active(PendingWrites),
    Closed,
}

type SharedMemoryTransaction = Arc<Mutex<MemoryTransaction>>;

/// Unit of work over a [`MemoryStore`]; staged writes are dropped with it
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    transaction: SharedMemoryTransaction,
    repository: OnceLock<MemoryUserRepository>,
}

impl MemoryUnitOfWork {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            transaction: Arc::new(Mutex::new(MemoryTransaction::Idle)),
            repository: OnceLock::new(),
        }
    }

    /// Whether a transaction is currently open
    pub async fn is_active(&self) -> bool {
        matches!(*self.transaction.lock().await, MemoryTransaction::Active(_))
    }

    /// Whether the unit of work has been committed or rolled back
    pub async fn is_closed(&self) -> bool {
        matches!(*self.transaction.lock().await, MemoryTransaction::Closed)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    type Repository = MemoryUserRepository;

    async fn begin_transaction(&self) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUnitOfWork::begin_transaction";

        let mut transaction = self.transaction.lock().await;
        match &*transaction {
            MemoryTransaction::Idle => {}
            MemoryTransaction::Active(_) => {
                return Err(AppError::transaction("Transaction already started", CONTEXT));
            }
            MemoryTransaction::Closed => {
                return Err(AppError::transaction("Unit of work already closed", CONTEXT));
            }
        }
        if self.store.state.lock().await.fails_at(FailurePoint::BeginTransaction) {
            return Err(AppError::transaction("Failed to begin transaction", CONTEXT));
        }

        *transaction = MemoryTransaction::Active(PendingWrites::default());
        Ok(())
    }

    fn repository(&self) -> &MemoryUserRepository {
        self.repository.get_or_init(|| MemoryUserRepository {
            store: self.store.clone(),
            transaction: self.transaction.clone(),
        })
    }

    async fn commit(&self) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUnitOfWork::commit";

        let mut transaction = self.transaction.lock().await;
        let pending = match std::mem::replace(&mut *transaction, MemoryTransaction::Closed) {
            MemoryTransaction::Active(pending) => pending,
            previous => {
                *transaction = previous;
                return Err(AppError::transaction("Transaction already closed", CONTEXT));
            }
        };

        let mut state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::Commit) {
            return Err(AppError::transaction(
                "Error occurred while committing changes to database",
                CONTEXT,
            ));
        }

        // Rows committed by other units of work since staging.
        for user in &pending.users {
            if let Some(constraint) = state.conflicting_user_constraint(user) {
                return Err(AppError::transaction(
                    "Error occurred while committing changes to database",
                    CONTEXT,
                )
                .with_kind(ErrorKind::UniqueViolation {
                    constraint: Some(constraint.to_string()),
                }));
            }
        }
        for confirmation in &pending.confirmations {
            if state.has_confirmation_code(confirmation.confirmation_code) {
                return Err(AppError::transaction(
                    "Error occurred while committing changes to database",
                    CONTEXT,
                )
                .with_kind(ErrorKind::UniqueViolation {
                    constraint: Some(CONFIRMATION_CODE_CONSTRAINT.to_string()),
                }));
            }
        }

        for user in pending.users {
            state.users.insert(user.id, user);
        }
        state.confirmations.extend(pending.confirmations);
        for user_id in pending.confirmed {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.is_account_confirmed = true;
            }
        }
        state.commits += 1;

        debug!("In-memory transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUnitOfWork::rollback";

        let mut transaction = self.transaction.lock().await;
        match std::mem::replace(&mut *transaction, MemoryTransaction::Closed) {
            MemoryTransaction::Active(_) => {}
            previous => {
                *transaction = previous;
                return Err(AppError::transaction("Transaction already closed", CONTEXT));
            }
        }

        if self.store.state.lock().await.fails_at(FailurePoint::Rollback) {
            return Err(AppError::transaction(
                "Error occurred while rolling back changes",
                CONTEXT,
            ));
        }
        debug!("In-memory transaction rolled back");
        Ok(())
    }
}

/// Repository handed out by a [`MemoryUnitOfWork`]
#[derive(Clone)]
pub struct MemoryUserRepository {
    store: MemoryStore,
    transaction: SharedMemoryTransaction,
}

impl MemoryUserRepository {
    async fn find_user(
        &self,
        context: &'static str,
        predicate: impl Fn(&User) -> bool + Send,
    ) -> AppResult<Option<User>> {
        let transaction = self.transaction.lock().await;
        let state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::Read) {
            return Err(injected(context));
        }

        let pending = match &*transaction {
            MemoryTransaction::Active(pending) => Some(pending),
            MemoryTransaction::Idle | MemoryTransaction::Closed => None,
        };

        let mut user = pending
            .and_then(|p| p.users.iter().find(|u| predicate(u)).cloned())
            .or_else(|| state.users.values().find(|u| predicate(u)).cloned());

        if let (Some(user), Some(pending)) = (user.as_mut(), pending) {
            if pending.confirmed.contains(&user.id) {
                user.is_account_confirmed = true;
            }
        }
        Ok(user)
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create_user(&self, user: &User) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUserRepository::create_user";
        const MESSAGE: &str = "Database error occurred while trying to create a new user";

        let mut transaction = self.transaction.lock().await;
        let state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::CreateUser) {
            return Err(injected(CONTEXT));
        }
        let MemoryTransaction::Active(pending) = &mut *transaction else {
            return Err(AppError::transaction(
                "Write attempted outside of an active transaction",
                CONTEXT,
            ));
        };

        let conflict = user_conflict(state.users.values().chain(pending.users.iter()), user);
        if let Some(constraint) = conflict {
            return Err(unique_violation(MESSAGE, CONTEXT, constraint)
                .with_argument(format!("user: {:?}", user)));
        }

        pending.users.push(user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        self.find_user("MemoryUserRepository::get_user_by_id", |u| u.id == id)
            .await
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.find_user("MemoryUserRepository::get_user_by_email", |u| {
            u.email == email
        })
        .await
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.find_user("MemoryUserRepository::get_user_by_username", |u| {
            u.username == username
        })
        .await
    }

    async fn create_account_confirmation(
        &self,
        account_confirmation: &AccountConfirmation,
    ) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUserRepository::create_account_confirmation";

        let mut transaction = self.transaction.lock().await;
        let state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::CreateAccountConfirmation) {
            return Err(injected(CONTEXT));
        }
        let MemoryTransaction::Active(pending) = &mut *transaction else {
            return Err(AppError::transaction(
                "Write attempted outside of an active transaction",
                CONTEXT,
            ));
        };

        let code = account_confirmation.confirmation_code;
        let duplicate = state.has_confirmation_code(code)
            || pending
                .confirmations
                .iter()
                .any(|c| c.confirmation_code == code);
        if duplicate {
            return Err(unique_violation(
                "Database error occurred while trying to create an account confirmation entry",
                CONTEXT,
                CONFIRMATION_CODE_CONSTRAINT,
            ));
        }

        pending.confirmations.push(account_confirmation.clone());
        Ok(())
    }

    async fn get_account_confirmation_by_confirmation_code(
        &self,
        confirmation_code: Uuid,
    ) -> AppResult<Option<AccountConfirmation>> {
        let transaction = self.transaction.lock().await;
        let state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::Read) {
            return Err(injected(
                "MemoryUserRepository::get_account_confirmation_by_confirmation_code",
            ));
        }

        let staged: &[AccountConfirmation] = match &*transaction {
            MemoryTransaction::Active(pending) => pending.confirmations.as_slice(),
            MemoryTransaction::Idle | MemoryTransaction::Closed => &[],
        };
        Ok(staged
            .iter()
            .chain(state.confirmations.iter())
            .find(|c| c.confirmation_code == confirmation_code)
            .cloned())
    }

    async fn confirm_user_account(&self, user_id: Uuid) -> AppResult<()> {
        const CONTEXT: &str = "MemoryUserRepository::confirm_user_account";

        let mut transaction = self.transaction.lock().await;
        let state = self.store.state.lock().await;
        if state.fails_at(FailurePoint::ConfirmUserAccount) {
            return Err(injected(CONTEXT));
        }
        let MemoryTransaction::Active(pending) = &mut *transaction else {
            return Err(AppError::transaction(
                "Write attempted outside of an active transaction",
                CONTEXT,
            ));
        };

        pending.confirmed.push(user_id);
        Ok(())
    }
}
