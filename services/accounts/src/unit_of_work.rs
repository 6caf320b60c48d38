//! Unit of work: owns the lifetime of one storage transaction
//!
//! A unit of work starts `Idle`, becomes `Active` on
//! [`UnitOfWork::begin_transaction`] and ends `Closed` after a commit or a
//! rollback. A closed unit of work cannot be reused; one is created per
//! business operation through a [`UnitOfWorkFactory`].

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use common::{AppError, AppResult};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::repositories::{PgUserRepository, UserRepository, user::unique_violation};

/// Transaction boundary handed to the service for one business operation
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Repository: UserRepository;

    /// Idle to Active. Fails when a transaction was already started or the
    /// unit of work is closed.
    async fn begin_transaction(&self) -> AppResult<()>;

    /// The single repository bound to this unit of work, created on first use.
    fn repository(&self) -> &Self::Repository;

    /// Active to Closed, making every write visible.
    async fn commit(&self) -> AppResult<()>;

    /// Active to Closed, discarding every write.
    async fn rollback(&self) -> AppResult<()>;
}

/// Creates a fresh unit of work per business operation
pub trait UnitOfWorkFactory: Send + Sync + 'static {
    type UnitOfWork: UnitOfWork;

    fn create(&self) -> AppResult<Self::UnitOfWork>;
}

pub(crate) enum TransactionState {
    Idle,
    Active(Transaction<'static, Postgres>),
    Closed,
}

/// Transaction slot shared between a unit of work and its repository
pub(crate) type SharedTransaction = Arc<Mutex<TransactionState>>;

/// PostgreSQL unit of work
///
/// Dropping it while a transaction is still open rolls the transaction back,
/// so an operation abandoned mid-way (for example a cancelled request) never
/// leaves locks or partial writes behind.
pub struct PgUnitOfWork {
    pool: PgPool,
    transaction: SharedTransaction,
    repository: OnceLock<PgUserRepository>,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction: Arc::new(Mutex::new(TransactionState::Idle)),
            repository: OnceLock::new(),
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    type Repository = PgUserRepository;

    async fn begin_transaction(&self) -> AppResult<()> {
        const CONTEXT: &str = "PgUnitOfWork::begin_transaction";

        let mut state = self.transaction.lock().await;
        match &*state {
            TransactionState::Idle => {}
            TransactionState::Active(_) => {
                return Err(AppError::transaction("Transaction already started", CONTEXT));
            }
            TransactionState::Closed => {
                return Err(AppError::transaction("Unit of work already closed", CONTEXT));
            }
        }

        let transaction = self.pool.begin().await.map_err(|e| {
            AppError::transaction("Failed to begin transaction", CONTEXT).with_source(e)
        })?;
        *state = TransactionState::Active(transaction);

        debug!("Transaction started");
        Ok(())
    }

    fn repository(&self) -> &PgUserRepository {
        self.repository
            .get_or_init(|| PgUserRepository::new(self.pool.clone(), self.transaction.clone()))
    }

    async fn commit(&self) -> AppResult<()> {
        const CONTEXT: &str = "PgUnitOfWork::commit";

        let mut state = self.transaction.lock().await;
        let transaction = match std::mem::replace(&mut *state, TransactionState::Closed) {
            TransactionState::Active(transaction) => transaction,
            previous => {
                *state = previous;
                return Err(AppError::transaction("Transaction already closed", CONTEXT));
            }
        };

        transaction.commit().await.map_err(|e| {
            let err = AppError::transaction(
                "Error occurred while committing changes to database",
                CONTEXT,
            );
            let err = match unique_violation(&e) {
                Some(kind) => err.with_kind(kind),
                None => err,
            };
            err.with_source(e)
        })?;

        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        const CONTEXT: &str = "PgUnitOfWork::rollback";

        let mut state = self.transaction.lock().await;
        let transaction = match std::mem::replace(&mut *state, TransactionState::Closed) {
            TransactionState::Active(transaction) => transaction,
            previous => {
                *state = previous;
                return Err(AppError::transaction("Transaction already closed", CONTEXT));
            }
        };

        transaction.rollback().await.map_err(|e| {
            warn!("Rollback failed: {}", e);
            AppError::transaction("Error occurred while rolling back changes", CONTEXT)
                .with_source(e)
        })?;

        debug!("Transaction rolled back");
        Ok(())
    }
}

/// Hands out [`PgUnitOfWork`]s over a shared pool
#[derive(Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    type UnitOfWork = PgUnitOfWork;

    fn create(&self) -> AppResult<PgUnitOfWork> {
        if self.pool.is_closed() {
            return Err(AppError::transaction(
                "Error occurred while creating unit of work: connection pool is closed",
                "PgUnitOfWorkFactory::create",
            ));
        }
        Ok(PgUnitOfWork::new(self.pool.clone()))
    }
}
