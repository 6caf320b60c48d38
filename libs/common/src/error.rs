//! Error types shared across the workspace
//!
//! [`AppError`] is the causal error value threaded through every layer of a
//! service: each layer wraps the error it receives in a new node that records
//! where it happened and with which (sanitised) arguments, keeping the inner
//! node as its child. [`DatabaseError`] covers pool bootstrap only.

use std::error::Error as StdError;
use std::fmt;

use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing::error;

/// Custom error type for database bootstrap operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Coarse classification carried by an [`AppError`].
///
/// The boundary layer maps it onto a transport status; the numeric values
/// follow HTTP so the mapping is the identity there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl StatusClass {
    pub fn as_u16(self) -> u16 {
        match self {
            StatusClass::BadRequest => 400,
            StatusClass::Forbidden => 403,
            StatusClass::NotFound => 404,
            StatusClass::Conflict => 409,
            StatusClass::Internal => 500,
        }
    }

    pub fn is_internal(self) -> bool {
        self == StatusClass::Internal
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// What went wrong, independent of how it is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; no side effects happened.
    Validation,
    /// A uniqueness conflict detected by the service.
    Duplicate,
    /// Resource absent, or supplied credentials did not match.
    NotFound,
    /// Begin, commit or rollback failed.
    Transaction,
    /// Entropy, clock or hashing failure.
    Generation,
    /// Storage I/O or constraint failure.
    Repository,
    /// The store rejected a write because of a unique constraint.
    UniqueViolation { constraint: Option<String> },
}

/// Message returned to callers in place of any internal-class message.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Chainable failure descriptor.
///
/// `source` holds either the wrapped inner [`AppError`] or the underlying
/// technical cause; [`AppError::child_app_error`] and
/// [`AppError::child_error`] tell the two apart.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AppError {
    status: StatusClass,
    kind: ErrorKind,
    message: String,
    context: &'static str,
    argument: Option<String>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
    logging: bool,
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a root node. Internal-class errors are flagged for logging.
    pub fn new(
        kind: ErrorKind,
        status: StatusClass,
        message: impl Into<String>,
        context: &'static str,
    ) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            context,
            argument: None,
            source: None,
            logging: status.is_internal(),
        }
    }

    pub fn validation(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Validation, StatusClass::BadRequest, message, context)
    }

    /// A validation failure reported as forbidden content.
    pub fn forbidden(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Validation, StatusClass::Forbidden, message, context)
    }

    pub fn duplicate(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Duplicate, StatusClass::Conflict, message, context)
    }

    pub fn not_found(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::NotFound, StatusClass::NotFound, message, context)
    }

    pub fn transaction(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Transaction, StatusClass::Internal, message, context)
    }

    pub fn generation(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Generation, StatusClass::Internal, message, context)
    }

    pub fn repository(message: impl Into<String>, context: &'static str) -> Self {
        Self::new(ErrorKind::Repository, StatusClass::Internal, message, context)
    }

    /// Attach the sanitised arguments of the failing call.
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }

    /// Attach the underlying technical cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the kind, keeping status and message.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Wrap this error in a new outer node carrying the same classification
    /// and message, annotated with the caller's context.
    pub fn wrap(self, context: &'static str, argument: Option<String>) -> Self {
        Self {
            status: self.status,
            kind: self.kind.clone(),
            message: self.message.clone(),
            context,
            argument,
            source: None,
            logging: self.logging,
        }
        .with_child(self)
    }

    /// Wrap this error under a different classification, e.g. a storage
    /// uniqueness violation surfaced as a conflict.
    pub fn reclassify(
        self,
        kind: ErrorKind,
        status: StatusClass,
        message: impl Into<String>,
        context: &'static str,
    ) -> Self {
        Self::new(kind, status, message, context).with_child(self)
    }

    fn with_child(mut self, child: AppError) -> Self {
        self.source = Some(Box::new(child));
        self
    }

    pub fn status(&self) -> StatusClass {
        self.status
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// The wrapped inner node, if this node wraps one.
    pub fn child_app_error(&self) -> Option<&AppError> {
        self.source.as_deref()?.downcast_ref::<AppError>()
    }

    /// The technical cause, if this node carries one instead of an inner node.
    pub fn child_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source
            .as_deref()
            .filter(|source| !source.is::<AppError>())
    }

    /// Whether the error should be written to the server log.
    pub fn should_log(&self) -> bool {
        self.logging
    }

    /// Message safe to hand back to the caller.
    pub fn public_message(&self) -> &str {
        if self.status.is_internal() {
            INTERNAL_ERROR_MESSAGE
        } else {
            &self.message
        }
    }

    /// Iterate from this node down to the root cause.
    pub fn chain(&self) -> impl Iterator<Item = &AppError> {
        std::iter::successors(Some(self), |e| e.child_app_error())
    }

    /// The innermost [`AppError`] of the chain.
    pub fn root(&self) -> &AppError {
        self.chain().last().unwrap_or(self)
    }

    /// Write the full causal chain to the log, one event per node.
    pub fn log(&self) {
        for (depth, node) in self.chain().enumerate() {
            error!(
                depth,
                status = node.status.as_u16(),
                context = node.context,
                argument = node.argument.as_deref().unwrap_or(""),
                cause = %node
                    .child_error()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
                "{}",
                node.message
            );
        }
    }
}
