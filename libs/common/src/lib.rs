//! Common library for the account services
//!
//! This crate provides functionality shared by the services of the workspace:
//! the causal [`error::AppError`] value every layer wraps and propagates, and
//! PostgreSQL pool setup, migrations and health checks.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, init_pool, health_check};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     let is_healthy = health_check(&pool).await?;
//!     println!("Database health check: {}", is_healthy);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;

pub use error::{AppError, AppResult, ErrorKind, StatusClass};

