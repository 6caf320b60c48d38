//! Database module for handling PostgreSQL connections and operations
//!
//! This module provides connection pooling, configuration, migrations and
//! health checks for the PostgreSQL database. The pool is the only shared
//! mutable resource of a service: it caps the number of open connections and
//! makes callers beyond the cap wait for a free one instead of failing.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Pool, Postgres, migrate::Migrator, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;
use tracing::{error, info};

/// Database configuration struct
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// How long a caller waits for a free connection, in seconds
    pub connection_timeout: u64,
    /// Idle connections older than this are closed, in seconds
    pub idle_timeout: u64,
    /// Connections are recycled after this lifetime, in seconds
    pub max_lifetime: u64,
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig from environment variables
    ///
    /// # Environment Variables
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `DATABASE_MAX_CONNECTIONS`: Maximum number of connections (default: 25)
    /// - `DATABASE_MIN_CONNECTIONS`: Minimum number of connections (default: 1)
    /// - `DATABASE_CONNECTION_TIMEOUT`: Acquire timeout in seconds (default: 30)
    /// - `DATABASE_IDLE_TIMEOUT`: Idle timeout in seconds (default: 25)
    /// - `DATABASE_MAX_LIFETIME`: Connection lifetime in seconds (default: 300)
    pub fn from_env() -> DatabaseResult<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            DatabaseError::Configuration("DATABASE_URL environment variable not set".to_string())
        })?;

        Ok(Self {
            database_url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 25),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", 1),
            connection_timeout: env_or("DATABASE_CONNECTION_TIMEOUT", 30),
            idle_timeout: env_or("DATABASE_IDLE_TIMEOUT", 25),
            max_lifetime: env_or("DATABASE_MAX_LIFETIME", 300),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Initialize a PostgreSQL connection pool
///
/// # Arguments
///
/// * `config` - Database configuration
///
/// # Returns
///
/// * `DatabaseResult<Pool<Postgres>>` - PostgreSQL connection pool or error
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<Pool<Postgres>> {
    info!("Initializing database connection pool");

    let options = config
        .database_url
        .parse()
        .map_err(|e| DatabaseError::Configuration(format!("Invalid database URL: {}", e)))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .max_lifetime(Duration::from_secs(config.max_lifetime))
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool initialized successfully"
    );
    Ok(pool)
}

/// Apply pending migrations
pub async fn run_migrations(pool: &PgPool, migrator: &Migrator) -> DatabaseResult<()> {
    migrator
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    info!("Database migrations applied");
    Ok(())
}

/// Check database connectivity
///
/// # Arguments
///
/// * `pool` - PostgreSQL connection pool
///
/// # Returns
///
/// * `DatabaseResult<bool>` - True if connection is successful, false otherwise
pub async fn health_check(pool: &PgPool) -> DatabaseResult<bool> {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Ok(true),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}
