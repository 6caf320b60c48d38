//! Accounts service
//!
//! Transactional user registration and account confirmation. A registration
//! writes the user and its confirmation challenge in a single unit of work;
//! confirmation checks the challenge and flips the account to confirmed.

use sqlx::migrate::Migrator;

pub mod config;
pub mod credentials;
pub mod models;
pub mod notifier;
pub mod repositories;
pub mod routes;
pub mod service;
pub mod unit_of_work;
pub mod validation;

/// Embedded schema migrations for the accounts tables
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
