//! Errors shared by the otoge crates
//!
//! Score, merge and identity failures have their own types next to the
//! code that raises them; this one covers storage plumbing, files and
//! startup configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Storage failure outside the score store (developer registry, startup)
    #[cfg(feature = "sqlx")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or inconsistent configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// An upstream HTTP client could not be built
    #[error("upstream client error: {0}")]
    Upstream(String),
}
