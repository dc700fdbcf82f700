//! Core Error Taxonomy
//!
//! Stable error discriminators surfaced at the crate boundary. Callers
//! match on the variant, never on the message text.

use std::fmt;

/// Entity names used in `NotFound` / `AlreadyExists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Sku,
    Order,
    Document,
    Lot,
    Setting,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Entity::Sku => "sku",
            Entity::Order => "order",
            Entity::Document => "document",
            Entity::Lot => "lot",
            Entity::Setting => "setting",
        };
        write!(f, "{}", s)
    }
}

/// Errors surfaced by the core.
#[derive(Debug)]
pub enum CoreError {
    /// Entity absent.
    NotFound(Entity, String),
    /// Unique-key conflict on a non-idempotent write.
    AlreadyExists(Entity, String),
    /// Idempotent no-op: the document was closed before.
    AlreadyProcessed(String),
    /// Validation failure on caller-supplied data.
    InvalidInput(String),
    /// A business invariant would be broken (e.g. received > ordered).
    ConstraintViolation(String),
    /// SQLite reported the database as busy; retryable for idempotent reads.
    DatabaseBusy,
    /// Schema-level invariant broken, found by an integrity check.
    IntegrityError(String),
    /// Schema migration aborted; the system refuses to run.
    MigrationFailure(String),
    /// Writer lock acquisition timed out; not a corruption signal.
    WriterBusy,
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl CoreError {
    /// Whether a retry (per the storage retry policy) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::DatabaseBusy)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(entity, key) => write!(f, "{} not found: {}", entity, key),
            Self::AlreadyExists(entity, key) => write!(f, "{} already exists: {}", entity, key),
            Self::AlreadyProcessed(doc) => write!(f, "document already processed: {}", doc),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::ConstraintViolation(msg) => write!(f, "constraint violation: {}", msg),
            Self::DatabaseBusy => write!(f, "database busy"),
            Self::IntegrityError(msg) => write!(f, "integrity error: {}", msg),
            Self::MigrationFailure(msg) => write!(f, "migration failure: {}", msg),
            Self::WriterBusy => write!(f, "writer lock busy"),
            Self::Sqlite(e) => write!(f, "sqlite error: {}", e),
            Self::Serialization(e) => write!(f, "serialization error: {}", e),
            Self::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED surface as the retryable kind.
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::DatabaseBusy;
            }
        }
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
