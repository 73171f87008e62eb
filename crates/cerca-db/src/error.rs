use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Errors surfaced by the moderation core.
///
/// Every variant carries an environ string naming the operation that failed,
/// e.g. `"propose mod action: insert into proposals table"`. Messages carry
/// row ids only, never user-supplied text.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{environ}: not found")]
    NotFound { environ: String },

    #[error("{environ}: {reason}")]
    Precondition { environ: String, reason: &'static str },

    #[error("{environ}: invariant violated: {reason}")]
    Invariant { environ: String, reason: String },

    #[error("{environ}: row {id} matches no known format")]
    Malformed { environ: String, id: i64 },

    #[error("{environ}: {source}")]
    Storage {
        environ: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database lock poisoned")]
    Poisoned,
}

impl DbError {
    pub fn not_found(environ: impl Into<String>) -> Self {
        Self::NotFound {
            environ: environ.into(),
        }
    }

    pub fn precondition(environ: impl Into<String>, reason: &'static str) -> Self {
        Self::Precondition {
            environ: environ.into(),
            reason,
        }
    }

    pub fn invariant(environ: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invariant {
            environ: environ.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}

/// Tags a rusqlite result with the operation it belongs to.
///
/// `QueryReturnedNoRows` becomes [`DbError::NotFound`]; everything else is a
/// [`DbError::Storage`].
pub trait Environ<T> {
    fn environ(self, environ: &str) -> Result<T>;
}

impl<T> Environ<T> for std::result::Result<T, rusqlite::Error> {
    fn environ(self, environ: &str) -> Result<T> {
        self.map_err(|source| match source {
            rusqlite::Error::QueryReturnedNoRows => DbError::not_found(environ),
            source => DbError::Storage {
                environ: environ.to_string(),
                source,
            },
        })
    }
}

/// Extension trait for optional query results
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(DbError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
