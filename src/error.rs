use thiserror::Error;

use crate::ingest::parser::ParseMailError;
use crate::mail::GatewayError;
use crate::template::TemplateError;

/// SQLSTATE codes raised when a concurrent writer won a race we can either
/// retry (serialization failure, deadlock) or absorb as a no-op (unique
/// violation on the message-id boundary).
const CONFLICT_SQLSTATES: [&str; 3] = ["23505", "40001", "40P01"];

/// Errors produced while turning inbound mail into tickets.
///
/// The variants map onto how the processing loop reacts: connectivity and
/// configuration errors abort the cycle and back off, parse and dispatch
/// errors skip the affected message, and conflicts are either retried
/// (allocation races) or absorbed (duplicate deliveries).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error(transparent)]
    Parse(#[from] ParseMailError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("confirmation dispatch failed for ticket {ticket_number}: {source}")]
    Dispatch {
        ticket_number: String,
        #[source]
        source: GatewayError,
    },

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl IngestError {
    /// Conflicts are the only class the caller retries within a cycle.
    pub fn is_conflict(&self) -> bool {
        matches!(self, IngestError::Conflict(_))
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let is_conflict = db
                    .code()
                    .map(|code| CONFLICT_SQLSTATES.contains(&code.as_ref()))
                    .unwrap_or(false);
                if is_conflict {
                    IngestError::Conflict(db.message().to_string())
                } else {
                    IngestError::Database(err)
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => IngestError::Connectivity(err.to_string()),
            _ => IngestError::Database(err),
        }
    }
}

impl From<GatewayError> for IngestError {
    fn from(err: GatewayError) -> Self {
        IngestError::Connectivity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_classify_as_connectivity() {
        let err: IngestError = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .into();
        assert!(matches!(err, IngestError::Connectivity(_)));
    }

    #[test]
    fn pool_timeout_classifies_as_connectivity() {
        let err: IngestError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, IngestError::Connectivity(_)));
    }

    #[test]
    fn row_not_found_stays_a_database_error() {
        let err: IngestError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, IngestError::Database(_)));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(IngestError::Conflict("duplicate key".into()).is_conflict());
        assert!(!IngestError::Configuration("missing var".into()).is_conflict());
    }
}
