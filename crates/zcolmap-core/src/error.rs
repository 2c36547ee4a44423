/*!
Error taxonomy for the column-mapping engine.

Every variant is fatal to the cycle that raised it. Configuration errors are
raised while a registry is being loaded; the rest are raised per cycle and
abort it after the owning transaction scope has cleaned up.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, ColmapError>;

/// Boxed driver error carried by [`ColmapError::Database`]
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ColmapError {
    /// Missing property, placeholder-count mismatch, unknown type tag, bad time zone
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing required value for {descriptor}")]
    MissingRequiredValue { descriptor: String },

    #[error("unsupported value type {actual} for {descriptor}: expected {expected}")]
    UnsupportedValueType {
        descriptor: String,
        expected: String,
        actual: String,
    },

    #[error("could not parse date [{value}] with format [{format}]: {reason}")]
    DateParse {
        value: String,
        format: String,
        reason: String,
    },

    #[error("no column values are available to write to [{table}]")]
    NoDataToWrite { table: String },

    #[error("rows were found for [{correlation}] but none carried a value to update")]
    NoValidColumnsToUpdate { correlation: String },

    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: DriverError,
    },

    /// The binder was handed a plan it cannot honour
    #[error("statement plan invariant violated: {0}")]
    PlanMismatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse grouping of errors used by callers deciding how to report a failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Raised while loading descriptors or settings
    Configuration,
    /// The message or staging data could not satisfy the descriptors
    Data,
    /// Driver or connection failure
    Database,
    /// Engine bug or I/O outside the driver
    Internal,
}

impl ColmapError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn missing_required(descriptor: impl Into<String>) -> Self {
        Self::MissingRequiredValue {
            descriptor: descriptor.into(),
        }
    }

    pub fn unsupported_type(
        descriptor: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::UnsupportedValueType {
            descriptor: descriptor.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn date_parse(
        value: impl Into<String>,
        format: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::DateParse {
            value: value.into(),
            format: format.into(),
            reason: reason.to_string(),
        }
    }

    pub fn no_data(table: impl Into<String>) -> Self {
        Self::NoDataToWrite {
            table: table.into(),
        }
    }

    pub fn no_valid_columns(correlation: impl Into<String>) -> Self {
        Self::NoValidColumnsToUpdate {
            correlation: correlation.into(),
        }
    }

    /// Wrap a driver error, naming the operation that was in flight
    pub fn database<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<DriverError>,
    {
        Self::Database {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn plan_mismatch(msg: impl Into<String>) -> Self {
        Self::PlanMismatch(msg.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::MissingRequiredValue { .. }
            | Self::UnsupportedValueType { .. }
            | Self::DateParse { .. }
            | Self::NoDataToWrite { .. }
            | Self::NoValidColumnsToUpdate { .. } => ErrorCategory::Data,
            Self::Database { .. } => ErrorCategory::Database,
            Self::PlanMismatch(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ColmapError::configuration("TABLE_NAME").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            ColmapError::missing_required("LRN").category(),
            ErrorCategory::Data
        );
        assert_eq!(
            ColmapError::no_valid_columns("mk-1").category(),
            ErrorCategory::Data
        );
        assert_eq!(
            ColmapError::database("execute", "disk I/O error").category(),
            ErrorCategory::Database
        );
        assert_eq!(
            ColmapError::plan_mismatch("slot 3").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_database_error_keeps_source() {
        use std::error::Error as _;

        let err = ColmapError::database("commit", "connection reset");
        assert!(err.to_string().contains("commit"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_no_data_message_names_table() {
        let err = ColmapError::no_data("SOA_LOG");
        assert_eq!(
            err.to_string(),
            "no column values are available to write to [SOA_LOG]"
        );
    }
}
