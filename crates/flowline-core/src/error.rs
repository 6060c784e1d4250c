// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for flowline-core.
//!
//! Provides a unified error type carrying a stable machine-readable code for
//! each failure class.

use std::fmt;

use flowline_bpmn::{ExtractError, TransformError};
use flowline_engine::EngineError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during orchestration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// No definition is persisted under the given key.
    DefinitionNotFound {
        /// The definition key that was not found.
        key: String,
    },

    /// No instance is persisted under the given id.
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// The addressed work item does not exist in the engine.
    WorkItemNotFound {
        /// The engine task ID that was not found.
        task_id: String,
    },

    /// A generated engine id collided twice in a row.
    IdentityConflict {
        /// The original ID whose mapping could not be created.
        original_id: String,
    },

    /// The supplied document could not be parsed.
    MalformedDocument {
        /// Parser details.
        details: String,
    },

    /// Document transformation failed.
    TransformationFailed {
        /// The underlying cause.
        details: String,
    },

    /// The execution engine could not be reached or rejected the request.
    EngineUnavailable {
        /// Transport or engine-side details.
        details: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::WorkItemNotFound { .. } => "WORK_ITEM_NOT_FOUND",
            Self::IdentityConflict { .. } => "IDENTITY_CONFLICT",
            Self::MalformedDocument { .. } => "MALFORMED_DOCUMENT",
            Self::TransformationFailed { .. } => "TRANSFORMATION_FAILED",
            Self::EngineUnavailable { .. } => "ENGINE_UNAVAILABLE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefinitionNotFound { key } => {
                write!(f, "Process definition '{}' not found", key)
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "Process instance '{}' not found", instance_id)
            }
            Self::WorkItemNotFound { task_id } => {
                write!(f, "Work item '{}' not found", task_id)
            }
            Self::IdentityConflict { original_id } => {
                write!(
                    f,
                    "Could not create an identity mapping for '{}': generated engine id collided",
                    original_id
                )
            }
            Self::MalformedDocument { details } => {
                write!(f, "Malformed process document: {}", details)
            }
            Self::TransformationFailed { details } => {
                write!(f, "Document transformation failed: {}", details)
            }
            Self::EngineUnavailable { details } => {
                write!(f, "Execution engine error: {}", details)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<ExtractError> for CoreError {
    fn from(err: ExtractError) -> Self {
        CoreError::MalformedDocument {
            details: err.to_string(),
        }
    }
}

impl From<TransformError> for CoreError {
    fn from(err: TransformError) -> Self {
        match &err {
            TransformError::Parse(_) => CoreError::MalformedDocument {
                details: err.to_string(),
            },
            _ => CoreError::TransformationFailed {
                details: err.to_string(),
            },
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        CoreError::EngineUnavailable {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let cases = vec![
            (
                CoreError::DefinitionNotFound {
                    key: "orders".to_string(),
                },
                "DEFINITION_NOT_FOUND",
            ),
            (
                CoreError::IdentityConflict {
                    original_id: "alice".to_string(),
                },
                "IDENTITY_CONFLICT",
            ),
            (
                CoreError::EngineUnavailable {
                    details: "connection refused".to_string(),
                },
                "ENGINE_UNAVAILABLE",
            ),
            (
                CoreError::DatabaseError {
                    operation: "query".to_string(),
                    details: "locked".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn transform_parse_errors_map_to_malformed_document() {
        let parse_err = flowline_bpmn::extract("<broken").unwrap_err();
        let core: CoreError = parse_err.into();
        assert_eq!(core.error_code(), "MALFORMED_DOCUMENT");
    }
}
