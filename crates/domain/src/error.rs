//! Domain error taxonomy and the responder that shapes it for clients.
//!
//! Every variant is rollback-worthy when returned from a unit of work; the
//! kind only decides how the boundary layer presents it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::StoreError;
use thiserror::Error;

/// Message used for every permission failure, whatever the resource.
pub const FORBIDDEN_MESSAGE: &str = "you do not have permission to perform this action";

const DATABASE_PUBLIC_MESSAGE: &str = "a database error occurred";

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// One or more business rules were violated. All violations are listed.
    #[error("{message}: {}", violations.join("; "))]
    Validation {
        message: String,
        violations: Vec<String>,
    },

    /// A referenced resource does not exist.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// No identity was supplied where one is required.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is known but may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The operation conflicts with related data or a concurrent change.
    #[error("{message}")]
    Conflict {
        message: String,
        details: Option<Value>,
    },

    /// The store failed. `message` preserves the raw driver text.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: StoreError,
    },
}

impl DomainError {
    pub fn validation(message: impl Into<String>, violations: Vec<String>) -> Self {
        DomainError::Validation {
            message: message.into(),
            violations,
        }
    }

    /// A validation error with a single violation.
    pub fn invalid(violation: impl Into<String>) -> Self {
        let violation = violation.into();
        DomainError::Validation {
            message: violation.clone(),
            violations: vec![violation],
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        DomainError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn unauthorized() -> Self {
        DomainError::Unauthorized("authentication required".to_string())
    }

    pub fn forbidden() -> Self {
        DomainError::Forbidden(FORBIDDEN_MESSAGE.to_string())
    }

    pub fn conflict(message: impl Into<String>, details: Option<Value>) -> Self {
        DomainError::Conflict {
            message: message.into(),
            details,
        }
    }

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation { .. } => ErrorKind::Validation,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
            DomainError::Forbidden(_) => ErrorKind::Forbidden,
            DomainError::Conflict { .. } => ErrorKind::Conflict,
            DomainError::Database { .. } => ErrorKind::Database,
        }
    }

    /// Returns the message safe to show to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self {
            DomainError::Validation { message, .. } => message.clone(),
            DomainError::Unauthorized(message) | DomainError::Forbidden(message) => {
                message.clone()
            }
            DomainError::Conflict { message, .. } => message.clone(),
            DomainError::NotFound { .. } => self.to_string(),
            DomainError::Database { .. } => DATABASE_PUBLIC_MESSAGE.to_string(),
        }
    }

    /// Returns structured detail for the response body, if any.
    pub fn details(&self) -> Option<Value> {
        match self {
            DomainError::Validation { violations, .. } => Some(Value::from(violations.clone())),
            DomainError::NotFound { resource } => Some(serde_json::json!({ "resource": resource })),
            DomainError::Conflict { details, .. } => details.clone(),
            _ => None,
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(source: StoreError) -> Self {
        if source.is_conflict() {
            return DomainError::conflict(
                "the resource was changed by a concurrent request; retry the operation",
                None,
            );
        }
        DomainError::Database {
            message: source.to_string(),
            source,
        }
    }
}

/// The closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    Database,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "RELATIONSHIP_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
        }
    }

    /// HTTP-equivalent status for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Database => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Client-facing error envelope: `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Shapes a domain error for a client, attaching the correlation token
    /// when the boundary layer supplied one.
    pub fn from_error(err: &DomainError, request_id: Option<&str>) -> Self {
        Self {
            error: ErrorBody {
                code: err.kind().code().to_string(),
                message: err.public_message(),
                details: err.details(),
                request_id: request_id.map(str::to_string),
            },
        }
    }
}
