use serde_json::json;

use crate::model::RecordStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot {event} record {record_id} in state {current}")]
    InvalidTransition {
        record_id: i64,
        current: RecordStatus,
        event: &'static str,
    },

    #[error("permission denied: {operation} requires {required}")]
    PermissionDenied {
        operation: &'static str,
        required: String,
    },

    #[error("concurrent modification of {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("{lookup} lookup failed: {message}")]
    Dependency {
        lookup: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }

    pub fn permission_denied(operation: &'static str, required: impl Into<String>) -> Self {
        EngineError::PermissionDenied {
            operation,
            required: required.into(),
        }
    }

    pub fn dependency(lookup: &'static str, message: impl Into<String>) -> Self {
        EngineError::Dependency {
            lookup,
            message: message.into(),
        }
    }

    /// Stable code surfaced on the IPC channel.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::PermissionDenied { .. } => "permission_denied",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Dependency { .. } => "dependency",
            EngineError::Storage(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::InvalidArgument(_) => None,
            EngineError::InvalidTransition {
                record_id,
                current,
                event,
            } => Some(json!({
                "entity": "record",
                "id": record_id,
                "currentStatus": current.as_str(),
                "event": event,
            })),
            EngineError::PermissionDenied {
                operation,
                required,
            } => Some(json!({ "operation": operation, "required": required })),
            EngineError::Conflict { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::Dependency { lookup, .. } => Some(json!({ "lookup": lookup })),
            EngineError::Storage(_) => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
