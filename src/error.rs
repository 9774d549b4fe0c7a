use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type covering every failure class in the pipeline.
///
/// Infrastructure errors carry the underlying cause; request-shaped errors
/// (validation, authorization) carry a human-readable reason that is safe to
/// return to the caller.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Request errors =====
    #[error("validation error: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    // ===== Broker errors =====
    #[error("broker error: {0}")]
    Broker(String),

    // ===== Cache / Lock Service errors =====
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    // ===== Durable store errors =====
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // ===== Serialization errors =====
    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Broadcast errors =====
    #[error("broadcast error: {0}")]
    Broadcast(String),

    // ===== Configuration errors =====
    #[error("configuration error: {0}")]
    Config(String),

    // ===== Internal errors =====
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Stable code for programmatic error handling and log aggregation.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Broker(_) => "BROKER_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Encode(_) | AppError::Decode(_) => "SERIALIZATION_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Broadcast(_) => "BROADCAST_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// True for failures of external infrastructure, where the pipeline
    /// degrades to the next-best path instead of failing the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::Broker(_) | AppError::Cache(_) | AppError::Database(_)
        )
    }

    /// Log this error with a level matching its class.
    pub fn log(&self) {
        let code = self.error_code();
        match self {
            AppError::Validation(_) | AppError::Forbidden(_) => {
                tracing::warn!(error = %self, error_code = %code, "Request rejected");
            }
            _ => {
                tracing::error!(error = %self, error_code = %code, "Pipeline error");
            }
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        AppError::Broker(msg.into())
    }

    pub fn broadcast(msg: impl Into<String>) -> Self {
        AppError::Broadcast(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Broker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_classification() {
        assert!(AppError::broker("down").is_infrastructure());
        assert!(!AppError::validation("empty body").is_infrastructure());
        assert!(!AppError::forbidden("not a member").is_infrastructure());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AppError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(AppError::broker("x").error_code(), "BROKER_ERROR");
    }
}
