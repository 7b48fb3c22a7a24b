use thiserror::Error;

/// Main error type for the BayesLoop system
#[derive(Error, Debug)]
pub enum BlError {
    #[error("Domain mismatch: {message}")]
    DomainMismatch { message: String },

    #[error("Model fit failed: {message}")]
    ModelFit { message: String },

    #[error("Model queried before it was fitted")]
    ModelNotFitted,

    #[error("Objective evaluation failed: {message}")]
    Objective { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BlError {
    pub fn domain_mismatch(message: impl Into<String>) -> Self {
        Self::DomainMismatch {
            message: message.into(),
        }
    }

    pub fn model_fit(message: impl Into<String>) -> Self {
        Self::ModelFit {
            message: message.into(),
        }
    }

    pub fn objective(message: impl Into<String>) -> Self {
        Self::Objective {
            message: message.into(),
        }
    }
}

/// Result type alias for BayesLoop operations
pub type BlResult<T> = Result<T, BlError>;

/// Helper trait for converting string errors
pub trait IntoBlError {
    fn into_bl_error(self) -> BlError;
}

impl IntoBlError for String {
    fn into_bl_error(self) -> BlError {
        BlError::Internal(self)
    }
}

impl IntoBlError for &str {
    fn into_bl_error(self) -> BlError {
        BlError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::BlError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BlError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BlError::Config(format!($($arg)*))
    };
}
