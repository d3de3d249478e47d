//! Unified error handling for the simulated sensor stack
//!
//! Every subsystem (generator, Modbus simulator, archive, facade) reports through
//! [`SimError`]. Expected simulation outcomes such as injected timeouts are modelled
//! here too, so they can be counted and logged without being treated as faults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information handed to the (external) API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status or custom)
    pub code: u16,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// SimError - Main error type
// ============================================================================

/// Main error type for all simulator crates
#[derive(Debug, Error)]
pub enum SimError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Invalid configuration: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Encoding Errors
    // ======================================
    #[error("Value {value} for {quantity} does not fit a 16-bit register")]
    EncodingRange { value: f64, quantity: String },

    // ======================================
    // Simulated Protocol Errors
    // ======================================
    #[error("Modbus exception 0x{code:02X}: {message}")]
    ModbusProtocol { code: u8, message: String },

    #[error("Simulated timeout: {0}")]
    SimulatedTimeout(String),

    #[error("Simulated device error: {0}")]
    SimulatedDeviceError(String),

    // ======================================
    // Lookup & Query Errors
    // ======================================
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ======================================
    // File & Serialization Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SimError
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// Shorthand for a rejected config field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::ConfigValidation { .. }
            | Self::Validation(_)
            | Self::InvalidTimeRange(_)
            | Self::EncodingRange { .. } => 400,

            // 404 Not Found
            Self::NotFound { .. } => 404,

            // 502 Bad Gateway
            Self::ModbusProtocol { .. } | Self::SimulatedDeviceError(_) => 502,

            // 504 Gateway Timeout
            Self::SimulatedTimeout(_) => 504,

            // 500 Internal Server Error
            Self::Configuration(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Whether this error is an expected outcome of fault injection
    pub fn is_simulated(&self) -> bool {
        matches!(
            self,
            Self::SimulatedTimeout(_) | Self::SimulatedDeviceError(_) | Self::ModbusProtocol { .. }
        )
    }

    /// Convert to API ErrorInfo
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string()).with_code(self.status_code());

        match self {
            Self::ConfigValidation { field, reason } => {
                error_info = error_info.add_field_error(field, reason);
            },
            Self::Validation(msg) => {
                error_info = error_info.with_details(msg.clone());
            },
            Self::ModbusProtocol { code, .. } => {
                error_info = error_info.with_details(format!("exception_code=0x{:02X}", code));
            },
            _ => {},
        }

        error_info
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SimError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<csv::Error> for SimError {
    fn from(err: csv::Error) -> Self {
        Self::Serialization(format!("CSV: {}", err))
    }
}

impl From<figment::Error> for SimError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($field:expr, $msg:expr) => {
        $crate::SimError::ConfigValidation {
            field: $field.to_string(),
            reason: $msg.to_string(),
        }
    };
    ($field:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::SimError::ConfigValidation {
            field: $field.to_string(),
            reason: format!($fmt, $($arg)*),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::SimError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SimError::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($code:expr, $msg:expr) => {
        $crate::SimError::ModbusProtocol {
            code: $code,
            message: $msg.to_string(),
        }
    };
}

// ============================================================================
// SimError implements SimErrorTrait
// ============================================================================

impl SimErrorTrait for SimError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. } => "CONFIG_VALIDATION",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::EncodingRange { .. } => "ENCODING_RANGE",
            Self::ModbusProtocol { .. } => "MODBUS_PROTOCOL",
            Self::SimulatedTimeout(_) => "SIMULATED_TIMEOUT",
            Self::SimulatedDeviceError(_) => "SIMULATED_DEVICE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTimeRange(_) => "INVALID_TIME_RANGE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigValidation { .. } | Self::Configuration(_) => ErrorCategory::Configuration,

            Self::EncodingRange { .. } => ErrorCategory::DataCorruption,

            Self::ModbusProtocol { .. } | Self::SimulatedDeviceError(_) => ErrorCategory::Protocol,

            Self::SimulatedTimeout(_) => ErrorCategory::Timeout,

            Self::NotFound { .. } => ErrorCategory::NotFound,

            Self::InvalidTimeRange(_) | Self::Validation(_) => ErrorCategory::Validation,

            Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Internal(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error Trait - classification layer
// ============================================================================

/// Error category enum - used for classification and log level selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Timeout,

    // Business logic layer
    Validation,
    NotFound,

    // Simulated protocol layer
    Protocol,

    // System level
    Internal,
    DataCorruption,

    // Others
    Unknown,
}

/// Error capability trait shared by all simulator error types
///
/// Gives callers a uniform way to classify an error, decide whether a retry
/// makes sense and pick a log level, without matching on concrete variants.
pub trait SimErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for API, logs, monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Unknown => Level::ERROR,
            ErrorCategory::Timeout | ErrorCategory::Protocol => Level::DEBUG,
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }
}
