use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid logger format: {0} (expected: text|json|journald)")]
    InvalidFormat(String),

    #[error("journald is not supported on this platform or the feature is disabled")]
    JournaldNotSupported,

    #[error("logger has already been initialized")]
    AlreadyInitialized,

    #[error("invalid log level {level:?}: {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to initialize logger: {0}")]
    InitializationFailed(String),
}

impl LoggerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            LoggerError::InvalidFormat(_) => "logger_invalid_format",
            LoggerError::JournaldNotSupported => "logger_journald_not_supported",
            LoggerError::AlreadyInitialized => "logger_already_initialized",
            LoggerError::InvalidLevel { .. } => "logger_invalid_level",
            LoggerError::InitializationFailed(_) => "logger_initialization_failed",
        }
    }
}
