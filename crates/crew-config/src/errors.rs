#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseFailed { path: String, message: String },

    #[error("config file already exists at '{path}'")]
    ConfigExists { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("IO operation failed: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::ReadFailed { .. } => "CONFIG_READ_FAILED",
            ConfigError::ParseFailed { .. } => "CONFIG_PARSE_FAILED",
            ConfigError::ConfigExists { .. } => "CONFIG_EXISTS",
            ConfigError::Invalid { .. } => "CONFIG_INVALID",
            ConfigError::IoError { .. } => "IO_ERROR",
        }
    }
}
