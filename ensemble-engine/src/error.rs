//! Engine error type.
//!
//! Only the control path returns errors. Boundary processing and value
//! resolution are infallible by signature so a local fault can never stall the
//! shared clock.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("scene schema version {found} is not supported (expected {expected})")]
    UnsupportedSceneVersion { found: u32, expected: u32 },

    #[error("scene slot {0} is empty")]
    EmptySlot(u32),

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("invalid sub-parameter path `{0}`")]
    InvalidPath(String),

    #[error("invalid value for `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse failed: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_value(path: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidValue { path: path.to_string(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let e = EngineError::UnsupportedSceneVersion { found: 9, expected: 1 };
        assert!(e.to_string().contains('9'));
        let e = EngineError::invalid_value("freq.baseValue", "not a number");
        assert!(e.to_string().contains("freq.baseValue"));
    }

    #[test]
    fn json_errors_convert() {
        let bad: std::result::Result<u32, _> = serde_json::from_str("nope");
        let e: EngineError = bad.unwrap_err().into();
        assert!(matches!(e, EngineError::Serialization(_)));
    }
}
