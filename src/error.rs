//! Error types for vecgate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while staging, building, or auditing a suite
#[derive(Error, Debug)]
pub enum AuditError {
    /// Bad configuration: unknown mode tag, empty filter match, missing
    /// required source pattern. Always fatal, never produces partial reports.
    #[error("{0}")]
    Config(String),

    /// An external tool (compiler, linker, disassembler, emulator) failed
    #[error("{what} failed: {detail}")]
    Tool { what: String, detail: String },

    /// An external tool exceeded its deadline; partial output is preserved
    #[error("{what} timeout after {seconds:.1}s (partial output: {})", stdout_log.display())]
    Timeout {
        what: String,
        seconds: f64,
        stdout_log: PathBuf,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuditError {
    /// Shorthand for a fatal configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for an external-tool failure.
    pub fn tool(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Tool {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias for vecgate operations
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = AuditError::config("unsupported vector mode: warp");
        assert!(err.to_string().contains("warp"));
    }

    #[test]
    fn test_tool_error_display() {
        let err = AuditError::tool("link", "exit=1");
        assert!(err.to_string().contains("link failed"));
        assert!(err.to_string().contains("exit=1"));
    }

    #[test]
    fn test_timeout_error_display() {
        let err = AuditError::Timeout {
            what: "emulator".to_string(),
            seconds: 240.0,
            stdout_log: PathBuf::from("/tmp/out.txt"),
        };
        assert!(err.to_string().contains("240.0s"));
        assert!(err.to_string().contains("/tmp/out.txt"));
    }
}
