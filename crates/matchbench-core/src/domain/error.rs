//! Domain-level error taxonomy for matchbench.

use std::path::PathBuf;

/// A matcher descriptor that cannot be invoked at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("matcher name must not be empty")]
    EmptyName,

    #[error("matcher {matcher} has an empty command")]
    EmptyCommand { matcher: String },

    #[error("matcher {matcher} has a zero timeout")]
    ZeroTimeout { matcher: String },

    #[error("matcher {matcher}: working directory {path:?} does not exist")]
    MissingWorkingDir { matcher: String, path: PathBuf },

    #[error("matcher {matcher} asks for a fresh instance but has no working directory")]
    FreshInstanceWithoutWorkingDir { matcher: String },

    #[error("matcher {matcher} writes an output file but its command has no {{output}} placeholder")]
    MissingOutputPlaceholder { matcher: String },
}

/// Errors from marshalling alignment artifacts.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed alignment: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("location {0} is not a local file")]
    NotLocal(String),

    #[error("confidence {confidence} of {entity_one} -> {entity_two} is outside [0, 1]")]
    ConfidenceOutOfRange {
        entity_one: String,
        entity_two: String,
        confidence: f64,
    },

    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Matchbench domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unresolvable matcher: {0}")]
    Resolve(#[from] ResolveError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for matchbench domain operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::EmptyCommand {
            matcher: "logmap".to_string(),
        };
        assert!(err.to_string().contains("logmap"));

        let err = ResolveError::MissingOutputPlaceholder {
            matcher: "m".to_string(),
        };
        assert!(err.to_string().contains("{output}"));
    }

    #[test]
    fn test_core_error_wraps_resolve() {
        let err: CoreError = ResolveError::EmptyName.into();
        assert!(err.to_string().contains("unresolvable matcher"));
    }

    #[test]
    fn test_codec_error_not_local() {
        let err = CodecError::NotLocal("http://example.org/a.json".to_string());
        assert!(err.to_string().contains("not a local file"));
    }
}
