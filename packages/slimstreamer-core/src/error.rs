//! Centralized error types for the SlimStreamer core library.
//!
//! This module defines a typed error hierarchy with `thiserror`, one variant
//! family per concern (capture, protocol, network, configuration), so callers
//! can match on the kind of failure without parsing strings.

use thiserror::Error;

/// Capture-pipeline failure. Transient ALSA conditions (xrun, suspend) are
/// recovered in place and never surface as this error; this variant is only
/// raised once recovery has been exhausted for a given device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device '{device}': {source}")]
    Open {
        device: String,
        #[source]
        source: alsa::Error,
    },

    #[error("capture device '{device}' reported an unrecoverable error: {source}")]
    Unrecoverable {
        device: String,
        #[source]
        source: alsa::Error,
    },
}

/// SlimProto wire-level or session-level protocol failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported opcode '{0}'")]
    UnsupportedOpcode(String),

    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("HELO was not the first command received from this client")]
    HeloNotFirst,

    #[error("missing client ID on streaming session request")]
    MissingClientId,

    #[error("client ID '{0}' does not correlate with any open SlimProto session")]
    UnknownClientId(String),
}

/// Configuration validation failure. Config-file reading/parsing happens in
/// the server binary (via `anyhow`, since it owns the file format choice);
/// this type only covers `Config::validate`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application-wide error type for the SlimStreamer server.
#[derive(Debug, Error)]
pub enum SlimStreamerError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenient Result alias for application-wide operations.
pub type SlimStreamerResult<T> = Result<T, SlimStreamerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_messages_are_descriptive() {
        let err = ProtocolError::Truncated {
            expected: 8,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "truncated frame: expected at least 8 bytes, got 3"
        );
    }

    #[test]
    fn config_error_converts_into_top_level_error() {
        let err: SlimStreamerError = ConfigError::Invalid("max_clients must be > 0".into()).into();
        assert!(matches!(err, SlimStreamerError::Config(_)));
    }

    #[test]
    fn unknown_client_id_is_reported_by_value() {
        let err = ProtocolError::UnknownClientId("42".into());
        assert_eq!(
            err.to_string(),
            "client ID '42' does not correlate with any open SlimProto session"
        );
    }
}
