//! Error types for killfeed using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Row-level problems are not errors:
//! they are counted and logged by the parser and never surface here.

use snafu::prelude::*;
use std::time::Duration;

// ============ Remote Errors ============

/// The remote operation that was being performed when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    Connect,
    List,
    Open,
    Read,
    Close,
}

impl RemoteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOperation::Connect => "connect",
            RemoteOperation::List => "list",
            RemoteOperation::Open => "open",
            RemoteOperation::Read => "read",
            RemoteOperation::Close => "close",
        }
    }
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification of a remote failure, used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote side did not answer in time.
    Timeout,
    /// The remote side answered with an error (refused, auth, missing path).
    Protocol,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Protocol => "protocol",
        }
    }
}

/// Errors that can occur while talking to a remote file source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RemoteError {
    /// Could not establish a connection.
    #[snafu(display("Failed to connect to {target}: {message}"))]
    Connect { target: String, message: String },

    /// Connected but the credentials were rejected.
    #[snafu(display("Authentication failed for {user}@{target}: {message}"))]
    Authenticate {
        target: String,
        user: String,
        message: String,
    },

    /// Directory listing failed.
    #[snafu(display("Failed to list {path}: {message}"))]
    List { path: String, message: String },

    /// Opening a file for reading failed.
    #[snafu(display("Failed to open {path}: {message}"))]
    Open { path: String, message: String },

    /// Reading file content failed.
    #[snafu(display("Failed to read {path}"))]
    Read {
        source: std::io::Error,
        path: String,
    },

    /// A remote call exceeded its timeout.
    #[snafu(display("{operation} of {target} timed out after {}s", timeout.as_secs_f64()))]
    Timeout {
        operation: RemoteOperation,
        target: String,
        timeout: Duration,
    },

    /// The connection worker went away (session dropped or thread died).
    #[snafu(display("Remote session worker for {target} is gone"))]
    WorkerGone { target: String },
}

impl RemoteError {
    /// Check if this error was produced by a timeout rather than the protocol.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. })
    }

    /// Classify the failure for retry policy purposes.
    pub fn kind(&self) -> FailureKind {
        if self.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Protocol
        }
    }
}

// ============ Timestamp Errors ============

/// A timestamp string matched none of the supported formats.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("Unrecognised timestamp '{value}'"))]
pub struct TimestampError {
    pub value: String,
}

// ============ Sink Errors ============

/// Errors that can occur while publishing canonical events.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to serialize the event.
    #[snafu(display("Failed to serialize event {id}"))]
    SinkSerialize {
        source: serde_json::Error,
        id: String,
    },

    /// IO error while writing events.
    #[snafu(display("Failed to write events to {path}"))]
    SinkIo {
        source: std::io::Error,
        path: String,
    },

    /// The receiving side of a channel sink is gone.
    #[snafu(display("Event channel closed"))]
    SinkClosed,

    /// The downstream collaborator rejected the event.
    #[snafu(display("Event {id} rejected: {message}"))]
    Rejected { id: String, message: String },
}

// ============ Watermark Store Errors ============

/// Errors that can occur while loading or saving watermarks.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// IO error on the state directory.
    #[snafu(display("Watermark store IO error at {path}"))]
    StoreIo {
        source: std::io::Error,
        path: String,
    },

    /// Persisted state could not be decoded or encoded.
    #[snafu(display("Watermark state for {server_id} is not valid JSON"))]
    StoreJson {
        source: serde_json::Error,
        server_id: String,
    },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// No server sources configured.
    #[snafu(display("At least one server must be configured"))]
    NoServers,

    /// A required field of one server source is missing or empty.
    #[snafu(display("Server '{server}' is missing required field '{field}'"))]
    MissingField { server: String, field: &'static str },

    /// A field of one server source has an unusable value.
    #[snafu(display("Server '{server}' has invalid {field}: {message}"))]
    InvalidField {
        server: String,
        field: &'static str,
        message: String,
    },

    /// Two sources share the same server id.
    #[snafu(display("Server id '{server}' is configured more than once"))]
    DuplicateServer { server: String },

    /// Two distinct server ids map to the same state and output file names.
    #[snafu(display("Server id '{server}' collides with '{other}' once made file-name safe"))]
    ConflictingServerId { server: String, other: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

impl ConfigError {
    /// Whether this error only affects a single source.
    pub fn is_source_scoped(&self) -> bool {
        matches!(
            self,
            ConfigError::MissingField { .. }
                | ConfigError::InvalidField { .. }
                | ConfigError::DuplicateServer { .. }
                | ConfigError::ConflictingServerId { .. }
        )
    }
}

// ============ Cycle Errors ============

/// Errors raised while running an ingestion cycle for one source.
///
/// Connection and watermark errors abort the cycle. A failed parse task only
/// costs its file, which stays unprocessed for the next cycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CycleError {
    /// The connection could not be established or the CSV root not listed.
    #[snafu(display("Connection-level failure for {server_id}"))]
    Connection {
        source: RemoteError,
        server_id: String,
    },

    /// The watermark could not be loaded.
    #[snafu(display("Failed to load watermark for {server_id}"))]
    LoadWatermark {
        source: StoreError,
        server_id: String,
    },

    /// The watermark could not be made durable before the cycle finished.
    #[snafu(display("Failed to persist watermark for {server_id}"))]
    SaveWatermark {
        source: StoreError,
        server_id: String,
    },

    /// A blocking parse task panicked.
    #[snafu(display("Parse task for {file} failed"))]
    ParseTask {
        source: tokio::task::JoinError,
        file: String,
    },
}

impl CycleError {
    /// Retry classification for the backoff policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            CycleError::Connection { source, .. } => source.kind(),
            _ => FailureKind::Protocol,
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ App Error (top-level) ============

/// Top-level errors that abort the whole process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Failed to prepare the watermark store.
    #[snafu(display("Failed to open watermark store"))]
    OpenStore { source: StoreError },

    /// Failed to prepare the event sink.
    #[snafu(display("Failed to open event sink"))]
    OpenSink { source: SinkError },

    /// Every configured source was rejected.
    #[snafu(display("No valid server sources ({rejected} rejected)"))]
    NoValidSources { rejected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_protocol() {
        let timeout = RemoteError::Timeout {
            operation: RemoteOperation::List,
            target: "/srv/deathlogs".to_string(),
            timeout: Duration::from_secs(5),
        };
        let refused = RemoteError::Connect {
            target: "10.0.0.1:22".to_string(),
            message: "connection refused".to_string(),
        };

        assert!(timeout.is_timeout());
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        assert!(!refused.is_timeout());
        assert_eq!(refused.kind(), FailureKind::Protocol);
    }

    #[test]
    fn test_timeout_display() {
        let err = RemoteError::Timeout {
            operation: RemoteOperation::Connect,
            target: "host:22".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "connect of host:22 timed out after 10s");
    }

    #[test]
    fn test_cycle_error_kind_follows_remote() {
        let err = CycleError::Connection {
            source: RemoteError::Timeout {
                operation: RemoteOperation::Connect,
                target: "host:22".to_string(),
                timeout: Duration::from_secs(10),
            },
            server_id: "7020".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn test_config_error_scope() {
        let missing = ConfigError::MissingField {
            server: "alpha".to_string(),
            field: "host",
        };
        assert!(missing.is_source_scoped());
        assert!(!ConfigError::NoServers.is_source_scoped());
    }
}
