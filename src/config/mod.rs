//! Configuration loading and validation.
//!
//! Configuration is a YAML file with environment variable interpolation.
//! Global sections are validated as a whole; server entries are validated one
//! by one so a broken entry only disables its own source.

mod vars;

use serde::{Deserialize, Deserializer};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::coordinator::CoordinatorSettings;
use crate::error::{
    ConfigError, ConflictingServerIdSnafu, DuplicateServerSnafu, EnvInterpolationSnafu,
    InvalidFieldSnafu,
    MissingFieldSnafu, NoServersSnafu, ReadFileSnafu, YamlParseSnafu,
};
use crate::paths::{self, PathRequest, ServerPaths};
use crate::remote::RemoteTimeouts;

const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_POLLING_WINDOW_DAYS: u32 = 60;
const MAX_POLLING_WINDOW_DAYS: u32 = 36_500;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Raw server entries, validated individually by [`Config::server_sources`].
    #[serde(default)]
    servers: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub polling: PollingConfig,
    /// Per-operation timeouts of the remote channel.
    #[serde(default)]
    pub remote: RemoteTimeouts,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Scheduling of ingestion cycles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between the end of one cycle and the start of the next.
    pub interval_secs: u64,
    /// Upper bound of the random delay added to every wait.
    pub jitter_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Budget of one cycle; checked between files.
    pub max_cycle_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            jitter_secs: 0,
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
            max_cycle_secs: 120,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn max_cycle(&self) -> Duration {
        Duration::from_secs(self.max_cycle_secs)
    }
}

/// Where watermarks are persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: "state".to_string(),
        }
    }
}

/// Downstream event sink.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append events to `{path}/{server_id}.ndjson`.
    #[default]
    Ndjson,
    /// Log every event.
    Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: String,
    /// Aggregate player statistics from published events.
    pub player_stats: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: "events".to_string(),
            player_stats: false,
        }
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// How files are reached.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Sftp,
    /// A mirrored copy of the remote tree under `root_path`.
    Local,
}

/// A server entry as written in YAML, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerEntry {
    #[serde(default, deserialize_with = "scalar_string")]
    server_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    original_server_id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    root_path: Option<String>,
    world_dir: Option<String>,
    polling_window_days: Option<u32>,
    delimiter: Option<String>,
    #[serde(default)]
    transport: Transport,
    enabled: Option<bool>,
}

/// Server ids are often written as bare numbers.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    use serde::de::Error;
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number, got {other:?}"
        ))),
    }
}

/// A validated server source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSourceConfig {
    /// Normalized id used for state, metrics and events.
    pub server_id: String,
    /// Id as the remote filesystem knows it, when different.
    pub original_server_id: Option<String>,
    /// Host without port.
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub root_path: String,
    pub world_dir: Option<String>,
    pub polling_window_days: u32,
    pub delimiter: Option<u8>,
    pub transport: Transport,
    pub enabled: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerSourceConfig {
    fn from_entry(entry: ServerEntry) -> Result<Self, ConfigError> {
        let server_id = non_empty(entry.server_id).context(MissingFieldSnafu {
            server: "<unnamed>",
            field: "server_id",
        })?;
        let server = server_id.as_str();

        let raw_host = non_empty(entry.host).context(MissingFieldSnafu {
            server,
            field: "host",
        })?;
        let (host, embedded_port) = match raw_host.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok().context(InvalidFieldSnafu {
                    server,
                    field: "host",
                    message: format!("'{port}' is not a valid port"),
                })?;
                (host.to_string(), Some(port))
            }
            None => (raw_host.clone(), None),
        };
        ensure!(
            !host.is_empty(),
            MissingFieldSnafu {
                server,
                field: "host"
            }
        );
        let port = entry.port.or(embedded_port).unwrap_or(DEFAULT_SFTP_PORT);
        ensure!(
            port != 0,
            InvalidFieldSnafu {
                server,
                field: "port",
                message: "port 0 is not connectable",
            }
        );

        let username = non_empty(entry.username);
        let username = match entry.transport {
            Transport::Sftp => username.context(MissingFieldSnafu {
                server,
                field: "username",
            })?,
            Transport::Local => username.unwrap_or_default(),
        };

        let root_path = non_empty(entry.root_path).unwrap_or_else(|| "/".to_string());

        let polling_window_days = entry
            .polling_window_days
            .unwrap_or(DEFAULT_POLLING_WINDOW_DAYS);
        ensure!(
            (1..=MAX_POLLING_WINDOW_DAYS).contains(&polling_window_days),
            InvalidFieldSnafu {
                server,
                field: "polling_window_days",
                message: format!("must be between 1 and {MAX_POLLING_WINDOW_DAYS}"),
            }
        );

        let delimiter = match entry.delimiter.as_deref() {
            None => None,
            Some("\\t") => Some(b'\t'),
            Some(d) if d.len() == 1 && d.is_ascii() => Some(d.as_bytes()[0]),
            Some(d) => {
                return InvalidFieldSnafu {
                    server,
                    field: "delimiter",
                    message: format!("'{d}' is not a single ASCII character"),
                }
                .fail();
            }
        };

        Ok(Self {
            original_server_id: non_empty(entry.original_server_id),
            host,
            port,
            username,
            password: entry.password,
            root_path,
            world_dir: non_empty(entry.world_dir),
            polling_window_days,
            delimiter,
            transport: entry.transport,
            enabled: entry.enabled.unwrap_or(true),
            server_id,
        })
    }

    /// Remote directory layout of this source.
    ///
    /// For the local transport `root_path` is the local mirror directory, so
    /// remote paths are resolved from `/` inside it.
    pub fn paths(&self) -> ServerPaths {
        let root = match self.transport {
            Transport::Sftp => self.root_path.as_str(),
            Transport::Local => "/",
        };
        paths::resolve(
            PathRequest::new(&self.host, &self.server_id)
                .with_original_id(self.original_server_id.as_deref())
                .with_world_dir(self.world_dir.as_deref())
                .with_root(root),
        )
    }

    /// `host:port`, for logs.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.polling_window_days))
    }

    pub fn coordinator_settings(&self, polling: &PollingConfig) -> CoordinatorSettings {
        CoordinatorSettings {
            server_id: self.server_id.clone(),
            csv_dir: self.paths().csv_dir,
            map: self.world_dir.clone(),
            scan_maps: self.world_dir.is_none(),
            window: self.window(),
            max_cycle: polling.max_cycle(),
            delimiter: self.delimiter,
        }
    }
}

/// Server sources after validation.
#[derive(Debug, Default)]
pub struct ServerSources {
    pub valid: Vec<ServerSourceConfig>,
    /// One error per excluded entry.
    pub rejected: Vec<ConfigError>,
}

/// Supplies the server sources to ingest.
pub trait ServerConfigProvider {
    fn server_configs(&self) -> Vec<ServerSourceConfig>;
}

impl ServerConfigProvider for Config {
    /// Valid, enabled sources. Rejected entries are logged.
    fn server_configs(&self) -> Vec<ServerSourceConfig> {
        let sources = self.server_sources();
        for error in &sources.rejected {
            warn!(error = %error, "Excluding invalid server source");
        }
        sources.valid.into_iter().filter(|s| s.enabled).collect()
    }
}

impl ServerConfigProvider for Vec<ServerSourceConfig> {
    fn server_configs(&self) -> Vec<ServerSourceConfig> {
        self.iter().filter(|s| s.enabled).cloned().collect()
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.servers.is_empty(), NoServersSnafu);
        Ok(())
    }

    /// Validate every server entry independently.
    pub fn server_sources(&self) -> ServerSources {
        let mut sources = ServerSources::default();
        let mut seen = HashSet::new();
        let mut stems: HashMap<String, String> = HashMap::new();

        for (index, value) in self.servers.iter().enumerate() {
            let entry = match serde_yaml::from_value::<ServerEntry>(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    let server = match value.get("server_id") {
                        Some(serde_yaml::Value::String(s)) => s.clone(),
                        Some(serde_yaml::Value::Number(n)) => n.to_string(),
                        _ => format!("#{index}"),
                    };
                    sources.rejected.push(
                        InvalidFieldSnafu {
                            server,
                            field: "entry",
                            message: e.to_string(),
                        }
                        .build(),
                    );
                    continue;
                }
            };

            let source = match ServerSourceConfig::from_entry(entry) {
                Ok(source) => source,
                Err(e) => {
                    sources.rejected.push(e);
                    continue;
                }
            };
            if !seen.insert(source.server_id.clone()) {
                sources.rejected.push(
                    DuplicateServerSnafu {
                        server: source.server_id,
                    }
                    .build(),
                );
                continue;
            }
            if let Some(other) = stems.get(&paths::file_stem(&source.server_id)) {
                sources.rejected.push(
                    ConflictingServerIdSnafu {
                        server: source.server_id.clone(),
                        other: other.clone(),
                    }
                    .build(),
                );
                continue;
            }
            stems.insert(paths::file_stem(&source.server_id), source.server_id.clone());
            sources.valid.push(source);
        }
        sources
    }
}
