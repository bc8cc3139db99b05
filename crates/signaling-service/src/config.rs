//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; a value that is present but unparsable or out of range is a
//! startup error rather than a silent fallback to the default.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP + WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sig";

/// Default maximum number of concurrently open rooms.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Default per-connection outbound queue size.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Largest accepted outbound queue size.
pub const MAX_OUTBOUND_BUFFER: usize = 4096;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 60;

/// Default graceful shutdown deadline in seconds.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECONDS: u64 = 10;

/// Default header carrying an injected identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Where a connection's identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentitySource {
    /// The client's `join.userId` is trusted as-is.
    #[default]
    SelfAsserted,
    /// An upstream auth proxy supplies the identity in an HTTP header on the
    /// upgrade request.
    Injected,
}

impl FromStr for IdentitySource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self-asserted" => Ok(IdentitySource::SelfAsserted),
            "injected" => Ok(IdentitySource::Injected),
            _ => Err(()),
        }
    }
}

/// Scope in which an identity must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityScope {
    /// Unique per room; the same name may be online in two rooms.
    #[default]
    Room,
    /// Unique process-wide.
    Global,
}

impl FromStr for IdentityScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "room" => Ok(IdentityScope::Room),
            "global" => Ok(IdentityScope::Global),
            _ => Err(()),
        }
    }
}

/// How `join` resolves a room ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomPolicy {
    /// Unknown room IDs create a fresh room.
    #[default]
    CreateOnJoin,
    /// Only pre-registered rooms may be joined.
    ExistingOnly,
}

impl FromStr for RoomPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create-on-join" => Ok(RoomPolicy::CreateOnJoin),
            "existing-only" => Ok(RoomPolicy::ExistingOnly),
            _ => Err(()),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Signaling service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP + WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this instance, used in logs.
    pub instance_id: String,

    /// Default participant limit for rooms created on join (`None` = unlimited).
    pub max_participants: Option<usize>,

    /// Maximum number of concurrently open rooms.
    pub max_rooms: usize,

    /// Per-connection outbound queue size; overflowing it force-closes the connection.
    pub outbound_buffer: usize,

    /// Seconds without any inbound frame before a connection is closed.
    pub idle_timeout_seconds: u64,

    /// Default chat flag for rooms created on join.
    pub chat_enabled: bool,

    /// Where connection identities come from.
    pub identity_source: IdentitySource,

    /// Header carrying the identity when `identity_source` is `Injected`.
    pub identity_header: String,

    /// Scope in which identities must be unique.
    pub identity_scope: IdentityScope,

    /// How `join` resolves unknown room IDs.
    pub room_policy: RoomPolicy,

    /// Upper bound on graceful shutdown, in seconds.
    pub shutdown_deadline_seconds: u64,

    /// Log output format.
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any variable fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any variable fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let instance_id = vars
            .get("SIGNALING_INSTANCE_ID")
            .cloned()
            .unwrap_or_else(|| default_instance_id(vars.get("HOSTNAME").map(String::as_str)));

        // Room limits
        let max_participants = match vars.get("SIGNALING_MAX_PARTICIPANTS") {
            None => None,
            Some(raw) => Some(parse_value::<usize>("SIGNALING_MAX_PARTICIPANTS", raw)?),
        };
        if max_participants == Some(0) {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_MAX_PARTICIPANTS must be at least 1".to_string(),
            ));
        }

        let max_rooms = parse_var(vars, "SIGNALING_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        if max_rooms == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_MAX_ROOMS must be at least 1".to_string(),
            ));
        }

        // Connection limits
        let outbound_buffer = parse_var(vars, "SIGNALING_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        if !(1..=MAX_OUTBOUND_BUFFER).contains(&outbound_buffer) {
            return Err(ConfigError::InvalidValue(format!(
                "SIGNALING_OUTBOUND_BUFFER must be between 1 and {MAX_OUTBOUND_BUFFER}, got {outbound_buffer}"
            )));
        }

        let idle_timeout_seconds = parse_var(
            vars,
            "SIGNALING_IDLE_TIMEOUT_SECONDS",
            DEFAULT_IDLE_TIMEOUT_SECONDS,
        )?;
        if idle_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_IDLE_TIMEOUT_SECONDS must be at least 1".to_string(),
            ));
        }

        let chat_enabled = parse_var(vars, "SIGNALING_CHAT_ENABLED", true)?;

        // Identity and room policies
        let identity_source = parse_var(
            vars,
            "SIGNALING_IDENTITY_SOURCE",
            IdentitySource::default(),
        )?;

        let identity_header = vars
            .get("SIGNALING_IDENTITY_HEADER")
            .map(|h| h.trim().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string());
        if identity_header.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_IDENTITY_HEADER must not be empty".to_string(),
            ));
        }

        let identity_scope =
            parse_var(vars, "SIGNALING_IDENTITY_SCOPE", IdentityScope::default())?;

        let room_policy = parse_var(vars, "SIGNALING_ROOM_POLICY", RoomPolicy::default())?;

        let shutdown_deadline_seconds = parse_var(
            vars,
            "SIGNALING_SHUTDOWN_DEADLINE_SECONDS",
            DEFAULT_SHUTDOWN_DEADLINE_SECONDS,
        )?;

        let log_format = parse_var(vars, "SIGNALING_LOG_FORMAT", LogFormat::default())?;

        Ok(Config {
            bind_address,
            instance_id,
            max_participants,
            max_rooms,
            outbound_buffer,
            idle_timeout_seconds,
            chat_enabled,
            identity_source,
            identity_header,
            identity_scope,
            room_policy,
            shutdown_deadline_seconds,
            log_format,
        })
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Shutdown deadline as a `Duration`.
    #[must_use]
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_seconds)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}")))
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => parse_value(name, raw),
        None => Ok(default),
    }
}

fn default_instance_id(hostname: Option<&str>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    match hostname {
        Some(host) if !host.is_empty() => format!("{DEFAULT_INSTANCE_ID_PREFIX}-{host}-{suffix}"),
        _ => format!("{DEFAULT_INSTANCE_ID_PREFIX}-{suffix}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.instance_id.starts_with("sig-"));
        assert_eq!(config.max_participants, None);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert!(config.chat_enabled);
        assert_eq!(config.identity_source, IdentitySource::SelfAsserted);
        assert_eq!(config.identity_header, DEFAULT_IDENTITY_HEADER);
        assert_eq!(config.identity_scope, IdentityScope::Room);
        assert_eq!(config.room_policy, RoomPolicy::CreateOnJoin);
        assert_eq!(config.shutdown_deadline(), Duration::from_secs(10));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("SIGNALING_BIND_ADDRESS", "127.0.0.1:9000"),
            ("SIGNALING_INSTANCE_ID", "sig-test-001"),
            ("SIGNALING_MAX_PARTICIPANTS", "2"),
            ("SIGNALING_MAX_ROOMS", "5"),
            ("SIGNALING_OUTBOUND_BUFFER", "16"),
            ("SIGNALING_IDLE_TIMEOUT_SECONDS", "15"),
            ("SIGNALING_CHAT_ENABLED", "false"),
            ("SIGNALING_IDENTITY_SOURCE", "injected"),
            ("SIGNALING_IDENTITY_HEADER", "X-Auth-User"),
            ("SIGNALING_IDENTITY_SCOPE", "global"),
            ("SIGNALING_ROOM_POLICY", "existing-only"),
            ("SIGNALING_SHUTDOWN_DEADLINE_SECONDS", "3"),
            ("SIGNALING_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.instance_id, "sig-test-001");
        assert_eq!(config.max_participants, Some(2));
        assert_eq!(config.max_rooms, 5);
        assert_eq!(config.outbound_buffer, 16);
        assert_eq!(config.idle_timeout_seconds, 15);
        assert!(!config.chat_enabled);
        assert_eq!(config.identity_source, IdentitySource::Injected);
        assert_eq!(config.identity_header, "x-auth-user");
        assert_eq!(config.identity_scope, IdentityScope::Global);
        assert_eq!(config.room_policy, RoomPolicy::ExistingOnly);
        assert_eq!(config.shutdown_deadline_seconds, 3);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_instance_id_uses_hostname() {
        let config = Config::from_vars(&vars(&[("HOSTNAME", "pod-7")])).unwrap();
        assert!(config.instance_id.starts_with("sig-pod-7-"));
    }

    #[test]
    fn test_unparsable_values_rejected() {
        for (name, value) in [
            ("SIGNALING_MAX_ROOMS", "lots"),
            ("SIGNALING_OUTBOUND_BUFFER", "-1"),
            ("SIGNALING_CHAT_ENABLED", "yes"),
            ("SIGNALING_IDENTITY_SOURCE", "jwt"),
            ("SIGNALING_IDENTITY_SCOPE", "planet"),
            ("SIGNALING_ROOM_POLICY", "sometimes"),
            ("SIGNALING_LOG_FORMAT", "xml"),
        ] {
            let result = Config::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for (name, value) in [
            ("SIGNALING_MAX_PARTICIPANTS", "0"),
            ("SIGNALING_MAX_ROOMS", "0"),
            ("SIGNALING_OUTBOUND_BUFFER", "0"),
            ("SIGNALING_OUTBOUND_BUFFER", "100000"),
            ("SIGNALING_IDLE_TIMEOUT_SECONDS", "0"),
            ("SIGNALING_IDENTITY_HEADER", "  "),
        ] {
            let result = Config::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }
}
