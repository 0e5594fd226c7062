//! Configuration surface (§6, expanded in SPEC_FULL.md §10.C).
//!
//! TOML is the sole config source. Loading follows the same two-stage
//! pattern the teacher's `forwarder/src/config.rs` uses: a `Raw*` tree of
//! `Option<T>` fields deserialized straight from TOML, validated and
//! defaulted into a fully-populated public tree, surfacing a typed
//! [`ConfigError`] along the way.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public, validated config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickySessions {
    Off,
    On,
    OnWithFailover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedKind {
    RoundRobin,
    Hash,
}

/// Per-server-group policy (§6 "Configuration surface").
#[derive(Debug, Clone, PartialEq)]
pub struct ServerGroupPolicy {
    pub max_qsize: usize,
    pub max_forward_timeout: Duration,
    pub max_forward_retries: u32,
    pub max_connect_retries: u32,
    pub retry_nonidempotent: bool,
    pub sticky_sessions: StickySessions,
    pub sched: SchedKind,
}

impl Default for ServerGroupPolicy {
    fn default() -> Self {
        ServerGroupPolicy {
            max_qsize: 1000,
            max_forward_timeout: Duration::from_secs(60),
            max_forward_retries: 5,
            max_connect_retries: 10,
            retry_nonidempotent: false,
            sticky_sessions: StickySessions::Off,
            sched: SchedKind::RoundRobin,
        }
    }
}

/// Per-client Frang limiter configuration (§4.F, §6). Zero means unlimited
/// for count/length limits.
#[derive(Debug, Clone, PartialEq)]
pub struct FrangConfig {
    pub request_rate: u32,
    pub request_burst: u32,
    pub connection_rate: u32,
    pub connection_burst: u32,
    pub concurrent_connections: u32,
    pub client_header_timeout: Duration,
    pub client_body_timeout: Duration,
    pub http_uri_len: u32,
    pub http_field_len: u32,
    pub http_body_len: u64,
    pub http_header_cnt: u32,
    pub http_header_chunk_cnt: u32,
    pub http_body_chunk_cnt: u32,
    pub http_host_required: bool,
    pub http_ct_required: bool,
    pub http_methods: Vec<String>,
    pub http_ct_vals: Vec<String>,
    pub ip_block: bool,
}

impl Default for FrangConfig {
    fn default() -> Self {
        FrangConfig {
            request_rate: 0,
            request_burst: 0,
            connection_rate: 0,
            connection_burst: 0,
            concurrent_connections: 0,
            client_header_timeout: Duration::from_secs(0),
            client_body_timeout: Duration::from_secs(0),
            http_uri_len: 0,
            http_field_len: 0,
            http_body_len: 0,
            http_header_cnt: 0,
            http_header_chunk_cnt: 0,
            http_body_chunk_cnt: 0,
            http_host_required: false,
            http_ct_required: false,
            http_methods: Vec::new(),
            http_ct_vals: Vec::new(),
            ip_block: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerGroupConfig {
    pub name: String,
    pub servers: Vec<String>,
    pub policy: ServerGroupPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminConfig {
    pub bind: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            bind: "0.0.0.0:8080".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub server_groups: Vec<ServerGroupConfig>,
    pub frang: FrangConfig,
    pub admin: AdminConfig,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    server_group: Option<Vec<RawServerGroup>>,
    frang: Option<RawFrang>,
    admin: Option<RawAdmin>,
}

#[derive(Debug, Deserialize)]
struct RawServerGroup {
    name: Option<String>,
    servers: Option<Vec<String>>,
    max_qsize: Option<usize>,
    server_forward_timeout: Option<u64>,
    server_forward_retries: Option<u32>,
    server_connect_retries: Option<u32>,
    server_retry_nonidempotent: Option<bool>,
    sticky_sessions: Option<String>,
    sched: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFrang {
    request_rate: Option<u32>,
    request_burst: Option<u32>,
    connection_rate: Option<u32>,
    connection_burst: Option<u32>,
    concurrent_connections: Option<u32>,
    client_header_timeout: Option<u64>,
    client_body_timeout: Option<u64>,
    http_uri_len: Option<u32>,
    http_field_len: Option<u32>,
    http_body_len: Option<u64>,
    http_header_cnt: Option<u32>,
    http_header_chunk_cnt: Option<u32>,
    http_body_chunk_cnt: Option<u32>,
    http_host_required: Option<bool>,
    http_ct_required: Option<bool>,
    http_methods: Option<Vec<String>>,
    http_ct_vals: Option<Vec<String>>,
    ip_block: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAdmin {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<EngineConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let mut server_groups = Vec::new();
    for (i, g) in raw.server_group.unwrap_or_default().into_iter().enumerate() {
        let name = g
            .name
            .ok_or_else(|| ConfigError::MissingField(format!("server_group[{i}].name")))?;
        let servers = g
            .servers
            .ok_or_else(|| ConfigError::MissingField(format!("server_group[{i}].servers")))?;
        if servers.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("server_group[{i}].servers"),
                reason: "at least one server address is required".to_owned(),
            });
        }

        let sticky_sessions = match g.sticky_sessions.as_deref() {
            None | Some("off") => StickySessions::Off,
            Some("on") => StickySessions::On,
            Some("on-with-failover") => StickySessions::OnWithFailover,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("server_group[{i}].sticky_sessions"),
                    reason: format!("unknown value '{other}'"),
                })
            }
        };
        let sched = match g.sched.as_deref() {
            None | Some("round-robin") => SchedKind::RoundRobin,
            Some("hash") => SchedKind::Hash,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("server_group[{i}].sched"),
                    reason: format!("unknown value '{other}'"),
                })
            }
        };

        server_groups.push(ServerGroupConfig {
            name,
            servers,
            policy: ServerGroupPolicy {
                max_qsize: g.max_qsize.unwrap_or(1000),
                max_forward_timeout: Duration::from_secs(g.server_forward_timeout.unwrap_or(60)),
                max_forward_retries: g.server_forward_retries.unwrap_or(5),
                max_connect_retries: g.server_connect_retries.unwrap_or(10),
                retry_nonidempotent: g.server_retry_nonidempotent.unwrap_or(false),
                sticky_sessions,
                sched,
            },
        });
    }

    let raw_frang = raw.frang.unwrap_or_default();
    let frang = FrangConfig {
        request_rate: raw_frang.request_rate.unwrap_or(0),
        request_burst: raw_frang.request_burst.unwrap_or(0),
        connection_rate: raw_frang.connection_rate.unwrap_or(0),
        connection_burst: raw_frang.connection_burst.unwrap_or(0),
        concurrent_connections: raw_frang.concurrent_connections.unwrap_or(0),
        client_header_timeout: Duration::from_secs(raw_frang.client_header_timeout.unwrap_or(0)),
        client_body_timeout: Duration::from_secs(raw_frang.client_body_timeout.unwrap_or(0)),
        http_uri_len: raw_frang.http_uri_len.unwrap_or(0),
        http_field_len: raw_frang.http_field_len.unwrap_or(0),
        http_body_len: raw_frang.http_body_len.unwrap_or(0),
        http_header_cnt: raw_frang.http_header_cnt.unwrap_or(0),
        http_header_chunk_cnt: raw_frang.http_header_chunk_cnt.unwrap_or(0),
        http_body_chunk_cnt: raw_frang.http_body_chunk_cnt.unwrap_or(0),
        http_host_required: raw_frang.http_host_required.unwrap_or(false),
        http_ct_required: raw_frang.http_ct_required.unwrap_or(false),
        http_methods: raw_frang.http_methods.unwrap_or_default(),
        http_ct_vals: raw_frang.http_ct_vals.unwrap_or_default(),
        ip_block: raw_frang.ip_block.unwrap_or(false),
    };

    let admin = AdminConfig {
        bind: raw.admin.unwrap_or_default().bind.unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
    };

    Ok(EngineConfig {
        server_groups,
        frang,
        admin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_optional_fields_absent() {
        let toml = r#"
            [[server_group]]
            name = "default"
            servers = ["10.0.0.1:8080"]
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        let g = &cfg.server_groups[0];
        assert_eq!(g.policy.max_qsize, 1000);
        assert_eq!(g.policy.max_forward_timeout, Duration::from_secs(60));
        assert_eq!(g.policy.sched, SchedKind::RoundRobin);
    }

    #[test]
    fn missing_servers_is_an_error() {
        let toml = r#"
            [[server_group]]
            name = "default"
            servers = []
        "#;
        assert!(load_config_from_str(toml).is_err());
    }

    #[test]
    fn unknown_sched_value_is_rejected() {
        let toml = r#"
            [[server_group]]
            name = "default"
            servers = ["10.0.0.1:8080"]
            sched = "magic"
        "#;
        assert!(matches!(
            load_config_from_str(toml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn frang_and_server_group_fields_round_trip() {
        let toml = r#"
            [[server_group]]
            name = "api"
            servers = ["10.0.0.1:8080", "10.0.0.2:8080"]
            server_forward_timeout = 1
            server_retry_nonidempotent = true
            sched = "hash"

            [frang]
            request_rate = 100
            request_burst = 10
            ip_block = true
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        assert_eq!(cfg.server_groups[0].servers.len(), 2);
        assert_eq!(cfg.server_groups[0].policy.max_forward_timeout, Duration::from_secs(1));
        assert!(cfg.server_groups[0].policy.retry_nonidempotent);
        assert_eq!(cfg.server_groups[0].policy.sched, SchedKind::Hash);
        assert_eq!(cfg.frang.request_rate, 100);
        assert!(cfg.frang.ip_block);
    }
}
