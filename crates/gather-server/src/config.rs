use std::fs;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

use gather_core::GatewayConfig;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewaySection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
            jwt_expiry_seconds: default_jwt_expiry(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySection {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_max_global_connections")]
    pub max_global_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    #[serde(default = "default_max_messages_per_minute")]
    pub max_messages_per_minute: u32,
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: default_handshake_timeout(),
            ping_interval_seconds: default_ping_interval(),
            max_global_connections: default_max_global_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            max_messages_per_minute: default_max_messages_per_minute(),
            max_content_len: default_max_content_len(),
        }
    }
}

impl GatewaySection {
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_seconds),
            ping_interval: Duration::from_secs(self.ping_interval_seconds),
            max_global_connections: self.max_global_connections,
            max_connections_per_user: self.max_connections_per_user,
            max_messages_per_minute: self.max_messages_per_minute,
            max_content_len: self.max_content_len,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Generate a cryptographically random hex string of the given length.
fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 {
                b'0' + idx
            } else {
                b'a' + idx - 10
            })
        })
        .collect()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_jwt_expiry() -> u64 {
    900
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_ping_interval() -> u64 {
    20
}
fn default_max_global_connections() -> usize {
    2_000
}
fn default_max_connections_per_user() -> usize {
    5
}
fn default_max_messages_per_minute() -> u32 {
    240
}
fn default_max_content_len() -> usize {
    4_000
}

fn looks_like_placeholder_secret(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return true;
    }
    normalized.contains("change_me")
        || normalized.contains("replace_me")
        || normalized.starts_with("example")
        || normalized == "secret"
}

fn validate_secret_configuration(config: &Config) -> Result<()> {
    let jwt_secret = config.auth.jwt_secret.trim();
    if jwt_secret.len() < 32 || looks_like_placeholder_secret(jwt_secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a strong random secret (at least 32 characters) and never leave placeholder values"
        );
    }
    Ok(())
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Gather Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[auth]
jwt_secret = "{jwt_secret}"
jwt_expiry_seconds = {jwt_expiry}

[gateway]
# Unauthenticated connections are closed after this many seconds.
handshake_timeout_seconds = {handshake_timeout}
ping_interval_seconds = {ping_interval}
max_global_connections = {max_global}
max_connections_per_user = {max_per_user}
# Per-user message budget shared across all of a user's connections.
max_messages_per_minute = {max_per_minute}
max_content_len = {max_content_len}
"#,
        bind_address = config.server.bind_address,
        jwt_secret = config.auth.jwt_secret,
        jwt_expiry = config.auth.jwt_expiry_seconds,
        handshake_timeout = config.gateway.handshake_timeout_seconds,
        ping_interval = config.gateway.ping_interval_seconds,
        max_global = config.gateway.max_global_connections,
        max_per_user = config.gateway.max_connections_per_user,
        max_per_minute = config.gateway.max_messages_per_minute,
        max_content_len = config.gateway.max_content_len,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("GATHER_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("GATHER_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("GATHER_JWT_EXPIRY_SECONDS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.auth.jwt_expiry_seconds = parsed;
            }
        }
        if let Ok(value) = std::env::var("GATHER_MAX_GLOBAL_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.gateway.max_global_connections = parsed;
            }
        }
        if let Ok(value) = std::env::var("GATHER_MAX_CONNECTIONS_PER_USER") {
            if let Ok(parsed) = value.parse::<usize>() {
                config.gateway.max_connections_per_user = parsed;
            }
        }
        if let Ok(value) = std::env::var("GATHER_MAX_MESSAGES_PER_MINUTE") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.gateway.max_messages_per_minute = parsed;
            }
        }

        validate_secret_configuration(&config)?;
        Ok(config)
    }
}
