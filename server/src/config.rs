use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Courier message router
///
/// Only flags that were actually given (or set through their env var) are
/// serialized, so unset flags never mask values from the TOML file.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "courier-server", version, about = "Presence-aware WebSocket message router")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "COURIER_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "COURIER_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./courier.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURIER_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for the message database [default: ./data]
    #[arg(long, env = "COURIER_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective settings after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,

    /// Per-connection delivery tuning (loaded from [delivery] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryConfig>,

    /// Rooms created at startup if missing (loaded from [[rooms]] in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<Vec<RoomSeed>>,
}

/// Outbound delivery settings for each WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Frames buffered per connection before sends to it start failing (default: 256)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum time for one frame to be written to the socket (default: 5000 ms)
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Interval between server pings (default: 30 s)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Time allowed for a pong after each ping (default: 10 s)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl DeliveryConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

/// A room to create on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            delivery: None,
            rooms: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let toml = Toml::file(&cli.config);
        Self::from_layers(toml, cli)
    }

    fn from_layers(toml: figment::providers::Data<Toml>, cli: Cli) -> Result<Self, figment::Error> {
        Self::layered(toml)
            .merge(Env::prefixed("COURIER_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Defaults with one TOML source on top.
    fn layered(toml: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
    }

    pub fn delivery(&self) -> DeliveryConfig {
        self.delivery.clone().unwrap_or_default()
    }

    pub fn rooms(&self) -> &[RoomSeed] {
        self.rooms.as_deref().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Message Router Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite message store
# data_dir = "./data"

# ---- Delivery ----
# [delivery]

# Frames buffered per connection; a peer that falls further behind is dropped
# outbound_queue_capacity = 256

# Per-frame socket write timeout in milliseconds
# send_timeout_ms = 5000

# Keepalive: ping every N seconds, close if no pong within M seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Rooms ----
# Rooms created at startup when missing. Existing rooms are left untouched.
# [[rooms]]
# id = "general"
# name = "General"
# members = ["alice", "bob"]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = Config::layered(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.delivery(), DeliveryConfig::default());
        assert!(config.rooms().is_empty());
    }

    #[test]
    fn test_toml_scalars_survive_empty_cli() {
        let cli = Cli::try_parse_from(["courier-server"]).unwrap();
        let toml = Toml::string("port = 9000\njson_logs = true\ndata_dir = \"/srv\"");
        let config = Config::from_layers(toml, cli).unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.json_logs);
        assert_eq!(config.data_dir, "/srv");
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_cli_flags_override_toml() {
        let cli = Cli::try_parse_from(["courier-server", "--port", "7000", "--data-dir", "/tmp/c"])
            .unwrap();
        let toml = Toml::string("port = 9000\ndata_dir = \"/srv\"\nbind_address = \"127.0.0.1\"");
        let config = Config::from_layers(toml, cli).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.data_dir, "/tmp/c");
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_toml_sections() {
        let toml = r#"
            port = 9000

            [delivery]
            outbound_queue_capacity = 16
            send_timeout_ms = 250

            [[rooms]]
            id = "general"
            name = "General"
            members = ["alice", "bob"]
        "#;
        let config: Config = Config::layered(Toml::string(toml)).extract().unwrap();

        assert_eq!(config.port, 9000);
        let delivery = config.delivery();
        assert_eq!(delivery.outbound_queue_capacity, 16);
        assert_eq!(delivery.send_timeout(), Duration::from_millis(250));
        // Unset keys fall back to their defaults.
        assert_eq!(delivery.ping_interval(), Duration::from_secs(30));
        assert_eq!(
            config.rooms(),
            &[RoomSeed {
                id: "general".to_string(),
                name: "General".to_string(),
                members: vec!["alice".to_string(), "bob".to_string()],
            }]
        );
    }
}
