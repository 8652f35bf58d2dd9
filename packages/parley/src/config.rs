use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use parley_core::DEFAULT_SELF_LABEL;
use parley_core::esm::GatewayOptions;
use parley_core::pcs::StoreOptions;

use crate::gateway::GatewayConfig;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [gateway]
//                    endpoint = "ws://chat.example.com"
//
//   env var:         PARLEY_GATEWAY__ENDPOINT=ws://chat.example.com
//
//   (single underscore stays within field names: PARLEY_STORE__POLL_INTERVAL_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub gateway: GatewayFileConfig,
    #[serde(default)]
    pub identity: IdentityFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Where the ESM client connects (lives under `[gateway]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect: default_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
        }
    }
}

/// Who we are (lives under `[identity]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityFileConfig {
    /// Label written into `from` of locally sent ESM entries.
    #[serde(default = "default_self_label")]
    pub self_label: String,
    /// Account used for PCS conversations when `--as` is not given.
    #[serde(default)]
    pub account: Option<String>,
}

impl Default for IdentityFileConfig {
    fn default() -> Self {
        Self {
            self_label: default_self_label(),
            account: None,
        }
    }
}

/// Conversation store tunables (lives under `[store]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreFileConfig {
    /// 0 disables polling; only writes from this process are then seen live.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Development gateway knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_time_interval_ms")]
    pub time_interval_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            time_interval_ms: default_time_interval_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:3000".to_string()
}
fn default_reconnect() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_max_reconnect_delay_ms() -> u64 {
    5000
}
fn default_self_label() -> String {
    DEFAULT_SELF_LABEL.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_time_interval_ms() -> u64 {
    1000
}
fn default_ping_interval_ms() -> u64 {
    25000
}
fn default_ping_timeout_ms() -> u64 {
    20000
}

/// Build a figment that layers: defaults → config.toml → PARLEY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PARLEY_GATEWAY__ENDPOINT=ws://host`  →  `gateway.endpoint = "ws://host"`
///   `PARLEY_SERVER__PORT=4000`  →  `server.port = 4000`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PARLEY_").split("__"))
}

impl GatewayFileConfig {
    pub fn to_options(&self) -> GatewayOptions {
        GatewayOptions {
            reconnect: self.reconnect,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            ..GatewayOptions::new(self.endpoint.clone())
        }
    }
}

impl StoreFileConfig {
    pub fn to_options(&self) -> StoreOptions {
        StoreOptions {
            poll_interval: (self.poll_interval_ms > 0)
                .then(|| Duration::from_millis(self.poll_interval_ms)),
            ..Default::default()
        }
    }
}

impl ServerFileConfig {
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            time_interval: Duration::from_millis(self.time_interval_ms.max(1)),
            ping_interval: Duration::from_millis(self.ping_interval_ms.max(1)),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
        }
    }
}

/// Resolved data directory layout plus the loaded file config.
#[derive(Clone, Debug)]
pub struct ParleyConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub file: FileConfig,
}

impl ParleyConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".parley"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let file: FileConfig = load_config(&data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", data_dir))?;

        let db_path = data_dir.join("parley.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            db_path,
            file,
        })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_gateway_file_config_defaults() {
        let d = GatewayFileConfig::default();
        assert_eq!(d.endpoint, "ws://127.0.0.1:3000");
        assert!(d.reconnect);
        assert_eq!(d.reconnect_delay_ms, 1000);
        assert_eq!(d.max_reconnect_delay_ms, 5000);
    }

    #[test]
    fn test_identity_file_config_defaults() {
        let d = IdentityFileConfig::default();
        assert_eq!(d.self_label, "Você");
        assert!(d.account.is_none());
    }

    #[test]
    fn test_server_file_config_defaults() {
        let d = ServerFileConfig::default();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 3000);
        assert_eq!(d.time_interval_ms, 1000);
        assert_eq!(d.ping_interval_ms, 25000);
        assert_eq!(d.ping_timeout_ms, 20000);
    }

    // ── conversions ─────────────────────────────────────────────────────

    #[test]
    fn test_gateway_options_from_file() {
        let fc = GatewayFileConfig {
            endpoint: "http://chat.example.com".to_string(),
            reconnect: false,
            reconnect_delay_ms: 250,
            max_reconnect_delay_ms: 2000,
        };
        let opts = fc.to_options();
        assert_eq!(opts.endpoint, "http://chat.example.com");
        assert!(!opts.reconnect);
        assert_eq!(opts.reconnect_delay, Duration::from_millis(250));
        assert_eq!(opts.max_reconnect_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_store_poll_interval_zero_disables() {
        let fc = StoreFileConfig {
            poll_interval_ms: 0,
        };
        assert!(fc.to_options().poll_interval.is_none());
        let fc = StoreFileConfig {
            poll_interval_ms: 500,
        };
        assert_eq!(
            fc.to_options().poll_interval,
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_gateway_config_from_server_section() {
        let gc = ServerFileConfig::default().to_gateway_config();
        assert_eq!(gc.time_interval, Duration::from_secs(1));
        assert_eq!(gc.ping_interval, Duration::from_secs(25));
        assert_eq!(gc.ping_timeout, Duration::from_secs(20));
    }

    // ── ParleyConfig ────────────────────────────────────────────────────

    #[test]
    fn test_parley_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ParleyConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.db_path, tmp.path().join("parley.db"));
        assert_eq!(config.config_toml_path(), tmp.path().join("config.toml"));
        assert_eq!(config.file.server.port, 3000);
    }

    #[test]
    fn test_db_url() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ParleyConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        let url = config.db_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("parley.db"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_config_toml_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fc = FileConfig::default();
        fc.identity.account = Some("alice@example.com".to_string());
        fc.server.port = 4100;
        std::fs::write(
            tmp.path().join("config.toml"),
            toml::to_string(&fc).unwrap(),
        )
        .unwrap();

        let loaded: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(loaded.identity.account.as_deref(), Some("alice@example.com"));
        assert_eq!(loaded.server.port, 4100);
        assert_eq!(loaded.gateway.endpoint, "ws://127.0.0.1:3000");
    }

    #[test]
    fn test_partial_config_toml_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[store]\npoll_interval_ms = 0\n",
        )
        .unwrap();

        let loaded: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(loaded.store.poll_interval_ms, 0);
        assert_eq!(loaded.identity.self_label, "Você");
    }
}
