//! Inventory Console
//!
//! Live list views for the product inventory admin API:
//! - REST client for products, organizations, persons and bulk imports
//! - Change bus with optional cross-instance mirroring over NATS
//! - STOMP-over-WebSocket push channel with automatic reconnection
//! - Reload coordination: coalescing, last-issued-wins and page clamping

pub mod api;
pub mod events;
pub mod view;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use events::{ChangeBus, EntityKind, NatsBroadcast, PushClient, StompTransport};
use view::{LiveView, PageQuery, ViewObserver};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: ApiYamlConfig,
    pub push: PushYamlConfig,
    pub broadcast: BroadcastYamlConfig,
    pub views: ViewsYamlConfig,
}

/// REST backend section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiYamlConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for ApiYamlConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/api".into(),
            timeout_secs: 30,
        }
    }
}

/// Server push section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushYamlConfig {
    /// Raw WebSocket endpoint of the server's STOMP mapping
    pub url: String,
    pub topic: String,
    pub reconnect_delay_ms: u64,
}

impl Default for PushYamlConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/api/ws/websocket".into(),
            topic: "/topic/changes".into(),
            reconnect_delay_ms: 1500,
        }
    }
}

/// Cross-instance change bus section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastYamlConfig {
    /// No NATS URL means the bus stays process-local
    pub nats_url: Option<String>,
    pub channel: String,
    pub subject_prefix: String,
}

impl Default for BroadcastYamlConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            channel: "inventory-console".into(),
            subject_prefix: "inventory".into(),
        }
    }
}

/// List view section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ViewsYamlConfig {
    /// Overrides the record views' default page size
    pub page_size: Option<u32>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_timeout_secs: u64,
    pub push_url: String,
    pub push_topic: String,
    pub reconnect_delay_ms: u64,
    pub nats_url: Option<String>,
    pub channel: String,
    pub subject_prefix: String,
    pub page_size: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let page_size = env_parse::<u32>("INVENTORY_PAGE_SIZE")
            .or(yaml.views.page_size)
            .filter(|size| *size > 0);

        Ok(Self {
            api_url: std::env::var("INVENTORY_API_URL").unwrap_or(yaml.api.url),
            api_timeout_secs: env_parse("INVENTORY_API_TIMEOUT_SECS")
                .unwrap_or(yaml.api.timeout_secs),
            push_url: std::env::var("INVENTORY_PUSH_URL").unwrap_or(yaml.push.url),
            push_topic: std::env::var("INVENTORY_PUSH_TOPIC").unwrap_or(yaml.push.topic),
            reconnect_delay_ms: env_parse("INVENTORY_RECONNECT_DELAY_MS")
                .unwrap_or(yaml.push.reconnect_delay_ms),
            nats_url: std::env::var("NATS_URL")
                .ok()
                .or(yaml.broadcast.nats_url)
                .filter(|url| !url.trim().is_empty()),
            channel: std::env::var("INVENTORY_CHANNEL").unwrap_or(yaml.broadcast.channel),
            subject_prefix: yaml.broadcast.subject_prefix,
            page_size,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Initial query for a view of `entity`, honoring the configured page size.
    pub fn initial_query(&self, entity: EntityKind) -> PageQuery {
        let mut query = entity.default_query();
        match self.page_size {
            Some(size) if entity != EntityKind::Import => query.size = size,
            _ => {}
        }
        query
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.trim().parse().ok())
}

/// Shared console state: one API client, one bus and one push connection
/// for every view in the process.
#[derive(Clone)]
pub struct ConsoleState {
    pub api: Arc<dyn api::RecordApi>,
    pub bus: ChangeBus,
    pub push: PushClient,
    pub config: Arc<Config>,
}

impl ConsoleState {
    /// Create state with all collaborators initialized.
    ///
    /// An unreachable NATS server only disables cross-instance mirroring.
    pub async fn new(config: Config) -> Result<Self> {
        let api = Arc::new(api::ApiClient::new(
            &config.api_url,
            Duration::from_secs(config.api_timeout_secs),
        )?);

        let bus = match &config.nats_url {
            Some(url) => match events::connect_nats(url).await {
                Ok(client) => {
                    let transport =
                        NatsBroadcast::new(client, &config.subject_prefix, &config.channel);
                    let bus = ChangeBus::with_transport(Arc::new(transport));
                    bus.start_bridge();
                    bus
                }
                Err(e) => {
                    tracing::warn!("{}. Change bus stays local to this process.", e);
                    ChangeBus::new()
                }
            },
            None => ChangeBus::new(),
        };

        let transport = StompTransport::new(&config.push_url, &config.push_topic)?;
        let push = PushClient::with_reconnect_delay(Arc::new(transport), config.reconnect_delay());

        Ok(Self {
            api,
            bus,
            push,
            config: Arc::new(config),
        })
    }

    /// Mount a live view of `entity` on the shared collaborators.
    pub fn mount(&self, entity: EntityKind, observer: Arc<dyn ViewObserver>) -> LiveView {
        LiveView::mount(
            entity,
            self.config.initial_query(entity),
            self.api.clone(),
            &self.bus,
            &self.push,
            observer,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
api:
  url: http://inventory:8080/api
  timeout_secs: 5

push:
  url: wss://inventory/api/ws/websocket
  reconnect_delay_ms: 250

broadcast:
  nats_url: nats://bus:4222
  channel: IS-lab1

views:
  page_size: 10
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.url, "http://inventory:8080/api");
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(config.push.reconnect_delay_ms, 250);
        assert_eq!(config.push.topic, "/topic/changes");
        assert_eq!(config.broadcast.nats_url.as_deref(), Some("nats://bus:4222"));
        assert_eq!(config.broadcast.subject_prefix, "inventory");
        assert_eq!(config.views.page_size, Some(10));
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.api.url, "http://localhost:8080/api");
        assert_eq!(config.push.url, "ws://localhost:8080/api/ws/websocket");
        assert_eq!(config.push.reconnect_delay_ms, 1500);
        assert_eq!(config.broadcast.channel, "inventory-console");
        assert!(config.broadcast.nats_url.is_none());
        assert!(config.views.page_size.is_none());
    }

    #[test]
    fn test_initial_query_page_size_override() {
        let yaml: YamlConfig = serde_yaml::from_str("views:\n  page_size: 25\n").unwrap();
        let config = Config {
            api_url: yaml.api.url,
            api_timeout_secs: yaml.api.timeout_secs,
            push_url: yaml.push.url,
            push_topic: yaml.push.topic,
            reconnect_delay_ms: yaml.push.reconnect_delay_ms,
            nats_url: None,
            channel: yaml.broadcast.channel,
            subject_prefix: yaml.broadcast.subject_prefix,
            page_size: yaml.views.page_size,
        };
        assert_eq!(config.initial_query(EntityKind::Person).size, 25);
        // Import history keeps its own page size.
        assert_eq!(config.initial_query(EntityKind::Import).size, 20);
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "INVENTORY_API_URL",
                "INVENTORY_API_TIMEOUT_SECS",
                "INVENTORY_PUSH_URL",
                "INVENTORY_PUSH_TOPIC",
                "INVENTORY_RECONNECT_DELAY_MS",
                "NATS_URL",
                "INVENTORY_CHANNEL",
                "INVENTORY_PAGE_SIZE",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
api:
  url: http://yaml-host/api
push:
  reconnect_delay_ms: 900
broadcast:
  channel: yaml-channel
views:
  page_size: 7
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_url, "http://yaml-host/api");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(900));
        assert_eq!(config.channel, "yaml-channel");
        assert_eq!(config.page_size, Some(7));
        assert!(config.nats_url.is_none());

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("INVENTORY_API_URL", "http://env-host/api");
        std::env::set_var("INVENTORY_PAGE_SIZE", "12");
        std::env::set_var("NATS_URL", "nats://env-bus:4222");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_url, "http://env-host/api");
        assert_eq!(config.page_size, Some(12));
        assert_eq!(config.nats_url.as_deref(), Some("nats://env-bus:4222"));
        // YAML value still used where no env override
        assert_eq!(config.channel, "yaml-channel");

        // --- Phase 3: Unparsable numbers fall back to YAML ---
        std::env::set_var("INVENTORY_RECONNECT_DELAY_MS", "soon");
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.reconnect_delay_ms, 900);

        clear_env();

        // --- Phase 4: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-inventory-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.api_url, "http://localhost:8080/api");
        assert_eq!(config.push_topic, "/topic/changes");
        assert_eq!(config.reconnect_delay_ms, 1500);
        assert!(config.page_size.is_none());
    }
}
