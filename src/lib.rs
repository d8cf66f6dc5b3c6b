//! Chat Coordinator
//!
//! A session-synchronized streaming chat coordinator:
//! - Session identity management with at-most-one concurrent creation
//! - Chat proxy relaying the backend's event stream with emoji sanitizing
//! - Transcript reconciliation (ordering, dedupe, legacy pairing)
//! - UI-side chat client mirroring session ids into URL state

pub mod api;
pub mod backend;
pub mod client;
pub mod proxy;
pub mod session;
pub mod stream;
pub mod transcript;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use stream::SanitizerKind;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub backend: BackendYamlConfig,
    pub chat: ChatYamlConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
    /// Externally visible base URL, logged at startup
    pub public_url: Option<String>,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            public_url: None,
        }
    }
}

/// Backend chat/session service section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendYamlConfig {
    pub url: String,
    pub api_prefix: String,
    pub passthrough_prefix: String,
    /// Bounds connection setup only; streamed replies have no overall timeout
    pub connect_timeout_secs: Option<u64>,
}

impl Default for BackendYamlConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
            api_prefix: "/api/v1/thesys".into(),
            passthrough_prefix: "/api/v1".into(),
            connect_timeout_secs: None,
        }
    }
}

/// Chat relay section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatYamlConfig {
    pub sanitizer: SanitizerKind,
    pub require_broker_id: bool,
}

impl Default for ChatYamlConfig {
    fn default() -> Self {
        Self {
            sanitizer: SanitizerKind::Emoji,
            require_broker_id: true,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub public_url: Option<String>,
    pub backend_url: String,
    pub backend_api_prefix: String,
    pub backend_passthrough_prefix: String,
    pub backend_connect_timeout: Option<Duration>,
    pub sanitizer: SanitizerKind,
    pub require_broker_id: bool,
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
    /// If `yaml_path` is None, tries "config.yaml" in CWD. Unparseable env
    /// values are ignored with a warning.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let connect_timeout_secs =
            env_parsed::<u64>("BACKEND_CONNECT_TIMEOUT_SECS").or(yaml.backend.connect_timeout_secs);

        Ok(Self {
            server_port: env_parsed("SERVER_PORT").unwrap_or(yaml.server.port),
            public_url: std::env::var("PUBLIC_URL").ok().or(yaml.server.public_url),
            backend_url: std::env::var("BACKEND_URL").unwrap_or(yaml.backend.url),
            backend_api_prefix: std::env::var("BACKEND_API_PREFIX")
                .unwrap_or(yaml.backend.api_prefix),
            backend_passthrough_prefix: std::env::var("BACKEND_PASSTHROUGH_PREFIX")
                .unwrap_or(yaml.backend.passthrough_prefix),
            backend_connect_timeout: connect_timeout_secs.map(Duration::from_secs),
            sanitizer: env_parsed("CHAT_SANITIZER").unwrap_or(yaml.chat.sanitizer),
            require_broker_id: env_parsed("CHAT_REQUIRE_BROKER_ID")
                .unwrap_or(yaml.chat.require_broker_id),
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
}

/// Read and parse an env var; a present but invalid value is logged and ignored.
fn env_parsed<T>(var: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}={:?}: {}", var, raw, e);
            None
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Build the shared handler state (HTTP backend client plus sanitizer)
pub fn build_state(config: &Config) -> Result<api::CoordinatorState> {
    let backend = backend::HttpBackend::new(
        &config.backend_url,
        &config.backend_api_prefix,
        &config.backend_passthrough_prefix,
        config.backend_connect_timeout,
    )?;

    Ok(Arc::new(
        api::ServerState::new(Arc::new(backend), config.sanitizer.build())
            .with_require_broker_id(config.require_broker_id),
    ))
}

/// Serve the coordinator on an already-bound listener until ctrl-c
pub async fn serve(listener: tokio::net::TcpListener, state: api::CoordinatorState) -> Result<()> {
    let router = api::create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")
}

/// Start the HTTP surface on `config.server_port`
pub async fn start_server(config: Config) -> Result<()> {
    let state = build_state(&config)?;

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        backend = %config.backend_url,
        sanitizer = ?config.sanitizer,
        "Chat coordinator listening on {}",
        addr
    );
    if let Some(public_url) = &config.public_url {
        tracing::info!("Public URL: {}", public_url);
    }

    serve(listener, state).await
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
server:
  port: 9090
  public_url: https://chat.example.com

backend:
  url: http://backend:9000
  api_prefix: /api/v2/chat
  connect_timeout_secs: 5

chat:
  sanitizer: none
  require_broker_id: false
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.server.public_url,
            Some("https://chat.example.com".into())
        );
        assert_eq!(config.backend.url, "http://backend:9000");
        assert_eq!(config.backend.api_prefix, "/api/v2/chat");
        // Unset keys within a section keep their defaults
        assert_eq!(config.backend.passthrough_prefix, "/api/v1");
        assert_eq!(config.backend.connect_timeout_secs, Some(5));
        assert_eq!(config.chat.sanitizer, SanitizerKind::None);
        assert!(!config.chat.require_broker_id);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.public_url.is_none());
        assert_eq!(config.backend.url, "http://localhost:8000");
        assert_eq!(config.backend.api_prefix, "/api/v1/thesys");
        assert_eq!(config.backend.passthrough_prefix, "/api/v1");
        assert!(config.backend.connect_timeout_secs.is_none());
        assert_eq!(config.chat.sanitizer, SanitizerKind::Emoji);
        assert!(config.chat.require_broker_id);
    }

    #[test]
    fn test_unknown_sanitizer_in_yaml_is_a_parse_error() {
        let yaml = "chat:\n  sanitizer: rot13\n";
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_build_state_from_defaults() {
        let config = Config {
            server_port: 0,
            public_url: None,
            backend_url: "http://localhost:8000".into(),
            backend_api_prefix: "/api/v1/thesys".into(),
            backend_passthrough_prefix: "/api/v1".into(),
            backend_connect_timeout: Some(Duration::from_secs(3)),
            sanitizer: SanitizerKind::Emoji,
            require_broker_id: false,
        };
        let state = build_state(&config).unwrap();
        assert!(!state.require_broker_id);
        assert_eq!(state.sanitizer.sanitize("hi 👋"), "hi ");
        assert_eq!(
            state.backend.passthrough_target("sessions/1", Some("x=1")),
            "http://localhost:8000/api/v1/sessions/1?x=1"
        );
    }

    /// Combined test for YAML file loading, env var overrides and invalid values.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "SERVER_PORT",
                "PUBLIC_URL",
                "BACKEND_URL",
                "BACKEND_API_PREFIX",
                "BACKEND_PASSTHROUGH_PREFIX",
                "BACKEND_CONNECT_TIMEOUT_SECS",
                "CHAT_SANITIZER",
                "CHAT_REQUIRE_BROKER_ID",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
server:
  port: 9999
backend:
  url: http://yaml-backend:8000
  connect_timeout_secs: 2
chat:
  sanitizer: none
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.server_port, 9999);
        assert_eq!(config.backend_url, "http://yaml-backend:8000");
        assert_eq!(config.backend_api_prefix, "/api/v1/thesys");
        assert_eq!(config.backend_connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.sanitizer, SanitizerKind::None);
        assert!(config.require_broker_id);

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("BACKEND_URL", "http://env-backend:8000");
        std::env::set_var("SERVER_PORT", "7777");
        std::env::set_var("CHAT_SANITIZER", "emoji");
        std::env::set_var("CHAT_REQUIRE_BROKER_ID", "false");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.backend_url, "http://env-backend:8000");
        assert_eq!(config.server_port, 7777);
        assert_eq!(config.sanitizer, SanitizerKind::Emoji);
        assert!(!config.require_broker_id);
        // YAML value still used where no env override
        assert_eq!(config.backend_connect_timeout, Some(Duration::from_secs(2)));

        // --- Phase 3: Invalid env values fall back to YAML ---
        std::env::set_var("SERVER_PORT", "not-a-port");
        std::env::set_var("CHAT_SANITIZER", "rot13");
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.server_port, 9999);
        assert_eq!(config.sanitizer, SanitizerKind::None);

        clear_env();

        // --- Phase 4: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-coordinator-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert!(config.backend_connect_timeout.is_none());
        assert!(config.public_url.is_none());
    }
}
