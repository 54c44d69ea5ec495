//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the client works out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::nickname::generate_nickname;
use crate::client::{ClientOptions, Profile};
use crate::wire::DEFAULT_MAX_FRAME;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            behavior: BehaviorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn server_mut(&mut self, name: &str) -> Option<&mut ServerConfig> {
        self.servers
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

fn default_servers() -> Vec<ServerConfig> {
    vec![ServerConfig {
        name: "tynet".into(),
        host: "chat.tymoon.eu".into(),
        port: default_port(),
        tls: false,
        username: generate_nickname(),
        password: None,
        channels: vec!["lichatters".into()],
        auto_connect: false,
        accept_invalid_certs: false,
    }]
}

/// Configuration for a single Lichat server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// User-facing label (e.g. `"tynet"`).
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_username")]
    pub username: String,
    /// Set after a successful `/register`.
    #[serde(default)]
    pub password: Option<String>,
    /// Joined automatically once connected.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl ServerConfig {
    pub fn profile(&self) -> Profile {
        let profile = Profile::new(self.username.clone());
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => profile.with_password(password),
            None => profile,
        }
    }
}

/// Client behavior settings: timeouts, reconnects and caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Disconnect if nothing arrives for this long. `0` disables the watchdog.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_origin_memo")]
    pub origin_memo_capacity: usize,
    #[serde(default = "default_max_frame")]
    pub max_frame_size: usize,
    #[serde(default = "default_emote_dir")]
    pub emote_dir: Option<PathBuf>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            origin_memo_capacity: default_origin_memo(),
            max_frame_size: default_max_frame(),
            emote_dir: default_emote_dir(),
        }
    }
}

impl BehaviorConfig {
    pub fn client_options(&self, server: &ServerConfig) -> ClientOptions {
        ClientOptions {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            origin_memo_capacity: self.origin_memo_capacity,
            max_frame_size: self.max_frame_size,
            accept_invalid_certs: server.accept_invalid_certs,
            emote_dir: self.emote_dir.clone(),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Diagnostics and chat transcript settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Diagnostics go to stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub transcripts: bool,
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            transcripts: false,
            transcript_dir: default_transcript_dir(),
        }
    }
}

fn default_username() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    1111
}
fn default_handshake_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    120
}
fn default_reconnect_delay() -> u64 {
    10
}
fn default_origin_memo() -> usize {
    128
}
fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}
fn default_emote_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("lichat").join("emotes"))
}
fn default_level() -> String {
    "warn".to_string()
}
fn default_transcript_dir() -> String {
    "~/.local/share/lichat/logs".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_tynet() {
        let config = AppConfig::default();
        let server = config.server("TYNET").unwrap();
        assert_eq!(server.host, "chat.tymoon.eu");
        assert_eq!(server.port, 1111);
        assert_eq!(server.channels, vec!["lichatters"]);
        assert!(!server.username.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [[servers]]
            name = "local"
            host = "localhost"
            username = "alice"
            password = ""

            [behavior]
            idle_timeout_secs = 0
            "#,
        )
        .unwrap();
        let server = config.server("local").unwrap();
        assert_eq!(server.port, 1111);
        assert!(!server.tls);
        assert_eq!(server.profile().password, None);
        assert_eq!(config.behavior.idle_timeout(), None);
        assert_eq!(config.behavior.handshake_timeout_secs, 10);
        assert_eq!(config.logging.level, "warn");

        let options = config.behavior.client_options(server);
        assert_eq!(options.handshake_timeout, Duration::from_secs(10));
        assert_eq!(options.origin_memo_capacity, 128);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.server_mut("tynet").unwrap().password = Some("hunter2".into());
        let text = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(
            back.server("tynet").unwrap().profile().password.as_deref(),
            Some("hunter2")
        );
    }
}
