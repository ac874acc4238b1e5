// ABOUTME: Client configuration - compiled-in defaults, a fluent builder, then STOMP_-prefixed env overrides
// ABOUTME: Mirrors the layering this crate's other services use: defaults < builder < environment, applied in that order

use crate::transport::{ServerAddr, SslMode};
use std::time::Duration;

/// Resolved configuration for a [`super::facade::Client`]. Build one with
/// [`ClientConfigBuilder`] rather than constructing this directly.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub servers: Vec<ServerAddr>,
    pub login: String,
    pub passcode: String,
    pub virtual_host: String,
    pub heartbeat: (u64, u64),
    pub connect_retry_attempts: usize,
    pub connect_retry_interval: Duration,
    pub connect_timeout: Duration,
    pub disconnect_confirmation_timeout: Duration,
    pub read_max_chunk_size: usize,
    pub strict_unknown_commands: bool,
    pub ssl: SslMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            login: String::new(),
            passcode: String::new(),
            virtual_host: "/".to_string(),
            heartbeat: (1000, 1000),
            connect_retry_attempts: 3,
            connect_retry_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            disconnect_confirmation_timeout: Duration::from_secs(5),
            read_max_chunk_size: 8192,
            strict_unknown_commands: false,
            ssl: SslMode::Disabled,
        }
    }
}

/// Fluent builder for [`ClientConfig`], in the same style as this crate's
/// `client::builder::ClientOptions`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, addr: ServerAddr) -> Self {
        self.config.servers.push(addr);
        self
    }

    pub fn servers(mut self, addrs: impl IntoIterator<Item = ServerAddr>) -> Self {
        self.config.servers.extend(addrs);
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.config.login = login.into();
        self.config.passcode = passcode.into();
        self
    }

    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.config.virtual_host = virtual_host.into();
        self
    }

    pub fn heartbeat(mut self, send_ms: u64, receive_ms: u64) -> Self {
        self.config.heartbeat = (send_ms, receive_ms);
        self
    }

    pub fn connect_retry_attempts(mut self, attempts: usize) -> Self {
        self.config.connect_retry_attempts = attempts;
        self
    }

    pub fn connect_retry_interval(mut self, interval: Duration) -> Self {
        self.config.connect_retry_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn disconnect_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_confirmation_timeout = timeout;
        self
    }

    pub fn read_max_chunk_size(mut self, bytes: usize) -> Self {
        self.config.read_max_chunk_size = bytes;
        self
    }

    pub fn strict_unknown_commands(mut self, strict: bool) -> Self {
        self.config.strict_unknown_commands = strict;
        self
    }

    /// Sets how the TCP transport secures its connection. `SslMode::Disabled`
    /// (the default) speaks plaintext; `SslMode::Default` negotiates TLS
    /// against the platform's native root store (requires the `tls`
    /// feature); `SslMode::Custom` hands it a pre-built `rustls` config.
    pub fn ssl(mut self, ssl: SslMode) -> Self {
        self.config.ssl = ssl;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Applies `STOMP_*` environment variable overrides on top of whatever
    /// has been configured so far. Malformed values are logged and left
    /// at their prior setting rather than panicking - a typo in a
    /// container's env shouldn't take the process down before it can log
    /// anything useful.
    pub fn from_env(mut self) -> Self {
        if let Some(value) = env_u64("STOMP_CONNECT_RETRY_ATTEMPTS") {
            self.config.connect_retry_attempts = value as usize;
        }
        if let Some(value) = env_u64("STOMP_CONNECT_RETRY_INTERVAL_SECS") {
            self.config.connect_retry_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("STOMP_CONNECT_TIMEOUT_SECS") {
            self.config.connect_timeout = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("STOMP_DISCONNECT_CONFIRMATION_TIMEOUT_SECS") {
            self.config.disconnect_confirmation_timeout = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("STOMP_READ_MAX_CHUNK_SIZE") {
            self.config.read_max_chunk_size = value as usize;
        }
        if let Some(value) = env_u64("STOMP_HEARTBEAT_SEND_MS") {
            self.config.heartbeat.0 = value;
        }
        if let Some(value) = env_u64("STOMP_HEARTBEAT_RECEIVE_MS") {
            self.config.heartbeat.1 = value;
        }
        if let Ok(value) = std::env::var("STOMP_STRICT_UNKNOWN_COMMANDS") {
            self.config.strict_unknown_commands = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Ok(value) = std::env::var("STOMP_SSL") {
            // Env overrides can only pick the platform-default TLS config,
            // not a custom `rustls::ClientConfig` - that has to come
            // through `ClientConfigBuilder::ssl` in code.
            if value == "1" || value.eq_ignore_ascii_case("true") {
                self.config.ssl = SslMode::Default;
            } else if value == "0" || value.eq_ignore_ascii_case("false") {
                self.config.ssl = SslMode::Disabled;
            }
        }
        if let Ok(login) = std::env::var("STOMP_LOGIN") {
            self.config.login = login;
        }
        if let Ok(passcode) = std::env::var("STOMP_PASSCODE") {
            self.config.passcode = passcode;
        }
        if let Ok(virtual_host) = std::env::var("STOMP_VIRTUAL_HOST") {
            self.config.virtual_host = virtual_host;
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(value) => match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(name, value, error = %err, "ignoring malformed environment override");
                None
            }
        },
        Err(_) => None,
    }
}
