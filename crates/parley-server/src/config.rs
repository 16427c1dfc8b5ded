use anyhow::Result;
use parley_core::AppConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
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
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
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
pub struct GatewayConfig {
    /// Upper bound on each store call made while relaying a message.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Inbound events allowed per user per minute (0 = unlimited).
    #[serde(default = "default_max_events_per_minute")]
    pub max_events_per_minute: u32,
    /// Close a user's older socket when the same user connects again.
    #[serde(default)]
    pub evict_superseded_sessions: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            max_events_per_minute: default_max_events_per_minute(),
            evict_superseded_sessions: false,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
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
fn default_database_url() -> String {
    "sqlite://./data/parley.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    20
}
fn default_jwt_expiry() -> u64 {
    7 * 24 * 60 * 60
}
fn default_store_timeout_ms() -> u64 {
    5000
}
fn default_max_events_per_minute() -> u32 {
    240
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}

/// Idle sessions are closed after three intervals, so this caps that at 3 hours.
const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 3600;

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

fn validate(config: &Config) -> Result<()> {
    let jwt_secret = config.auth.jwt_secret.trim();
    if jwt_secret.len() < 32 || looks_like_placeholder_secret(jwt_secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a strong random secret (at least 32 characters)"
        );
    }
    let heartbeat = config.gateway.heartbeat_interval_secs;
    if !(1..=MAX_HEARTBEAT_INTERVAL_SECS).contains(&heartbeat) {
        anyhow::bail!(
            "gateway.heartbeat_interval_secs must be between 1 and {MAX_HEARTBEAT_INTERVAL_SECS}"
        );
    }
    if config.gateway.store_timeout_ms == 0 {
        anyhow::bail!("gateway.store_timeout_ms must be at least 1");
    }
    Ok(())
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Parley Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[database]
# sqlite://... or postgres://...
url = "{db_url}"
max_connections = {max_connections}

[auth]
jwt_secret = "{jwt_secret}"
jwt_expiry_seconds = {jwt_expiry}

[gateway]
store_timeout_ms = {store_timeout_ms}
# Per-user inbound event budget; 0 disables the limit.
max_events_per_minute = {max_events}
# Close the older socket when a user connects again.
evict_superseded_sessions = {evict}
heartbeat_interval_secs = {heartbeat}

[logging]
json = {json}
"#,
        bind_address = config.server.bind_address,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        jwt_expiry = config.auth.jwt_expiry_seconds,
        store_timeout_ms = config.gateway.store_timeout_ms,
        max_events = config.gateway.max_events_per_minute,
        evict = config.gateway.evict_superseded_sessions,
        heartbeat = config.gateway.heartbeat_interval_secs,
        json = config.logging.json,
    )
}

/// Something that happened while loading the config. Loading runs before
/// the tracing subscriber exists, so these are logged by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadNotice {
    Generated { path: String },
    IgnoredOverride { name: &'static str, value: String },
}

impl LoadNotice {
    pub fn log(&self) {
        match self {
            LoadNotice::Generated { path } => {
                tracing::info!("Config file not found, generated defaults at '{}'", path)
            }
            LoadNotice::IgnoredOverride { name, value } => {
                tracing::warn!("Ignoring invalid {name} value '{value}'")
            }
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    name: &'static str,
    raw: &str,
    target: &mut T,
    notices: &mut Vec<LoadNotice>,
) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => notices.push(LoadNotice::IgnoredOverride {
            name,
            value: raw.to_string(),
        }),
    }
}

impl Config {
    pub fn load(path: &str) -> Result<(Self, Vec<LoadNotice>)> {
        let mut notices = Vec::new();
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, generate_config_template(&config))?;
            notices.push(LoadNotice::Generated {
                path: path.to_string(),
            });
            config
        };
        let _ = harden_secret_file_permissions(path);

        notices.extend(config.apply_env_overrides(|name| std::env::var(name).ok()));
        validate(&config)?;
        Ok((config, notices))
    }

    /// Apply `PARLEY_*` overrides. Unparseable values leave the field as it
    /// was and are reported back.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<LoadNotice> {
        let mut notices = Vec::new();
        if let Some(value) = lookup("PARLEY_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = lookup("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = lookup("PARLEY_DATABASE_MAX_CONNECTIONS") {
            parse_into(
                "PARLEY_DATABASE_MAX_CONNECTIONS",
                &value,
                &mut self.database.max_connections,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_JWT_SECRET") {
            self.auth.jwt_secret = value;
        }
        if let Some(value) = lookup("PARLEY_JWT_EXPIRY_SECONDS") {
            parse_into(
                "PARLEY_JWT_EXPIRY_SECONDS",
                &value,
                &mut self.auth.jwt_expiry_seconds,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_STORE_TIMEOUT_MS") {
            parse_into(
                "PARLEY_STORE_TIMEOUT_MS",
                &value,
                &mut self.gateway.store_timeout_ms,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_MAX_EVENTS_PER_MINUTE") {
            parse_into(
                "PARLEY_MAX_EVENTS_PER_MINUTE",
                &value,
                &mut self.gateway.max_events_per_minute,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_EVICT_SUPERSEDED_SESSIONS") {
            parse_into(
                "PARLEY_EVICT_SUPERSEDED_SESSIONS",
                &value,
                &mut self.gateway.evict_superseded_sessions,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_HEARTBEAT_INTERVAL_SECS") {
            parse_into(
                "PARLEY_HEARTBEAT_INTERVAL_SECS",
                &value,
                &mut self.gateway.heartbeat_interval_secs,
                &mut notices,
            );
        }
        if let Some(value) = lookup("PARLEY_LOG_JSON") {
            parse_into(
                "PARLEY_LOG_JSON",
                &value,
                &mut self.logging.json,
                &mut notices,
            );
        }
        notices
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            jwt_expiry_seconds: self.auth.jwt_expiry_seconds,
            store_timeout: Duration::from_millis(self.gateway.store_timeout_ms),
            max_events_per_minute: self.gateway.max_events_per_minute,
            evict_superseded_sessions: self.gateway.evict_superseded_sessions,
            heartbeat_interval: Duration::from_secs(self.gateway.heartbeat_interval_secs),
        }
    }
}
