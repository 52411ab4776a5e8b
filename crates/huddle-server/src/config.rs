use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use huddle_core::AppConfig;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
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
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Browser origin allowed to call the API with credentials.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            cors_origin: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/huddle.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub refresh_secret: String,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_seconds: u64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
            refresh_secret: generate_random_hex(64),
            access_token_ttl_seconds: default_access_token_ttl(),
            refresh_token_ttl_seconds: default_refresh_token_ttl(),
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    #[serde(default = "default_direct_thread_ttl")]
    pub direct_thread_ttl_seconds: u64,
    #[serde(default = "default_group_thread_ttl")]
    pub group_thread_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: None,
            max_capacity: default_cache_capacity(),
            direct_thread_ttl_seconds: default_direct_thread_ttl(),
            group_thread_ttl_seconds: default_group_thread_ttl(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Random lowercase hex string of the given length.
fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 { b'0' + idx } else { b'a' + idx - 10 })
        })
        .collect()
}

fn default_max_connections() -> u32 {
    10
}

fn default_access_token_ttl() -> u64 {
    24 * 60 * 60
}

fn default_refresh_token_ttl() -> u64 {
    10 * 24 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_direct_thread_ttl() -> u64 {
    3600
}

fn default_group_thread_ttl() -> u64 {
    60
}

fn validate_secrets(config: &Config) -> Result<()> {
    for (name, secret) in [
        ("auth.jwt_secret", &config.auth.jwt_secret),
        ("auth.refresh_secret", &config.auth.refresh_secret),
    ] {
        if secret.trim().len() < 32 {
            anyhow::bail!("Invalid {name}: use a random secret of at least 32 characters");
        }
    }
    if config.auth.jwt_secret == config.auth.refresh_secret {
        anyhow::bail!("auth.jwt_secret and auth.refresh_secret must differ");
    }
    Ok(())
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Huddle Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"
# Origin of the web client, required for browser access from another origin:
# cors_origin = "http://localhost:5173"

[database]
url = "{db_url}"
max_connections = {max_connections}

[auth]
jwt_secret = "{jwt_secret}"
refresh_secret = "{refresh_secret}"
access_token_ttl_seconds = {access_ttl}
refresh_token_ttl_seconds = {refresh_ttl}
# Disable only when serving over plain HTTP during development.
secure_cookies = {secure_cookies}

[cache]
# "memory" or "redis"
backend = "memory"
# redis_url = "redis://127.0.0.1:6379"
max_capacity = {max_capacity}
direct_thread_ttl_seconds = {direct_ttl}
group_thread_ttl_seconds = {group_ttl}
"#,
        bind_address = config.server.bind_address,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        refresh_secret = config.auth.refresh_secret,
        access_ttl = config.auth.access_token_ttl_seconds,
        refresh_ttl = config.auth.refresh_token_ttl_seconds,
        secure_cookies = config.auth.secure_cookies,
        max_capacity = config.cache.max_capacity,
        direct_ttl = config.cache.direct_thread_ttl_seconds,
        group_ttl = config.cache.group_thread_ttl_seconds,
    )
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        let _ = harden_secret_file_permissions(path);

        config.apply_env_overrides(|name| std::env::var(name).ok());
        validate_secrets(&config)?;
        Ok(config)
    }

    /// Apply `HUDDLE_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(name: &str, value: String) -> Option<T> {
            let parsed = value.trim().parse::<T>().ok();
            if parsed.is_none() {
                tracing::warn!("Ignoring invalid {} value '{}'", name, value);
            }
            parsed
        }

        if let Some(value) = lookup("HUDDLE_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = lookup("HUDDLE_CORS_ORIGIN") {
            self.server.cors_origin = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = lookup("HUDDLE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = lookup("HUDDLE_DATABASE_MAX_CONNECTIONS") {
            if let Some(parsed) = parsed("HUDDLE_DATABASE_MAX_CONNECTIONS", value) {
                self.database.max_connections = parsed;
            }
        }
        if let Some(value) = lookup("HUDDLE_JWT_SECRET") {
            self.auth.jwt_secret = value;
        }
        if let Some(value) = lookup("HUDDLE_REFRESH_SECRET") {
            self.auth.refresh_secret = value;
        }
        if let Some(value) = lookup("HUDDLE_ACCESS_TOKEN_TTL_SECONDS") {
            if let Some(parsed) = parsed("HUDDLE_ACCESS_TOKEN_TTL_SECONDS", value) {
                self.auth.access_token_ttl_seconds = parsed;
            }
        }
        if let Some(value) = lookup("HUDDLE_REFRESH_TOKEN_TTL_SECONDS") {
            if let Some(parsed) = parsed("HUDDLE_REFRESH_TOKEN_TTL_SECONDS", value) {
                self.auth.refresh_token_ttl_seconds = parsed;
            }
        }
        if let Some(value) = lookup("HUDDLE_SECURE_COOKIES") {
            match parse_bool(&value) {
                Some(flag) => self.auth.secure_cookies = flag,
                None => tracing::warn!("Ignoring invalid HUDDLE_SECURE_COOKIES value '{}'", value),
            }
        }
        if let Some(value) = lookup("HUDDLE_CACHE_BACKEND") {
            match value.trim().to_ascii_lowercase().as_str() {
                "memory" => self.cache.backend = CacheBackendKind::Memory,
                "redis" => self.cache.backend = CacheBackendKind::Redis,
                _ => tracing::warn!(
                    "Ignoring invalid HUDDLE_CACHE_BACKEND value '{}'; expected memory or redis",
                    value
                ),
            }
        }
        if let Some(value) = lookup("HUDDLE_REDIS_URL") {
            self.cache.redis_url = Some(value);
        }
    }

    pub fn app_config(&self) -> AppConfig {
        let mut app = AppConfig::new(&self.auth.jwt_secret, &self.auth.refresh_secret);
        app.access_token_ttl_seconds = self.auth.access_token_ttl_seconds;
        app.refresh_token_ttl_seconds = self.auth.refresh_token_ttl_seconds;
        app.secure_cookies = self.auth.secure_cookies;
        app.direct_thread_ttl = Duration::from_secs(self.cache.direct_thread_ttl_seconds);
        app.group_thread_ttl = Duration::from_secs(self.cache.group_thread_ttl_seconds);
        app
    }
}
