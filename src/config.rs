use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
}

/// Blob store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Bucket,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(StorageBackend::Local),
            "bucket" => Some(StorageBackend::Bucket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> String {
    "data/filevault.db".to_string()
}

fn default_jwt_secret() -> String {
    "your-super-secret-key-change-it".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_local_path() -> String {
    "data/uploads".to_string()
}

fn default_chunk_size() -> usize {
    255 * 1024
}

fn default_max_upload() -> usize {
    100 * 1024 * 1024
}

fn default_lock_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            previous_secrets: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_path: default_local_path(),
            chunk_size: default_chunk_size(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides(|key| env::var(key).ok());
        config.ensure_directories()?;
        config.ensure_jwt_secret()?;
        tracing::info!(
            "Storage config: backend={:?}, local_path={}, max_upload_bytes={}",
            config.storage.backend,
            config.storage.local_path,
            config.storage.max_upload_bytes
        );
        Ok(config)
    }

    /// Ensure JWT secret is secure and persisted
    fn ensure_jwt_secret(&mut self) -> anyhow::Result<()> {
        if self.jwt.secret == default_jwt_secret() || self.jwt.secret.is_empty() {
            let secret_path = Path::new("data/.jwt_secret");

            if secret_path.exists() {
                let secret = fs::read_to_string(secret_path)?;
                self.jwt.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted JWT secret from data/.jwt_secret");
            } else {
                let secret = uuid::Uuid::new_v4().to_string();

                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                fs::write(secret_path, &secret)?;
                self.jwt.secret = secret;
                tracing::info!("Generated and persisted new JWT secret to data/.jwt_secret");
            }
        }
        Ok(())
    }

    /// Load configuration from config.toml or conf.ini
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "conf.ini", "data/config.toml", "data/conf.ini"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: FV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(val) = lookup("FV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("FV_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        // Database overrides
        if let Some(val) = lookup("FV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT overrides
        if let Some(val) = lookup("FV_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Some(val) = lookup("FV_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }

        // Storage overrides
        if let Some(backend) = lookup("FV_CONF_STORAGE_BACKEND").and_then(|v| StorageBackend::from_str(&v)) {
            self.storage.backend = backend;
        }
        if let Some(val) = lookup("FV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Some(size) = lookup("FV_CONF_STORAGE_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.storage.chunk_size = size;
        }
        if let Some(size) = lookup("FV_CONF_STORAGE_MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok()) {
            self.storage.max_upload_bytes = size;
        }

        // Transform overrides
        if let Some(secs) = lookup("FV_CONF_TRANSFORM_LOCK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.transform.lock_timeout_secs = secs;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}
