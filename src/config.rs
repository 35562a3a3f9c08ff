use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Which metadata strategy this deployment uses. Exactly one backend is
/// instantiated at startup; they are not mixed.
#[derive(Debug, Clone)]
pub enum MetadataStore {
    /// Embedded redb store with a dedicated expiry index.
    Redb,
    /// Sharded-filesystem JSON store with per-upload locking.
    Fs,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Root directory for upload/file descriptors.
    pub data_dir: String,
    /// Root directory for file bytes.
    pub files_dir: String,
    pub metadata_store: MetadataStore,

    /// TTL applied when a client requests `ttl = 0`, in seconds.
    pub default_ttl: i64,
    /// Upper bound on requested TTLs, in seconds. Negative means no bound,
    /// and also allows clients to request never-expiring uploads.
    pub max_ttl: i64,

    /// Whether stream (rendezvous) uploads are accepted.
    pub enable_streaming: bool,
    /// Attach + per-chunk deadline for the stream backend, in seconds.
    pub stream_timeout: u64,

    /// Whether the background cleaning routine runs.
    pub auto_clean: bool,
    /// Sleep bounds between cleaning passes, in seconds. The actual sleep
    /// is drawn uniformly from this range so that multiple instances
    /// sharing a backend do not all sweep at the same time.
    pub clean_min_interval: u64,
    pub clean_max_interval: u64,

    /// Maximum upload size in bytes.
    pub max_upload_size: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let files_dir = std::env::var("FILES_DIR").unwrap_or_else(|_| "./files".to_string());

        let metadata_store = match std::env::var("METADATA_BACKEND")
            .unwrap_or_else(|_| "redb".to_string())
            .to_lowercase()
            .as_str()
        {
            "fs" | "file" => MetadataStore::Fs,
            _ => MetadataStore::Redb,
        };

        let default_ttl = std::env::var("DEFAULT_TTL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30 * 24 * 3600); // 30 days

        let max_ttl = std::env::var("MAX_TTL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30 * 24 * 3600);

        let enable_streaming = std::env::var("ENABLE_STREAMING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let stream_timeout = std::env::var("STREAM_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let auto_clean = std::env::var("AUTO_CLEAN")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let clean_min_interval = std::env::var("CLEAN_MIN_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2 * 3600);

        let clean_max_interval = std::env::var("CLEAN_MAX_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3 * 3600);

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1024 * 1024 * 1024); // 1GB

        let config = Config {
            bind_address,
            data_dir,
            files_dir,
            metadata_store,
            default_ttl,
            max_ttl,
            enable_streaming,
            stream_timeout,
            auto_clean,
            clean_min_interval,
            clean_max_interval,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl <= 0 {
            return Err(ConfigError::ValidationError(
                "DEFAULT_TTL must be positive".to_string(),
            ));
        }

        if self.max_ttl >= 0 && self.default_ttl > self.max_ttl {
            return Err(ConfigError::ValidationError(format!(
                "DEFAULT_TTL ({}) exceeds MAX_TTL ({})",
                self.default_ttl, self.max_ttl
            )));
        }

        if self.clean_min_interval >= self.clean_max_interval {
            return Err(ConfigError::ValidationError(
                "CLEAN_MIN_INTERVAL must be below CLEAN_MAX_INTERVAL".to_string(),
            ));
        }

        if self.stream_timeout == 0 {
            return Err(ConfigError::ValidationError(
                "STREAM_TIMEOUT must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
