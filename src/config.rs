//! Configuration types for bulkzip

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// 2 GiB of uncompressed input per part
pub const DEFAULT_PART_BUDGET_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Ephemeral blob storage configuration
///
/// Finalized archive parts live in `blob_dir` until they are downloaded once
/// or until the evictor finds them older than `max_blob_age`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding finalized parts and staging files (default: "./blobs")
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// Age after which an unclaimed blob is evicted (default: 30 minutes)
    #[serde(default = "default_max_blob_age", with = "duration_serde")]
    pub max_blob_age: Duration,

    /// Interval between eviction sweeps (default: 5 minutes)
    #[serde(default = "default_eviction_interval", with = "duration_serde")]
    pub eviction_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            max_blob_age: default_max_blob_age(),
            eviction_interval: default_eviction_interval(),
        }
    }
}

/// Archive building configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Maximum uncompressed input bytes per part (default: 2 GiB)
    ///
    /// A single entry larger than the budget still gets a part of its own.
    #[serde(default = "default_part_budget")]
    pub part_budget_bytes: u64,

    /// Deflate level, 0-9 (default: 5)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Number of items fetched ahead of the archive writer (default: 1)
    ///
    /// With 1, every body streams straight into the archive. Larger values
    /// download items concurrently into spool files and append them in order.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Prefix of the single-part download filename (default: "videos")
    #[serde(default = "default_archive_name_prefix")]
    pub archive_name_prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            part_budget_bytes: default_part_budget(),
            compression_level: default_compression_level(),
            fetch_concurrency: default_fetch_concurrency(),
            archive_name_prefix: default_archive_name_prefix(),
        }
    }
}

/// Remote fetch configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// TCP/TLS connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout including the body (default: none)
    ///
    /// Large media files can take a long time; leave unset unless origins are known to be fast.
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent to origins
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Collection registry persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./bulkzip.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Age after which collections are deleted (default: 1 hour)
    #[serde(default = "default_collection_max_age", with = "duration_serde")]
    pub collection_max_age: Duration,

    /// Interval between collection cleanup runs (default: 10 minutes)
    #[serde(default = "default_collection_cleanup_interval", with = "duration_serde")]
    pub collection_cleanup_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            collection_max_age: default_collection_max_age(),
            collection_cleanup_interval: default_collection_cleanup_interval(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:3000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Maximum number of links accepted in one collection (default: 500)
    #[serde(default = "default_max_collection_items")]
    pub max_collection_items: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
            max_collection_items: default_max_collection_items(),
        }
    }
}

/// Main configuration for bulkzip
///
/// Every section has working defaults, so `Config::default()` runs a local
/// service with blobs under `./blobs` and the registry in `./bulkzip.db`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ephemeral blob storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Archive building
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Remote fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Collection registry persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if self.archive.part_budget_bytes == 0 {
            return Err(invalid(
                "part_budget_bytes",
                "part budget must be greater than zero",
            ));
        }
        if !(0..=9).contains(&self.archive.compression_level) {
            return Err(invalid(
                "compression_level",
                "compression level must be between 0 and 9",
            ));
        }
        if self.archive.fetch_concurrency == 0 {
            return Err(invalid(
                "fetch_concurrency",
                "fetch concurrency must be at least 1",
            ));
        }
        if self.storage.eviction_interval.is_zero() {
            return Err(invalid(
                "eviction_interval",
                "eviction interval must be greater than zero",
            ));
        }
        if self.storage.max_blob_age.is_zero() {
            return Err(invalid("max_blob_age", "max blob age must be greater than zero"));
        }
        if self.persistence.collection_cleanup_interval.is_zero() {
            return Err(invalid(
                "collection_cleanup_interval",
                "cleanup interval must be greater than zero",
            ));
        }
        if self.api.max_collection_items == 0 {
            return Err(invalid(
                "max_collection_items",
                "collections must accept at least one item",
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_blob_dir() -> PathBuf {
    PathBuf::from("blobs")
}

fn default_max_blob_age() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_eviction_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_part_budget() -> u64 {
    DEFAULT_PART_BUDGET_BYTES
}

fn default_compression_level() -> i32 {
    5
}

fn default_fetch_concurrency() -> usize {
    1
}

fn default_archive_name_prefix() -> String {
    "videos".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("bulkzip/{}", env!("CARGO_PKG_VERSION"))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bulkzip.db")
}

fn default_collection_max_age() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_collection_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_collection_items() -> usize {
    500
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
