//! Configuration management for the Chunkvault server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Default chunk size: 20MB
pub const DEFAULT_CHUNK_SIZE: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub transfer: TransferConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Key prefix for chunk objects
    pub chunk_prefix: String,
    /// Root directory for the local provider
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Minio,
    R2,
    S3,
    B2,
    Local,
    Memory,
}

impl StorageProvider {
    /// Whether this provider talks to an S3-compatible endpoint
    pub fn is_s3_compatible(&self) -> bool {
        matches!(self, Self::Minio | Self::R2 | Self::S3 | Self::B2)
    }
}

impl FromStr for StorageProvider {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "minio" => Ok(Self::Minio),
            "r2" => Ok(Self::R2),
            "s3" => Ok(Self::S3),
            "b2" => Ok(Self::B2),
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!("unknown storage provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Chunking, retry and limit settings for the transfer engine
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// Number of chunk pushes in flight per upload
    pub parallelism: usize,
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
    /// Upper bound for a single push or pull attempt
    pub remote_timeout: Duration,
    /// Pause between consecutive chunk pushes
    pub push_interval: Duration,
    /// Largest accepted upload in bytes (0 = unlimited)
    pub max_file_size: u64,
    /// Concurrent download streams (0 = unlimited)
    pub max_concurrent_downloads: usize,
    /// Directory where request bodies are staged before chunking
    pub temp_dir: PathBuf,
}

/// Client-side status polling policy
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    pub interval: Duration,
    /// Consecutive transport failures tolerated before giving up
    pub failure_budget: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Minio,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "chunkvault".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
                chunk_prefix: "chunks".to_string(),
                local_path: PathBuf::from("./chunk_store"),
            },
            database: DatabaseConfig {
                url: "sqlite:./chunkvault.db".to_string(),
            },
            transfer: TransferConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: 1,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            remote_timeout: Duration::from_secs(120),
            push_interval: Duration::ZERO,
            max_file_size: 0,
            max_concurrent_downloads: 0,
            temp_dir: PathBuf::from("temp_uploads"),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            failure_budget: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let provider = match env::var("STORAGE_PROVIDER").or_else(|_| env::var("S3_PROVIDER")) {
            Ok(value) => value.parse()?,
            Err(_) => defaults.storage.provider,
        };

        // S3 credentials are only mandatory when an S3 endpoint is actually used
        let s3_var = |key: &str, fallback: &str| -> Result<String> {
            match env::var(key) {
                Ok(value) => Ok(value),
                Err(_) if !provider.is_s3_compatible() => Ok(fallback.to_string()),
                Err(e) => Err(AppError::Config(format!("{}: {}", key, e))),
            }
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                provider,
                endpoint: s3_var("S3_ENDPOINT", &defaults.storage.endpoint)?,
                bucket: s3_var("S3_BUCKET", &defaults.storage.bucket)?,
                access_key: s3_var("S3_ACCESS_KEY", &defaults.storage.access_key)?,
                secret_key: s3_var("S3_SECRET_KEY", &defaults.storage.secret_key)?,
                region: env::var("S3_REGION").ok().or(defaults.storage.region),
                chunk_prefix: env::var("CHUNK_PREFIX").unwrap_or(defaults.storage.chunk_prefix),
                local_path: env::var("LOCAL_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.local_path),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            transfer: TransferConfig {
                chunk_size: parse_or("CHUNK_SIZE_BYTES", defaults.transfer.chunk_size),
                parallelism: parse_or("UPLOAD_PARALLELISM", defaults.transfer.parallelism),
                retry_max_attempts: parse_or(
                    "RETRY_MAX_ATTEMPTS",
                    defaults.transfer.retry_max_attempts,
                ),
                retry_base_delay: Duration::from_millis(parse_or(
                    "RETRY_BASE_DELAY_MS",
                    defaults.transfer.retry_base_delay.as_millis() as u64,
                )),
                remote_timeout: Duration::from_secs(parse_or(
                    "REMOTE_TIMEOUT_SECS",
                    defaults.transfer.remote_timeout.as_secs(),
                )),
                push_interval: Duration::from_millis(parse_or("PUSH_INTERVAL_MS", 0)),
                max_file_size: parse_or("MAX_FILE_SIZE_BYTES", defaults.transfer.max_file_size),
                max_concurrent_downloads: parse_or(
                    "MAX_CONCURRENT_DOWNLOADS",
                    defaults.transfer.max_concurrent_downloads,
                ),
                temp_dir: env::var("UPLOAD_TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.transfer.temp_dir),
            },
            poll: PollConfig {
                interval: Duration::from_millis(parse_or(
                    "POLL_INTERVAL_MS",
                    defaults.poll.interval.as_millis() as u64,
                )),
                failure_budget: parse_or("POLL_FAILURE_BUDGET", defaults.poll.failure_budget),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transfer engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(AppError::Config("CHUNK_SIZE_BYTES must be greater than 0".to_string()));
        }
        if self.transfer.parallelism == 0 {
            return Err(AppError::Config("UPLOAD_PARALLELISM must be at least 1".to_string()));
        }
        if self.transfer.retry_max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.transfer.remote_timeout.is_zero() {
            return Err(AppError::Config("REMOTE_TIMEOUT_SECS must be greater than 0".to_string()));
        }
        if self.poll.interval.is_zero() {
            return Err(AppError::Config("POLL_INTERVAL_MS must be greater than 0".to_string()));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value {:?} for {}, using default {}", raw, key, default);
            default
        }),
        Err(_) => default,
    }
}
