use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration for the job server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Dataset ingestion configuration
    pub dataset: DatasetConfig,

    /// Worker pool configuration
    pub pool: PoolConfig,

    /// Result persistence configuration
    pub results: ResultsConfig,
}

/// Dataset ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the survey CSV file loaded at startup
    pub csv_path: String,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker tasks; 0 picks the machine's available parallelism
    pub worker_count: usize,

    /// Seconds to wait for in-flight jobs during graceful shutdown
    pub shutdown_timeout_secs: u64,
}

/// Result persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Directory receiving one JSON artifact per completed job
    pub directory: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            dataset: DatasetConfig::default(),
            pool: PoolConfig::default(),
            results: ResultsConfig::default(),
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            csv_path: "data/nutrition_activity_obesity_usa_subset.csv".to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            directory: "results".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, environment variables, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Try to load from config file first
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            config = Self::load_from_file(&config_path)?;
        } else if std::path::Path::new("config/development.yaml").exists() {
            config = Self::load_from_file("config/development.yaml")?;
        } else if std::path::Path::new("config/production.yaml").exists() {
            config = Self::load_from_file("config/production.yaml")?;
        }

        // Override with environment variables if present
        if let Ok(bind_addr) = env::var("SURVEYSTATS_BIND_ADDRESS") {
            config.bind_address = bind_addr;
        }

        if let Ok(csv_path) = env::var("SURVEYSTATS_DATASET_PATH") {
            config.dataset.csv_path = csv_path;
        }

        if let Ok(results_dir) = env::var("SURVEYSTATS_RESULTS_DIR") {
            config.results.directory = results_dir;
        }

        if let Ok(worker_count) = env::var("TP_NUM_OF_THREADS") {
            config.pool.worker_count = worker_count
                .parse()
                .context("TP_NUM_OF_THREADS must be an integer")?;
        }

        if let Ok(timeout_secs) = env::var("SURVEYSTATS_SHUTDOWN_TIMEOUT_SECS") {
            config.pool.shutdown_timeout_secs = timeout_secs
                .parse()
                .context("SURVEYSTATS_SHUTDOWN_TIMEOUT_SECS must be an integer")?;
        }

        // Validate the loaded configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Bind address cannot be empty"));
        }

        if self.dataset.csv_path.is_empty() {
            return Err(anyhow::anyhow!("Dataset CSV path cannot be empty"));
        }

        if self.results.directory.is_empty() {
            return Err(anyhow::anyhow!("Results directory cannot be empty"));
        }

        if self.pool.shutdown_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Shutdown timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Worker count with the zero value resolved to available parallelism
    pub fn resolved_worker_count(&self) -> usize {
        if self.pool.worker_count > 0 {
            return self.pool.worker_count;
        }

        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    }

    /// Get the shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.shutdown_timeout_secs)
    }
}
