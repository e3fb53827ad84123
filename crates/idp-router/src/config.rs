//! Configuration for the document routing pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming the TOML configuration file
pub const CONFIG_PATH_ENV: &str = "IDP_ROUTER_CONFIG";

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    /// Backend provider (memory, local or gcp)
    #[serde(default)]
    pub backend: BackendProvider,
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Queue names and receive settings
    #[serde(default)]
    pub queues: QueueConfig,
    /// Bucket layout
    #[serde(default)]
    pub buckets: BucketConfig,
    /// Classification engine configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Batch dispatcher configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Job status tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Move coordinator configuration
    #[serde(default)]
    pub mover: MoverConfig,
    /// Stage worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Local storage configuration (SQLite + filesystem)
    #[serde(default)]
    pub storage: StorageConfig,
    /// GCP configuration (required when backend = gcp)
    #[serde(default)]
    pub gcp: Option<GcpConfig>,
}

impl RouterConfig {
    /// Load configuration from a TOML file, or defaults when no path is given.
    ///
    /// Environment overrides are applied after the file and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load using `IDP_ROUTER_CONFIG` when set
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Apply `IDP_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bucket) = std::env::var("IDP_SOURCE_BUCKET") {
            self.buckets.source = bucket;
        }
        if let Ok(bucket) = std::env::var("IDP_DESTINATION_BUCKET") {
            self.buckets.destination = bucket;
        }
        if let Ok(bucket) = std::env::var("IDP_OUTPUT_BUCKET") {
            self.buckets.output = bucket;
        }
        if let Ok(classifier) = std::env::var("IDP_CLASSIFIER_REF") {
            self.classifier.classifier_ref = classifier;
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let queues = [
            ("queues.ingest", &self.queues.ingest),
            ("queues.output", &self.queues.output),
            ("queues.routing", &self.queues.routing),
            ("queues.job_status", &self.queues.job_status),
        ];
        for (field, value) in queues {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", field)));
            }
        }

        let buckets = [
            ("buckets.source", &self.buckets.source),
            ("buckets.destination", &self.buckets.destination),
            ("buckets.output", &self.buckets.output),
        ];
        for (field, value) in buckets {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", field)));
            }
        }

        if !(1..=10).contains(&self.queues.max_messages) {
            return Err(Error::Config(format!(
                "queues.max_messages must be between 1 and 10 (got {})",
                self.queues.max_messages
            )));
        }

        if self.queues.heartbeat_secs >= self.queues.visibility_timeout_secs {
            return Err(Error::Config(format!(
                "queues.heartbeat_secs ({}) must be shorter than queues.visibility_timeout_secs ({})",
                self.queues.heartbeat_secs, self.queues.visibility_timeout_secs
            )));
        }

        if self.tracker.poll_interval_secs == 0 || self.tracker.max_wait_secs == 0 {
            return Err(Error::Config(
                "tracker.poll_interval_secs and tracker.max_wait_secs must be positive".to_string(),
            ));
        }

        if !self.mover.landing_prefix.ends_with('/') {
            return Err(Error::Config(format!(
                "mover.landing_prefix must end with '/' (got '{}')",
                self.mover.landing_prefix
            )));
        }

        if self.backend == BackendProvider::Gcp && self.gcp.is_none() {
            return Err(Error::Config(
                "GCP backend selected but gcp config is missing".to_string(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Lifetime of presigned upload URLs (default: 300s)
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl_secs: u64,
}

fn default_upload_url_ttl() -> u64 { 300 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            upload_url_ttl_secs: 300,
        }
    }
}

/// Queue names and delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Document notifications waiting for dispatch
    pub ingest: String,
    /// Notifications for objects written by the classification engine
    pub output: String,
    /// Routing messages waiting to be moved
    pub routing: String,
    /// Job-submitted notices (poll mode only)
    pub job_status: String,
    /// Messages per receive call (1..=10)
    pub max_messages: usize,
    /// Visibility timeout applied on receive, in seconds
    pub visibility_timeout_secs: u64,
    /// How often in-flight messages get their visibility extended
    pub heartbeat_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingest: "idp-ingest".to_string(),
            output: "idp-classification-output".to_string(),
            routing: "idp-routing".to_string(),
            job_status: "idp-job-status".to_string(),
            max_messages: 10,
            visibility_timeout_secs: 300,
            heartbeat_secs: 60,
        }
    }
}

/// Bucket layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket receiving uploads under `landing/`
    pub source: String,
    /// Bucket receiving classified documents under `classified/`
    pub destination: String,
    /// Bucket the classification engine writes its output archives to
    pub output: String,
    /// URI scheme used when handing prefixes to the classification engine
    #[serde(default = "default_uri_scheme")]
    pub uri_scheme: String,
}

fn default_uri_scheme() -> String {
    "s3".to_string()
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            source: "idp-landing".to_string(),
            destination: "idp-classified".to_string(),
            output: "idp-classifier-output".to_string(),
            uri_scheme: default_uri_scheme(),
        }
    }
}

impl BucketConfig {
    /// Build a `<scheme>://<bucket>/<path>` URI
    pub fn uri(&self, bucket: &str, path: &str) -> String {
        format!("{}://{}/{}", self.uri_scheme, bucket, path)
    }
}

/// Classification engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base URL of the classification service (HTTP engine)
    pub base_url: String,
    /// Classifier model reference handed to every job
    pub classifier_ref: String,
    /// Prefix inside the output bucket where job results land
    pub output_prefix: String,
    /// Role or service identity the engine uses to read inputs (optional)
    #[serde(default)]
    pub data_access_role: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            classifier_ref: "document-classifier".to_string(),
            output_prefix: "comprehend/doc-class-output/".to_string(),
            data_access_role: None,
            timeout_secs: 30,
        }
    }
}

/// Batch dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Prefix for generated job names
    pub job_name_prefix: String,
    /// Upper bound on receive calls sharing one dispatch cycle
    pub max_batches_per_cycle: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            job_name_prefix: "document-classification".to_string(),
            max_batches_per_cycle: 50,
        }
    }
}

/// How the tracker learns that a job finished
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackerMode {
    /// React to the engine writing its output archive
    #[default]
    ArchiveNotification,
    /// Poll job status from job-submitted notices
    Poll,
}

/// Job status tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Completion trigger
    #[serde(default)]
    pub mode: TrackerMode,
    /// Interval between status checks (default: 10s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Hard ceiling on waiting for one job (default: 3h)
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    /// Object key suffix identifying an output archive
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
    /// Archive member suffix identifying a per-document result
    #[serde(default = "default_result_suffix")]
    pub result_suffix: String,
}

fn default_poll_interval() -> u64 { 10 }
fn default_max_wait() -> u64 { 3 * 60 * 60 }
fn default_archive_suffix() -> String { "output.tar.gz".to_string() }
fn default_result_suffix() -> String { ".out".to_string() }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mode: TrackerMode::default(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            archive_suffix: default_archive_suffix(),
            result_suffix: default_result_suffix(),
        }
    }
}

/// Move coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoverConfig {
    /// Required leading component of every source prefix
    pub landing_prefix: String,
    /// Leading component of every destination key
    pub classified_prefix: String,
    /// Number of file names moved concurrently within one batch
    pub parallel_keys: Option<usize>,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            landing_prefix: "landing/".to_string(),
            classified_prefix: "classified".to_string(),
            parallel_keys: None, // Auto-detect from CPU count
        }
    }
}

/// Stage worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between cycles when a queue is empty
    pub idle_backoff_secs: u64,
    /// Run the dispatch stage
    pub dispatch: bool,
    /// Run the tracker stage
    pub track: bool,
    /// Run the move stage
    #[serde(rename = "move")]
    pub move_stage: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_secs: 5,
            dispatch: true,
            track: true,
            move_stage: true,
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the local backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("idp-router");
        Self { data_dir }
    }
}

impl StorageConfig {
    /// SQLite database holding job records and queues
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("idp-router.db")
    }

    /// Root directory of the filesystem object store
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }
}

/// Backend provider selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    /// Everything in process memory (lost on restart)
    Memory,
    /// SQLite queues and job store, filesystem objects, HTTP classifier
    #[default]
    Local,
    /// Google Cloud Storage objects with local queues and job store
    Gcp,
}

/// Google Cloud Platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    /// GCP project ID
    pub project_id: String,
    /// Path to service account JSON key file (falls back to ambient credentials)
    #[serde(default)]
    pub service_account_key_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RouterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queues.max_messages, 10);
        assert_eq!(config.tracker.poll_interval_secs, 10);
        assert_eq!(config.tracker.max_wait_secs, 10_800);
        assert_eq!(config.mover.landing_prefix, "landing/");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RouterConfig::from_toml(
            r#"
            backend = "memory"

            [buckets]
            source = "in"
            destination = "out"
            output = "results"

            [tracker]
            mode = "poll"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendProvider::Memory);
        assert_eq!(config.buckets.source, "in");
        assert_eq!(config.buckets.uri_scheme, "s3");
        assert_eq!(config.tracker.mode, TrackerMode::Poll);
        assert_eq!(config.tracker.archive_suffix, "output.tar.gz");
        assert_eq!(config.queues.ingest, "idp-ingest");
    }

    #[test]
    fn test_validate_rejects_receive_limit() {
        let mut config = RouterConfig::default();
        config.queues.max_messages = 11;
        assert!(config.validate().is_err());

        config.queues.max_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_gcp_section() {
        let config = RouterConfig {
            backend: BackendProvider::Gcp,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bucket_uri() {
        let buckets = BucketConfig::default();
        assert_eq!(
            buckets.uri("in", "landing/acme/"),
            "s3://in/landing/acme/"
        );
    }
}
