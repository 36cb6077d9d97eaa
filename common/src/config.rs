use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    /// Any ffmpeg-readable input (URL, file). Overrides `device_index`.
    pub input: Option<String>,
    /// Replay still images from this directory instead of opening a camera.
    pub replay_dir: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub model_path: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_selection")]
    pub selection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default = "default_notify_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_storage_prefix")]
    pub prefix: String,
    /// S3-compatible endpoint; AWS is used when unset.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_base_url: Option<String>,
    /// Keep a local copy of every uploaded image under this directory.
    pub archive_dir: Option<String>,
    #[serde(default)]
    pub verify_on_startup: bool,
    #[serde(default = "default_true")]
    pub require_credentials: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            input: None,
            replay_dir: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: default_cooldown_secs(),
            endpoint: default_notify_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "detector.confidence_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if !self.notify.cooldown_secs.is_finite() || self.notify.cooldown_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "notify.cooldown_secs must be a non-negative number, got {}",
                self.notify.cooldown_secs
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid("camera width and height must be non-zero".into()));
        }
        if self.detector.input_size == 0 {
            return Err(ConfigError::Invalid("detector.input_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> f64 {
    15.0
}
fn default_input_size() -> u32 {
    640
}
fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_iou_threshold() -> f32 {
    0.45
}
fn default_max_detections() -> usize {
    100
}
fn default_labels() -> Vec<String> {
    vec!["fire".into(), "smoke".into()]
}
fn default_selection() -> String {
    "first".into()
}
fn default_cooldown_secs() -> f64 {
    30.0
}
fn default_notify_endpoint() -> String {
    "http://localhost:30000/mintcollectionnft".into()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_storage_prefix() -> String {
    "images/".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5001
}
fn default_quality() -> u8 {
    80
}
fn default_log_level() -> String {
    "info".into()
}
