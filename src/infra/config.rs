//! Configuration loading from TOML files
//!
//! The binaries select the file with `--config <path>`, falling back to the
//! CONFIG_FILE environment variable and then `config/dev.toml`.
//!
//! Every section and field is optional; missing values take the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Environment variable that overrides `sms.api_key`
pub const SMS_API_KEY_ENV: &str = "SMS_API_KEY";

/// Upper bound for dwell and cooldown windows (one week)
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Unique site identifier, used as the metrics label
    pub id: String,
    /// Human-readable site name used in notification text
    pub name: String,
    /// Gate name recorded on every access log entry
    pub gate: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: "gate".to_string(),
            name: "premises".to_string(),
            gate: "Main Gate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Directory of still images replayed as the camera feed
    pub frames_dir: String,
    pub fps: u32,
    /// Restart from the first image after the last one
    pub loop_playback: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { frames_dir: "frames".to_string(), fps: 30, loop_playback: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Run detector and text reader on every Nth frame
    pub interval_frames: u64,
    pub object_confidence: f32,
    pub text_confidence: f32,
    pub group_vertical_tolerance_px: f32,
    pub group_horizontal_gap_px: f32,
    /// Minimum letters + digits for a grouped text to be treated as a plate
    pub min_plate_chars: usize,
    /// Per-character OCR corrections, e.g. { V = "Y" }
    pub substitutions: HashMap<String, String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_frames: 30,
            object_confidence: 0.4,
            text_confidence: 0.3,
            group_vertical_tolerance_px: 50.0,
            group_horizontal_gap_px: 200.0,
            min_plate_chars: 5,
            substitutions: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Object detector endpoint (empty disables the detector)
    pub detector_url: String,
    /// Text reader endpoint (empty disables the reader)
    pub reader_url: String,
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            detector_url: "http://127.0.0.1:9000/detect".to_string(),
            reader_url: "http://127.0.0.1:9000/read".to_string(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Minimum time after an Entry before the same vehicle can Exit
    pub dwell_secs: u64,
    /// Minimum time between two logs of the same plate token
    pub cooldown_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self { dwell_secs: 30, cooldown_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON array of vehicle records
    pub registry_file: String,
    /// Access log (JSONL format)
    pub access_log_file: String,
    /// In-app notifications (JSONL format)
    pub notifications_file: String,
    /// Directory for captured plate images (empty disables captures)
    pub captures_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            registry_file: "data/vehicles.json".to_string(),
            access_log_file: "data/access_logs.jsonl".to_string(),
            notifications_file: "data/notifications.jsonl".to_string(),
            captures_dir: "captures".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    /// Prefix applied to local-format numbers
    pub country_code: String,
    /// Sender name leading every message
    pub brand: String,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://sms.example.invalid/api/v1/send".to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
            country_code: "+63".to_string(),
            brand: "GateAccess".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Maximum concurrent deliveries
    pub workers: usize,
    /// Pending notifications before new ones are dropped
    pub queue_size: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { workers: 4, queue_size: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub site: SiteConfig,
    pub http: HttpConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub inference: InferenceConfig,
    pub access: AccessConfig,
    pub store: StoreConfig,
    pub sms: SmsConfig,
    pub notify: NotifyConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    site_name: String,
    gate_name: String,
    http_bind_address: String,
    http_port: u16,
    frames_dir: String,
    camera_fps: u32,
    camera_loop: bool,
    detection_interval_frames: u64,
    object_confidence: f32,
    text_confidence: f32,
    group_vertical_tolerance_px: f32,
    group_horizontal_gap_px: f32,
    min_plate_chars: usize,
    substitutions: HashMap<char, char>,
    detector_url: String,
    reader_url: String,
    inference_timeout_ms: u64,
    dwell_secs: u64,
    cooldown_secs: u64,
    registry_file: String,
    access_log_file: String,
    notifications_file: String,
    captures_dir: String,
    sms_enabled: bool,
    sms_api_url: String,
    sms_api_key: String,
    sms_timeout_ms: u64,
    sms_country_code: String,
    sms_brand: String,
    notify_workers: usize,
    notify_queue_size: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { site, http, camera, detection, inference, access, store, sms, notify, metrics } =
            toml_config;

        Self {
            site_id: site.id,
            site_name: site.name,
            gate_name: site.gate,
            http_bind_address: http.bind_address,
            http_port: http.port,
            frames_dir: camera.frames_dir,
            camera_fps: camera.fps.max(1),
            camera_loop: camera.loop_playback,
            detection_interval_frames: detection.interval_frames.max(1),
            object_confidence: detection.object_confidence,
            text_confidence: detection.text_confidence,
            group_vertical_tolerance_px: detection.group_vertical_tolerance_px,
            group_horizontal_gap_px: detection.group_horizontal_gap_px,
            min_plate_chars: detection.min_plate_chars,
            substitutions: Self::parse_substitutions(&detection.substitutions),
            detector_url: inference.detector_url,
            reader_url: inference.reader_url,
            inference_timeout_ms: inference.timeout_ms,
            dwell_secs: Self::clamp_window("dwell_secs", access.dwell_secs),
            cooldown_secs: Self::clamp_window("cooldown_secs", access.cooldown_secs),
            registry_file: store.registry_file,
            access_log_file: store.access_log_file,
            notifications_file: store.notifications_file,
            captures_dir: store.captures_dir,
            sms_enabled: sms.enabled,
            sms_api_url: sms.api_url,
            sms_api_key: sms.api_key,
            sms_timeout_ms: sms.timeout_ms,
            sms_country_code: sms.country_code,
            sms_brand: sms.brand,
            notify_workers: notify.workers.max(1),
            notify_queue_size: notify.queue_size.max(1),
            metrics_interval_secs: metrics.interval_secs.max(1),
            config_file,
        }
    }

    fn clamp_window(field: &str, secs: u64) -> u64 {
        if secs > MAX_WINDOW_SECS {
            warn!(field = %field, configured = %secs, max = %MAX_WINDOW_SECS, "access_window_clamped");
            return MAX_WINDOW_SECS;
        }
        secs
    }

    /// Keep only single-character mappings, uppercased
    fn parse_substitutions(raw: &HashMap<String, String>) -> HashMap<char, char> {
        let mut table = HashMap::new();
        for (from, to) in raw {
            let mut from_chars = from.chars();
            let mut to_chars = to.chars();
            match (from_chars.next(), from_chars.next(), to_chars.next(), to_chars.next()) {
                (Some(f), None, Some(t), None) => {
                    table.insert(f.to_ascii_uppercase(), t.to_ascii_uppercase());
                }
                _ => warn!(from = %from, to = %to, "substitution_ignored"),
            }
        }
        table
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", source))?;
        Ok(Self::from_toml(toml_config, source.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from the given path, falling back to defaults.
    /// Applies environment overrides in both cases.
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = env::var(SMS_API_KEY_ENV) {
            if !key.is_empty() {
                self.sms_api_key = key;
            }
        }
        self
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn gate_name(&self) -> &str {
        &self.gate_name
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn frames_dir(&self) -> &str {
        &self.frames_dir
    }

    pub fn camera_fps(&self) -> u32 {
        self.camera_fps
    }

    pub fn camera_loop(&self) -> bool {
        self.camera_loop
    }

    pub fn detection_interval_frames(&self) -> u64 {
        self.detection_interval_frames
    }

    pub fn object_confidence(&self) -> f32 {
        self.object_confidence
    }

    pub fn text_confidence(&self) -> f32 {
        self.text_confidence
    }

    pub fn group_vertical_tolerance_px(&self) -> f32 {
        self.group_vertical_tolerance_px
    }

    pub fn group_horizontal_gap_px(&self) -> f32 {
        self.group_horizontal_gap_px
    }

    pub fn min_plate_chars(&self) -> usize {
        self.min_plate_chars
    }

    pub fn substitutions(&self) -> &HashMap<char, char> {
        &self.substitutions
    }

    pub fn detector_url(&self) -> &str {
        &self.detector_url
    }

    pub fn reader_url(&self) -> &str {
        &self.reader_url
    }

    pub fn inference_timeout_ms(&self) -> u64 {
        self.inference_timeout_ms
    }

    pub fn dwell_secs(&self) -> u64 {
        self.dwell_secs
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    pub fn registry_file(&self) -> &str {
        &self.registry_file
    }

    pub fn access_log_file(&self) -> &str {
        &self.access_log_file
    }

    pub fn notifications_file(&self) -> &str {
        &self.notifications_file
    }

    /// Capture directory, or None when captures are disabled
    pub fn captures_dir(&self) -> Option<&str> {
        if self.captures_dir.is_empty() {
            None
        } else {
            Some(&self.captures_dir)
        }
    }

    pub fn sms_enabled(&self) -> bool {
        self.sms_enabled
    }

    pub fn sms_api_url(&self) -> &str {
        &self.sms_api_url
    }

    pub fn sms_api_key(&self) -> &str {
        &self.sms_api_key
    }

    pub fn sms_timeout_ms(&self) -> u64 {
        self.sms_timeout_ms
    }

    pub fn sms_country_code(&self) -> &str {
        &self.sms_country_code
    }

    pub fn sms_brand(&self) -> &str {
        &self.sms_brand
    }

    pub fn notify_workers(&self) -> usize {
        self.notify_workers
    }

    pub fn notify_queue_size(&self) -> usize {
        self.notify_queue_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_port(), 8000);
        assert_eq!(config.detection_interval_frames(), 30);
        assert_eq!(config.object_confidence(), 0.4);
        assert_eq!(config.text_confidence(), 0.3);
        assert_eq!(config.dwell_secs(), 30);
        assert_eq!(config.cooldown_secs(), 30);
        assert_eq!(config.min_plate_chars(), 5);
        assert_eq!(config.sms_country_code(), "+63");
        assert_eq!(config.sms_timeout_ms(), 10_000);
        assert!(!config.sms_enabled());
        assert!(config.substitutions().is_empty());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [site]
            name = "Northgate Residences"

            [access]
            dwell_secs = 60
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.site_name(), "Northgate Residences");
        assert_eq!(config.gate_name(), "Main Gate");
        assert_eq!(config.dwell_secs(), 60);
        assert_eq!(config.cooldown_secs(), 30);
        assert_eq!(config.config_file(), "inline");
    }

    #[test]
    fn test_substitutions_parsed() {
        let config = Config::from_toml_str(
            r#"
            [detection]
            substitutions = { v = "y", "0" = "O", bad = "X" }
            "#,
            "inline",
        )
        .unwrap();
        let subs = config.substitutions();
        assert_eq!(subs.get(&'V'), Some(&'Y'));
        assert_eq!(subs.get(&'0'), Some(&'O'));
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_zero_values_clamped() {
        let config = Config::from_toml_str(
            r#"
            [detection]
            interval_frames = 0
            [notify]
            workers = 0
            queue_size = 0
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.detection_interval_frames(), 1);
        assert_eq!(config.notify_workers(), 1);
        assert_eq!(config.notify_queue_size(), 1);
    }

    #[test]
    fn test_empty_captures_dir_disables() {
        let config = Config::from_toml_str("[store]\ncaptures_dir = \"\"\n", "inline").unwrap();
        assert_eq!(config.captures_dir(), None);
        assert_eq!(Config::default().captures_dir(), Some("captures"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml_str("[access]\ndwell_secs = \"soon\"\n", "bad").is_err());
    }

    #[test]
    fn test_oversized_windows_clamped() {
        let config = Config::from_toml_str(
            "[access]\ndwell_secs = 9223372036854775807\ncooldown_secs = 604801\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.dwell_secs(), MAX_WINDOW_SECS);
        assert_eq!(config.cooldown_secs(), MAX_WINDOW_SECS);
        assert_eq!(chrono::Duration::seconds(config.dwell_secs() as i64).num_days(), 7);
    }
}
