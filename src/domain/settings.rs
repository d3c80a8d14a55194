use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Console and rolling-file logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "imu_paddle".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Peripheral acquisition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Advertised names accepted as the target peripheral (exact match)
    #[serde(default = "default_device_names")]
    pub device_names: Vec<String>,
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Total attempts before acquisition gives up
    #[serde(default = "default_max_scan_retries")]
    pub max_scan_retries: u32,
    #[serde(default = "default_packet_silence_timeout_ms")]
    pub packet_silence_timeout_ms: u64,
}

impl LinkSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn packet_silence_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_silence_timeout_ms)
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            device_names: default_device_names(),
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            scan_timeout_ms: default_scan_timeout_ms(),
            max_scan_retries: default_max_scan_retries(),
            packet_silence_timeout_ms: default_packet_silence_timeout_ms(),
        }
    }
}

fn default_device_names() -> Vec<String> {
    vec!["IMU-Paddle".to_string(), "IMU-Paddle-2".to_string()]
}
fn default_service_uuid() -> String {
    "0000ffe0-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_characteristic_uuid() -> String {
    "0000ffe1-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_max_scan_retries() -> u32 {
    3
}
fn default_packet_silence_timeout_ms() -> u64 {
    3_000
}

/// Orientation engine tuning. Times are in seconds, rates in deg/s, accel in g.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    #[serde(default = "default_dt_smoothing")]
    pub dt_smoothing: f32,
    #[serde(default = "default_min_dt")]
    pub min_dt: f32,
    #[serde(default = "default_max_dt")]
    pub max_dt: f32,
    #[serde(default = "default_nominal_dt")]
    pub nominal_dt: f32,

    // Stability detection
    #[serde(default = "default_accel_stability_threshold")]
    pub accel_stability_threshold: f32,
    #[serde(default = "default_gyro_stability_threshold")]
    pub gyro_stability_threshold: f32,
    #[serde(default = "default_bias_smoothing")]
    pub bias_smoothing: f32,

    // Auto-realignment
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f32,
    #[serde(default = "default_min_stable_secs")]
    pub min_stable_secs: f32,
    #[serde(default = "default_realign_cooldown_secs")]
    pub realign_cooldown_secs: f32,

    // Integration and blending
    #[serde(default = "default_filter_gain")]
    pub filter_gain: f32,
    /// 0 = gradient-descent filter only, 1 = pure gyro integration only
    #[serde(default = "default_gyro_blend")]
    pub gyro_blend: f32,
    #[serde(default = "default_true")]
    pub low_pass_enabled: bool,
    #[serde(default = "default_low_pass_min_cutoff_hz")]
    pub low_pass_min_cutoff_hz: f32,
    #[serde(default = "default_low_pass_beta")]
    pub low_pass_beta: f32,
    #[serde(default = "default_drift_adapt_rate")]
    pub drift_adapt_rate: f32,

    // Output
    #[serde(default = "default_output_ease_rate")]
    pub output_ease_rate: f32,
    #[serde(default = "default_calibration_secs")]
    pub calibration_secs: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            dt_smoothing: default_dt_smoothing(),
            min_dt: default_min_dt(),
            max_dt: default_max_dt(),
            nominal_dt: default_nominal_dt(),
            accel_stability_threshold: default_accel_stability_threshold(),
            gyro_stability_threshold: default_gyro_stability_threshold(),
            bias_smoothing: default_bias_smoothing(),
            warmup_secs: default_warmup_secs(),
            min_stable_secs: default_min_stable_secs(),
            realign_cooldown_secs: default_realign_cooldown_secs(),
            filter_gain: default_filter_gain(),
            gyro_blend: default_gyro_blend(),
            low_pass_enabled: default_true(),
            low_pass_min_cutoff_hz: default_low_pass_min_cutoff_hz(),
            low_pass_beta: default_low_pass_beta(),
            drift_adapt_rate: default_drift_adapt_rate(),
            output_ease_rate: default_output_ease_rate(),
            calibration_secs: default_calibration_secs(),
        }
    }
}

fn default_dt_smoothing() -> f32 {
    0.1
}
fn default_min_dt() -> f32 {
    0.001
}
fn default_max_dt() -> f32 {
    0.1
}
fn default_nominal_dt() -> f32 {
    0.02
}
fn default_accel_stability_threshold() -> f32 {
    0.05
}
fn default_gyro_stability_threshold() -> f32 {
    3.0
}
fn default_bias_smoothing() -> f32 {
    0.02
}
fn default_warmup_secs() -> f32 {
    1.0
}
fn default_min_stable_secs() -> f32 {
    1.5
}
fn default_realign_cooldown_secs() -> f32 {
    5.0
}
fn default_filter_gain() -> f32 {
    0.1
}
fn default_gyro_blend() -> f32 {
    0.5
}
fn default_low_pass_min_cutoff_hz() -> f32 {
    1.5
}
fn default_low_pass_beta() -> f32 {
    0.8
}
fn default_drift_adapt_rate() -> f32 {
    0.2
}
fn default_output_ease_rate() -> f32 {
    20.0
}
fn default_calibration_secs() -> f32 {
    1.0
}

/// Arc used to reduce orientation to a scalar position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSettings {
    #[serde(default = "default_forward_axis")]
    pub forward_axis: [f32; 3],
    #[serde(default = "default_arc_axis")]
    pub arc_axis: [f32; 3],
    #[serde(default = "default_forehand_deg")]
    pub forehand_deg: f32,
    #[serde(default = "default_backhand_deg")]
    pub backhand_deg: f32,
    #[serde(default = "default_dead_zone")]
    pub dead_zone: f32,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            forward_axis: default_forward_axis(),
            arc_axis: default_arc_axis(),
            forehand_deg: default_forehand_deg(),
            backhand_deg: default_backhand_deg(),
            dead_zone: default_dead_zone(),
        }
    }
}

fn default_forward_axis() -> [f32; 3] {
    [0.0, 0.0, 1.0]
}
fn default_arc_axis() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}
fn default_forehand_deg() -> f32 {
    60.0
}
fn default_backhand_deg() -> f32 {
    -60.0
}
fn default_dead_zone() -> f32 {
    0.03
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub position: PositionSettings,

    /// Number of peripherals tracked concurrently
    #[serde(default = "default_source_count")]
    pub source_count: usize,
    /// Tick period of the driver loop
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

fn default_source_count() -> usize {
    1
}
fn default_tick_interval_ms() -> u64 {
    16
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn from_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(path = %settings_path.display(), "Using default settings: {}", e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ImuPaddle");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "link": { "device_names": ["Paddle"], "max_scan_retries": 5 } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.link.device_names, vec!["Paddle".to_string()]);
        assert_eq!(settings.link.max_scan_retries, 5);
        assert_eq!(settings.link.scan_timeout(), Duration::from_secs(10));
        assert_eq!(settings.fusion.dt_smoothing, 0.1);
        assert_eq!(settings.source_count, 1);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir()
            .join(format!("imu_paddle_settings_{}", std::process::id()))
            .join("settings.json");

        let mut service = SettingsService::from_path(&path);
        service.get_mut().link.packet_silence_timeout_ms = 1234;
        service.get_mut().position.dead_zone = 0.1;
        service.save().unwrap();

        let reloaded = SettingsService::from_path(&path);
        assert_eq!(reloaded.get().link.packet_silence_timeout_ms, 1234);
        assert_eq!(reloaded.get().position.dead_zone, 0.1);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let service = SettingsService::from_path("/nonexistent/imu_paddle/settings.json");
        assert_eq!(service.get().link.max_scan_retries, 3);
    }
}
