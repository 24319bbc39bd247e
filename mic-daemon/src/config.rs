use crate::audio::CAPTURE_GRACE;
use crate::cli::Args;
use anyhow::{Context, Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const VOLUME_PLACEHOLDER: &str = "{volume}";
const CONFIG_DIR: &str = ".mic_control";
const CONFIG_FILE: &str = "config.json";
const ENV_PREFIX: &str = "MIC_CONTROL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicConfig {
    pub target_volume: i32,

    // Timing intervals, in seconds
    pub active_interval: u64,
    pub idle_interval: u64,
    pub call_interval: u64,

    // Audio detection
    pub audio_threshold: f32,
    pub sample_duration: f64,
    pub call_detection_duration: usize,
    pub call_activity_ratio: f64,

    pub log_path: PathBuf,
    pub log_level: String,

    // Volume command behaviour
    pub max_retries: u32,
    pub retry_delay: f64,
    pub command_timeout: f64,
    pub read_command: Vec<String>,
    pub write_command: Vec<String>,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            target_volume: 80,
            active_interval: 3,
            idle_interval: 15,
            call_interval: 30,
            audio_threshold: 0.01,
            sample_duration: 1.0,
            call_detection_duration: 5,
            call_activity_ratio: 0.4,
            log_path: PathBuf::from("mic_control.log"),
            log_level: "info".to_string(),
            max_retries: 3,
            retry_delay: 0.5,
            command_timeout: 5.0,
            read_command: vec![
                "osascript".to_string(),
                "-e".to_string(),
                "input volume of (get volume settings)".to_string(),
            ],
            write_command: vec![
                "osascript".to_string(),
                "-e".to_string(),
                format!("set volume input volume {VOLUME_PLACEHOLDER}"),
            ],
        }
    }
}

/// `~/.mic_control/config.json`, if a home directory can be found.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Seconds as a `Duration`, rejecting values too large to represent.
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow!("{name} is out of range, got {value}: {e}"))
}

impl MicConfig {
    /// Load configuration from multiple sources, last one wins:
    /// defaults, config file, `MIC_CONTROL_*` environment, CLI flags.
    pub fn load(args: &Args) -> Self {
        let (path, required) = match &args.config {
            Some(path) => (Some(path.clone()), true),
            None => (default_config_path(), false),
        };

        let mut config = match Self::from_sources(path.as_deref(), required) {
            Ok(config) => config,
            Err(e) => {
                // Logging is not up yet, the log path itself comes from here
                eprintln!("Configuration warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.apply_overrides(args);
        config
    }

    pub fn from_sources(file: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Self::default()).context("Failed to build default configuration")?,
        );

        if let Some(path) = file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Json)
                    .required(required),
            );
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(v) = args.target_volume {
            self.target_volume = v;
        }
        if let Some(v) = args.active_interval {
            self.active_interval = v;
        }
        if let Some(v) = args.idle_interval {
            self.idle_interval = v;
        }
        if let Some(v) = args.call_interval {
            self.call_interval = v;
        }
        if let Some(v) = args.audio_threshold {
            self.audio_threshold = v;
        }
        if let Some(v) = args.sample_duration {
            self.sample_duration = v;
        }
        if let Some(v) = args.call_detection_duration {
            self.call_detection_duration = v;
        }
        if let Some(v) = args.call_activity_ratio {
            self.call_activity_ratio = v;
        }
        if let Some(v) = &args.log_path {
            self.log_path = v.clone();
        }
        if args.debug {
            self.log_level = "debug".to_string();
        }
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.target_volume) {
            bail!("target_volume must be between 0 and 100, got {}", self.target_volume);
        }
        if self.active_interval == 0 {
            bail!("active_interval must be positive, got 0");
        }
        if self.idle_interval == 0 {
            bail!("idle_interval must be positive, got 0");
        }
        if self.call_interval == 0 {
            bail!("call_interval must be positive, got 0");
        }
        if !self.audio_threshold.is_finite() || self.audio_threshold <= 0.0 {
            bail!("audio_threshold must be positive, got {}", self.audio_threshold);
        }
        if !self.sample_duration.is_finite() || self.sample_duration <= 0.0 {
            bail!("sample_duration must be positive, got {}", self.sample_duration);
        }
        if seconds("sample_duration", self.sample_duration)?
            .checked_add(CAPTURE_GRACE)
            .is_none()
        {
            bail!("sample_duration is too large, got {}", self.sample_duration);
        }
        if self.call_detection_duration == 0 {
            bail!("call_detection_duration must be positive, got 0");
        }
        if !(0.0..=1.0).contains(&self.call_activity_ratio) {
            bail!("call_activity_ratio must be between 0 and 1, got {}", self.call_activity_ratio);
        }
        if log::LevelFilter::from_str(&self.log_level).is_err() {
            bail!("log_level '{}' is not a known level", self.log_level);
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1, got 0");
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            bail!("retry_delay must not be negative, got {}", self.retry_delay);
        }
        seconds("retry_delay", self.retry_delay)?;
        if !self.command_timeout.is_finite() || self.command_timeout <= 0.0 {
            bail!("command_timeout must be positive, got {}", self.command_timeout);
        }
        seconds("command_timeout", self.command_timeout)?;
        if self.read_command.is_empty() {
            bail!("read_command must not be empty");
        }
        if self.write_command.is_empty() {
            bail!("write_command must not be empty");
        }
        if !self
            .write_command
            .iter()
            .any(|arg| arg.contains(VOLUME_PLACEHOLDER))
        {
            bail!("write_command must contain the {VOLUME_PLACEHOLDER} placeholder");
        }
        Ok(())
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_secs(self.active_interval)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval)
    }

    pub fn call_interval(&self) -> Duration {
        Duration::from_secs(self.call_interval)
    }

    pub fn sample_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_duration)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_are_valid() {
        assert!(MicConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_target_volume_out_of_bounds() {
        for volume in [-1, 101] {
            let config = MicConfig {
                target_volume: volume,
                ..MicConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {volume}");
        }
    }

    #[test]
    fn accepts_target_volume_bounds() {
        for volume in [0, 100] {
            let config = MicConfig {
                target_volume: volume,
                ..MicConfig::default()
            };
            assert!(config.validate().is_ok(), "rejected {volume}");
        }
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = MicConfig::default();
        config.active_interval = 0;
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.idle_interval = 0;
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.call_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_audio_settings() {
        let mut config = MicConfig::default();
        config.audio_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.sample_duration = -1.0;
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.sample_duration = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_sample_duration_too_large_for_a_duration() {
        for duration in [1e20, Duration::MAX.as_secs_f64(), f64::MAX] {
            let config = MicConfig {
                sample_duration: duration,
                ..MicConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("sample_duration"), "{err}");
        }
    }

    #[test]
    fn rejects_retry_delay_too_large_for_a_duration() {
        let config = MicConfig {
            retry_delay: 1e20,
            ..MicConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry_delay"), "{err}");
    }

    #[test]
    fn rejects_command_timeout_too_large_for_a_duration() {
        let config = MicConfig {
            command_timeout: 1e300,
            ..MicConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("command_timeout"), "{err}");
    }

    #[test]
    fn validated_durations_convert() {
        let config = MicConfig {
            sample_duration: 3600.0,
            retry_delay: 0.0,
            command_timeout: 86_400.0,
            ..MicConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.sample_duration(), Duration::from_secs(3600));
        assert_eq!(config.retry_delay(), Duration::ZERO);
        assert_eq!(config.command_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_empty_detection_window() {
        let config = MicConfig {
            call_detection_duration: 0,
            ..MicConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("call_detection_duration"));
    }

    #[test]
    fn activity_ratio_is_inclusive_of_bounds() {
        for ratio in [0.0, 1.0] {
            let config = MicConfig {
                call_activity_ratio: ratio,
                ..MicConfig::default()
            };
            assert!(config.validate().is_ok());
        }
        for ratio in [-0.1, 1.1] {
            let config = MicConfig {
                call_activity_ratio: ratio,
                ..MicConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn rejects_bad_command_settings() {
        let mut config = MicConfig::default();
        config.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.read_command.clear();
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.write_command = vec!["pactl".to_string(), "set-source-volume".to_string()];
        assert!(config.validate().is_err());

        let mut config = MicConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_flags_override_loaded_values() {
        let args = Args::parse_from([
            "mic-daemon",
            "--target-volume",
            "55",
            "--call-interval",
            "10",
            "--debug",
        ]);
        let mut config = MicConfig::default();
        config.apply_overrides(&args);
        assert_eq!(config.target_volume, 55);
        assert_eq!(config.call_interval, 10);
        assert_eq!(config.idle_interval, 15);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"target_volume": 70, "idle_interval": 20}"#).unwrap();

        let config = MicConfig::from_sources(Some(&path), true).unwrap();
        assert_eq!(config.target_volume, 70);
        assert_eq!(config.idle_interval, 20);
        assert_eq!(config.active_interval, 3);
        assert_eq!(config.read_command, MicConfig::default().read_command);
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"call_interval": 40}"#).unwrap();

        // Only this test sets a MIC_CONTROL_* variable, and it picks a field
        // the other file-loading tests never check.
        unsafe { std::env::set_var("MIC_CONTROL_CALL_INTERVAL", "45") };
        let loaded = MicConfig::from_sources(Some(&path), true);
        unsafe { std::env::remove_var("MIC_CONTROL_CALL_INTERVAL") };

        assert_eq!(loaded.unwrap().call_interval, 45);
        let without_env = MicConfig::from_sources(Some(&path), true).unwrap();
        assert_eq!(without_env.call_interval, 40);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = MicConfig {
            target_volume: 42,
            call_activity_ratio: 0.75,
            write_command: vec!["set-mic".to_string(), VOLUME_PLACEHOLDER.to_string()],
            ..MicConfig::default()
        };

        config.save(&path).unwrap();
        let loaded = MicConfig::from_sources(Some(&path), true).unwrap();
        assert_eq!(loaded.target_volume, 42);
        assert_eq!(loaded.call_activity_ratio, 0.75);
        assert_eq!(loaded.write_command, config.write_command);
    }

    #[test]
    fn broken_file_falls_back_to_defaults_with_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let args = Args::parse_from([
            "mic-daemon",
            "--config",
            path.to_str().unwrap(),
            "--target-volume",
            "90",
        ]);
        let config = MicConfig::load(&args);
        assert_eq!(config.target_volume, 90);
        assert_eq!(config.idle_interval, MicConfig::default().idle_interval);
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(MicConfig::from_sources(Some(&path), true).is_err());
        assert!(MicConfig::from_sources(Some(&path), false).is_ok());
    }
}
