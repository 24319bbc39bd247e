use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Keeps the microphone input volume pinned while a call is in progress",
    long_about = None
)]
pub struct Args {
    /// Target microphone volume level (0-100)
    #[arg(long, value_name = "VOLUME", value_parser = clap::value_parser!(i32).range(0..=100))]
    pub target_volume: Option<i32>,

    /// Seconds between volume checks during calls
    #[arg(long, value_name = "SECONDS")]
    pub active_interval: Option<u64>,

    /// Seconds between checks when idle
    #[arg(long, value_name = "SECONDS")]
    pub idle_interval: Option<u64>,

    /// Seconds between full call detection checks
    #[arg(long, value_name = "SECONDS")]
    pub call_interval: Option<u64>,

    /// RMS level above which a sample counts as audio activity
    #[arg(long, value_name = "RMS")]
    pub audio_threshold: Option<f32>,

    /// Length of a single recording in seconds
    #[arg(long, value_name = "SECONDS")]
    pub sample_duration: Option<f64>,

    /// Number of samples taken per call detection window
    #[arg(long, value_name = "SAMPLES")]
    pub call_detection_duration: Option<usize>,

    /// Fraction of active samples (0-1) needed to consider a call in progress
    #[arg(long, value_name = "RATIO")]
    pub call_activity_ratio: Option<f64>,

    /// Path to the log file
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Path to configuration file (defaults to ~/.mic_control/config.json)
    #[arg(long, value_name = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Save current configuration to file and exit
    #[arg(long)]
    pub save_config: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}
