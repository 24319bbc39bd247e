use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::num::NonZeroUsize;
use std::str::FromStr;

use mic_daemon::audio::{ActivitySampler, CpalInput};
use mic_daemon::cli::Args;
use mic_daemon::command::ProcessRunner;
use mic_daemon::config::{self, MicConfig};
use mic_daemon::controller::{Controller, LoopSettings};
use mic_daemon::detector::CallDetector;
use mic_daemon::logging;
use mic_daemon::shutdown::{self, Shutdown};
use mic_daemon::volume::CommandVolumeBackend;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut mic_config = MicConfig::load(&args);

    if let Err(e) = mic_config.validate() {
        eprintln!("Invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    if args.save_config {
        let path = args
            .config
            .clone()
            .or_else(config::default_config_path)
            .context("Could not find home directory")?;
        mic_config.save(&path)?;
        println!("Configuration saved to {}", path.display());
        return Ok(());
    }

    mic_config.log_path = match logging::validate_log_path(&mic_config.log_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    let level = log::LevelFilter::from_str(&mic_config.log_level)?;
    logging::init(&mic_config.log_path, level)?;
    info!("Logging to {}", mic_config.log_path.display());

    let shutdown = Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone())?;

    let sampler = ActivitySampler::new(
        CpalInput,
        mic_config.audio_threshold,
        mic_config.sample_duration(),
    );
    let samples = NonZeroUsize::new(mic_config.call_detection_duration)
        .context("call_detection_duration must be positive")?;
    let detector = CallDetector::new(sampler, samples, mic_config.call_activity_ratio);
    let backend = CommandVolumeBackend::from_config(ProcessRunner, &mic_config);

    let mut controller = Controller::new(
        LoopSettings::from_config(&mic_config),
        detector,
        backend,
        shutdown,
    );

    let result = controller.run().await;
    info!("Microphone controller stopped");

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
