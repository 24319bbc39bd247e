use anyhow::{Context, Result, bail};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Mirrors every log line to the log file and stderr.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stderr().flush()
    }
}

/// Resolve the log path and make sure a log file can be written there.
pub fn validate_log_path(log_path: &Path) -> Result<PathBuf> {
    let log_path = std::path::absolute(log_path)
        .with_context(|| format!("Invalid log path {}", log_path.display()))?;
    let parent = log_path
        .parent()
        .with_context(|| format!("Invalid log path {}", log_path.display()))?;

    if !parent.exists() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create directory {}", parent.display()))?;
    }
    if !parent.is_dir() {
        bail!("{} exists but is not a directory", parent.display());
    }

    if log_path.exists() {
        if !log_path.is_file() {
            bail!("{} exists but is not a regular file", log_path.display());
        }
        OpenOptions::new()
            .append(true)
            .open(&log_path)
            .with_context(|| {
                format!("No write permission for existing log file {}", log_path.display())
            })?;
    } else {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Could not create log file {}", log_path.display()))?;
        std::fs::remove_file(&log_path)
            .with_context(|| format!("Could not remove test file {}", log_path.display()))?;
    }

    Ok(log_path)
}

/// Initialize `env_logger`. `RUST_LOG` wins over the configured level.
pub fn init(log_path: &Path, level: LevelFilter) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str().to_lowercase()),
    )
    .filter_module("cpal", LevelFilter::Warn)
    .format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            buf.timestamp_millis(),
            record.target(),
            record.level(),
            record.args()
        )
    })
    .write_style(env_logger::WriteStyle::Never)
    .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
    .try_init()
    .context("Failed to initialize logger")?;

    Ok(())
}
