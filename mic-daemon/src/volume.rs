use crate::command::{CommandError, CommandRunner};
use crate::config::{MicConfig, VOLUME_PLACEHOLDER};
use anyhow::{Result, anyhow, bail};
use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Get/set access to the system input volume on a 0-100 scale.
///
/// `Ok(None)` from `get_volume` and `Ok(false)` from `set_volume` are the
/// recoverable outcomes. `Err` means the backend cannot work at all.
pub trait VolumeBackend {
    fn get_volume(&mut self) -> impl Future<Output = Result<Option<u8>>>;

    fn set_volume(&mut self, volume: i32) -> impl Future<Output = Result<bool>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MicConfig) -> Self {
        Self {
            attempts: config.max_retries.max(1),
            delay: config.retry_delay(),
            timeout: config.command_timeout(),
        }
    }
}

pub fn parse_volume(output: &str) -> Result<u8> {
    let trimmed = output.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| anyhow!("'{}' is not an integer", trimmed))?;
    match u8::try_from(value) {
        Ok(volume) if volume <= 100 => Ok(volume),
        _ => bail!("{} is outside 0-100", value),
    }
}

/// Volume backed by external read/write commands, e.g. `osascript`.
pub struct CommandVolumeBackend<R> {
    runner: R,
    read_command: Vec<String>,
    write_command: Vec<String>,
    policy: RetryPolicy,
    last_known: Option<u8>,
}

impl<R: CommandRunner> CommandVolumeBackend<R> {
    pub fn new(
        runner: R,
        read_command: Vec<String>,
        write_command: Vec<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            read_command,
            write_command,
            policy,
            last_known: None,
        }
    }

    pub fn from_config(runner: R, config: &MicConfig) -> Self {
        Self::new(
            runner,
            config.read_command.clone(),
            config.write_command.clone(),
            RetryPolicy::from_config(config),
        )
    }

    /// The last level read or written successfully.
    pub fn last_known(&self) -> Option<u8> {
        self.last_known
    }

    async fn execute(&self, argv: &[String]) -> Result<String, CommandError> {
        let mut attempt = 1;
        loop {
            match self.runner.run(argv, self.policy.timeout).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) if e.is_retryable() && attempt < self.policy.attempts => {
                    warn!("Volume command failed on attempt {}: {}", attempt, e);
                    sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_argv(&self, volume: u8) -> Vec<String> {
        let volume = volume.to_string();
        self.write_command
            .iter()
            .map(|arg| arg.replace(VOLUME_PLACEHOLDER, &volume))
            .collect()
    }
}

impl<R: CommandRunner> VolumeBackend for CommandVolumeBackend<R> {
    async fn get_volume(&mut self) -> Result<Option<u8>> {
        match self.execute(&self.read_command).await {
            Ok(stdout) => match parse_volume(&stdout) {
                Ok(volume) => {
                    self.last_known = Some(volume);
                    Ok(Some(volume))
                }
                Err(e) => {
                    error!("Failed to parse volume output: {:#}", e);
                    Ok(None)
                }
            },
            Err(e) if e.is_retryable() => {
                error!("Failed to get volume: {}", e);
                if let Some(volume) = self.last_known {
                    info!("Using cached volume: {}", volume);
                }
                Ok(self.last_known)
            }
            Err(e) => Err(anyhow!(e).context("Volume read command is unusable")),
        }
    }

    async fn set_volume(&mut self, volume: i32) -> Result<bool> {
        let volume = match u8::try_from(volume) {
            Ok(v) if v <= 100 => v,
            _ => {
                error!("Invalid volume level: {}", volume);
                return Ok(false);
            }
        };

        let argv = self.write_argv(volume);
        match self.execute(&argv).await {
            Ok(_) => {
                debug!("Volume set to {}", volume);
                self.last_known = Some(volume);
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                error!("Failed to set volume: {}", e);
                Ok(false)
            }
            Err(e) => Err(anyhow!(e).context("Volume write command is unusable")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// The volume could not be read, nothing was attempted.
    Unknown,
    AtTarget,
    Adjusted { from: u8, readback: Option<u8> },
    Failed { from: u8 },
}

pub struct VolumeCorrector<B> {
    backend: B,
}

impl<B: VolumeBackend> VolumeCorrector<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    /// Pull the volume back to `target` if it has moved away.
    /// Failures are left for the next cycle.
    pub async fn correct_if_needed(&mut self, target: i32) -> Result<Correction> {
        let Some(current) = self.backend.get_volume().await? else {
            warn!("Current volume unknown, skipping adjustment");
            return Ok(Correction::Unknown);
        };

        if i32::from(current) == target {
            debug!("Volume already at target {}", target);
            return Ok(Correction::AtTarget);
        }

        info!("In call: Adjusting volume from {} to {}", current, target);
        if !self.backend.set_volume(target).await? {
            warn!("Failed to adjust volume, will retry on next check");
            return Ok(Correction::Failed { from: current });
        }

        let readback = self.backend.get_volume().await?;
        if let Some(actual) = readback.filter(|&v| i32::from(v) != target) {
            warn!("Volume set to {} but actual volume is {}", target, actual);
        }
        Ok(Correction::Adjusted {
            from: current,
            readback,
        })
    }
}
