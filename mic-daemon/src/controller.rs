use crate::config::MicConfig;
use crate::detector::CallDetection;
use crate::shutdown::Shutdown;
use crate::volume::{VolumeBackend, VolumeCorrector};
use anyhow::Result;
use log::{error, info};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    ActiveCall,
}

#[derive(Debug, Clone, Copy)]
pub struct CallState {
    pub status: CallStatus,
    /// `None` until the first detection, so the first iteration always checks.
    pub last_check: Option<Instant>,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            last_check: None,
        }
    }
}

impl CallState {
    pub fn recheck_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_check
            .is_none_or(|last| now.duration_since(last) > interval)
    }

    pub fn record_check(&mut self, in_call: bool, at: Instant) {
        self.status = if in_call {
            CallStatus::ActiveCall
        } else {
            CallStatus::Idle
        };
        self.last_check = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub target_volume: i32,
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub call_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &MicConfig) -> Self {
        Self {
            target_volume: config.target_volume,
            active_interval: config.active_interval(),
            idle_interval: config.idle_interval(),
            call_interval: config.call_interval(),
        }
    }
}

pub struct Controller<D, B> {
    settings: LoopSettings,
    detector: D,
    corrector: VolumeCorrector<B>,
    state: CallState,
    shutdown: Shutdown,
}

impl<D: CallDetection, B: VolumeBackend> Controller<D, B> {
    pub fn new(settings: LoopSettings, detector: D, backend: B, shutdown: Shutdown) -> Self {
        Self {
            settings,
            detector,
            corrector: VolumeCorrector::new(backend),
            state: CallState::default(),
            shutdown,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn backend(&self) -> &B {
        self.corrector.backend()
    }

    /// Run until shutdown is requested. Cleanup runs on every exit path and
    /// unexpected errors are passed on afterwards.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting microphone level controller with settings: target volume {}, \
             active interval {:?}, idle interval {:?}, call check interval {:?}",
            self.settings.target_volume,
            self.settings.active_interval,
            self.settings.idle_interval,
            self.settings.call_interval
        );

        let result = self.run_loop().await;
        if let Err(e) = &result {
            error!("Unexpected error in main loop: {:#}", e);
        }
        self.cleanup();
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        while !self.shutdown.is_requested() {
            self.tick().await?;
        }
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        let now = Instant::now();

        if self.state.recheck_due(now, self.settings.call_interval) {
            let in_call = self.detector.detect().await?;
            self.state.record_check(in_call, now);
            info!(
                "Call status check: {}",
                if in_call { "in call" } else { "not in call" }
            );
        }

        match self.state.status {
            CallStatus::ActiveCall => {
                self.corrector
                    .correct_if_needed(self.settings.target_volume)
                    .await?;
                self.pause(self.settings.active_interval).await;
            }
            CallStatus::Idle => self.pause(self.settings.idle_interval).await,
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            () = sleep(duration) => {}
            () = self.shutdown.wait() => {}
        }
    }

    fn cleanup(&mut self) {
        info!("Cleaning up resources...");
        self.detector.cleanup();
    }
}
