use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Extra time a recording may take beyond its nominal length.
pub const CAPTURE_GRACE: Duration = Duration::from_secs(2);

pub struct InputDevice<H> {
    pub name: String,
    pub sample_rate: u32,
    pub handle: H,
}

/// Default input device access and fixed-length mono capture.
pub trait AudioInput {
    type Handle;

    fn default_device(&self) -> Result<InputDevice<Self::Handle>>;

    /// Capture `frames` mono samples at the device's default rate.
    fn record(
        &self,
        device: &InputDevice<Self::Handle>,
        frames: usize,
    ) -> impl Future<Output = Result<Vec<f32>>>;
}

/// Root-mean-square energy. An empty buffer has no energy.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Shared between the stream callback and the waiting recorder.
struct Capture {
    samples: Vec<f32>,
    wanted: usize,
    done: Option<oneshot::Sender<()>>,
}

impl Capture {
    fn new(wanted: usize, done: oneshot::Sender<()>) -> Self {
        Self {
            samples: Vec::with_capacity(wanted),
            wanted,
            done: Some(done),
        }
    }

    fn push_frames<T: Copy>(&mut self, data: &[T], channels: usize, convert: impl Fn(T) -> f32) {
        for frame in data.chunks(channels) {
            if self.samples.len() >= self.wanted {
                break;
            }
            let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
            self.samples.push(sum / frame.len() as f32);
        }

        if self.samples.len() >= self.wanted {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capture: Arc<Mutex<Capture>>,
    convert: F,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    let channels = usize::from(config.channels.max(1));
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if let Ok(mut capture) = capture.lock() {
                capture.push_frames(data, channels, &convert);
            }
        },
        |err| error!("an error occurred on stream: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Microphone access through the default `cpal` host.
#[derive(Default)]
pub struct CpalInput;

/// A queried input device together with the stream settings it reported.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
}

impl AudioInput for CpalInput {
    type Handle = CpalDevice;

    fn default_device(&self) -> Result<InputDevice<CpalDevice>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device found"))?;
        let supported = device
            .default_input_config()
            .context("Failed to get default input config")?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        Ok(InputDevice {
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate: config.sample_rate.0,
            handle: CpalDevice {
                device,
                config,
                format,
            },
        })
    }

    async fn record(&self, device: &InputDevice<CpalDevice>, frames: usize) -> Result<Vec<f32>> {
        if frames == 0 {
            return Ok(Vec::new());
        }

        let CpalDevice {
            device,
            config,
            format,
        } = &device.handle;

        let (done_tx, done_rx) = oneshot::channel();
        let capture = Arc::new(Mutex::new(Capture::new(frames, done_tx)));

        let stream = match format {
            cpal::SampleFormat::F32 => build_stream(device, config, capture.clone(), |s: f32| s)?,
            cpal::SampleFormat::I16 => build_stream(device, config, capture.clone(), |s: i16| {
                f32::from(s) / f32::from(i16::MAX)
            })?,
            cpal::SampleFormat::U16 => build_stream(device, config, capture.clone(), |s: u16| {
                (f32::from(s) - f32::from(u16::MAX) / 2.0) / (f32::from(u16::MAX) / 2.0)
            })?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };

        stream.play().context("Failed to start audio stream")?;
        done_rx
            .await
            .map_err(|_| anyhow!("Audio stream closed before the recording completed"))?;
        drop(stream);

        let mut capture = capture
            .lock()
            .map_err(|_| anyhow!("Audio buffer lock poisoned"))?;
        Ok(std::mem::take(&mut capture.samples))
    }
}

/// One-window activity check against an RMS threshold.
///
/// The device handle is queried on first use and kept for the lifetime of the
/// sampler. A failed query is retried on the next sample.
pub struct ActivitySampler<A: AudioInput> {
    input: A,
    device: Option<InputDevice<A::Handle>>,
    threshold: f32,
    sample_duration: Duration,
}

impl<A: AudioInput> ActivitySampler<A> {
    pub fn new(input: A, threshold: f32, sample_duration: Duration) -> Self {
        Self {
            input,
            device: None,
            threshold,
            sample_duration,
        }
    }

    #[cfg(test)]
    fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Record one window and report whether it was above the threshold.
    /// Any device or recording error counts as silence.
    pub async fn sample(&mut self) -> bool {
        if self.device.is_none() {
            match self.input.default_device() {
                Ok(device) => {
                    debug!(
                        "Initialized audio device: {} ({} Hz)",
                        device.name, device.sample_rate
                    );
                    self.device = Some(device);
                }
                Err(e) => {
                    error!("Failed to initialize audio device: {:#}", e);
                    return false;
                }
            }
        }
        let Some(device) = self.device.as_ref() else {
            return false;
        };

        if device.sample_rate == 0 {
            error!("Device {} reported a sample rate of 0", device.name);
            return false;
        }

        let frames = (self.sample_duration.as_secs_f64() * f64::from(device.sample_rate)) as usize;
        let limit = self.sample_duration.saturating_add(CAPTURE_GRACE);

        let recording = match tokio::time::timeout(limit, self.input.record(device, frames)).await {
            Ok(Ok(samples)) => samples,
            Ok(Err(e)) => {
                error!("Error detecting audio: {:#}", e);
                return false;
            }
            Err(_) => {
                error!("Audio capture did not finish within {:?}, releasing device", limit);
                self.device = None;
                return false;
            }
        };

        let level = rms(&recording);
        let is_active = level > self.threshold;
        debug!("Audio RMS: {:.4}, Active: {}", level, is_active);
        is_active
    }

    pub fn release(&mut self) {
        if let Some(device) = self.device.take() {
            debug!("Released audio device: {}", device.name);
        }
    }
}
