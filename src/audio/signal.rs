// Synthetic audio input producing real-time paced frames

use anyhow::{bail, Result};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::backend::{AudioFrame, AudioInput, CaptureSettings};

/// Waveform generated by a [`SignalInput`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    Sine { frequency_hz: f32, amplitude: f32 },
}

/// Signal generator input
///
/// Emits one buffer every `buffer_duration_ms`, the way a hardware input
/// stream would.
pub struct SignalInput {
    signal: Signal,
    settings: CaptureSettings,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SignalInput {
    pub fn new(signal: Signal, settings: CaptureSettings) -> Self {
        Self {
            signal,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

/// Render `frames` interleaved frames of `signal` starting at frame index `offset`
fn render(signal: Signal, settings: &CaptureSettings, offset: u64, frames: usize) -> Vec<i16> {
    let channels = settings.channels.max(1) as usize;
    let mut samples = Vec::with_capacity(frames * channels);

    for i in 0..frames {
        let value = match signal {
            Signal::Silence => 0,
            Signal::Sine {
                frequency_hz,
                amplitude,
            } => {
                let t = (offset + i as u64) as f32 / settings.sample_rate as f32;
                let level = (TAU * frequency_hz * t).sin() * amplitude.clamp(0.0, 1.0);
                (level * i16::MAX as f32) as i16
            }
        };
        samples.extend(std::iter::repeat(value).take(channels));
    }

    samples
}

#[async_trait::async_trait]
impl AudioInput for SignalInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }
        if self.settings.sample_rate == 0 || self.settings.buffer_duration_ms == 0 {
            bail!("Invalid capture settings: {:?}", self.settings);
        }

        info!(
            "Starting signal input ({:?}, {}Hz, {} channels)",
            self.signal, self.settings.sample_rate, self.settings.channels
        );

        let (tx, rx) = mpsc::channel(64);
        let running = Arc::clone(&self.running);
        let signal = self.signal;
        let settings = self.settings.clone();
        let buffer = Duration::from_millis(settings.buffer_duration_ms);
        let frames_per_buffer =
            (settings.sample_rate as u64 * settings.buffer_duration_ms / 1000).max(1) as usize;

        running.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(buffer);
            let mut offset = 0u64;
            let mut timestamp_ms = 0u64;

            // First tick completes immediately; wait one buffer before emitting
            ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let frame = AudioFrame {
                    samples: render(signal, &settings, offset, frames_per_buffer),
                    sample_rate: settings.sample_rate,
                    channels: settings.channels,
                    timestamp_ms,
                };

                if tx.send(frame).await.is_err() {
                    error!("Signal input receiver dropped");
                    break;
                }

                offset += frames_per_buffer as u64;
                timestamp_ms += settings.buffer_duration_ms;
            }

            running.store(false, Ordering::SeqCst);
        });

        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome here
            let _ = task.await;
            info!("Signal input stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "signal"
    }
}
