use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{AudioFrame, AudioInput, CaptureBackend, CaptureSettings, CaptureStatus};

/// Power reported for digital silence, in dBFS
pub const SILENCE_DB: f32 = -160.0;

/// Average power of interleaved 16-bit samples in dBFS
pub fn average_power_db(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();

    if rms <= 0.0 {
        return SILENCE_DB;
    }

    ((20.0 * rms.log10()) as f32).max(SILENCE_DB)
}

/// Metering state shared between the recorder and its writer task
#[derive(Debug)]
struct Meter {
    status: CaptureStatus,
    samples_written: u64,
    power_db: f32,
    stopping: bool,
}

type WavFileWriter = hound::WavWriter<BufWriter<File>>;

/// Capture backend writing frames from an [`AudioInput`] to a WAV file
pub struct WavRecorder {
    input: Box<dyn AudioInput>,
    settings: CaptureSettings,
    path: Option<PathBuf>,
    writer: Option<WavFileWriter>,
    meter: Arc<Mutex<Meter>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl WavRecorder {
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self {
            input,
            settings: CaptureSettings::default(),
            path: None,
            writer: None,
            meter: Arc::new(Mutex::new(Meter {
                status: CaptureStatus::Idle,
                samples_written: 0,
                power_db: SILENCE_DB,
                stopping: false,
            })),
            task: None,
        }
    }

    fn meter(&self) -> MutexGuard<'_, Meter> {
        lock(&self.meter)
    }
}

// A poisoned meter only means a writer task panicked mid-update; the counters
// are still meaningful.
fn lock(meter: &Mutex<Meter>) -> MutexGuard<'_, Meter> {
    meter.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drain frames into the WAV writer until the input closes
async fn write_frames(
    mut writer: WavFileWriter,
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    meter: Arc<Mutex<Meter>>,
    settings: CaptureSettings,
) -> Result<()> {
    let mut failure = None;

    while let Some(frame) = audio_rx.recv().await {
        if frame.sample_rate != settings.sample_rate || frame.channels != settings.channels {
            failure = Some(format!(
                "input format changed to {}Hz/{}ch",
                frame.sample_rate, frame.channels
            ));
            break;
        }

        if lock(&meter).status == CaptureStatus::Paused {
            continue;
        }

        let mut write_error = None;
        for &sample in &frame.samples {
            if let Err(e) = writer.write_sample(sample) {
                write_error = Some(e);
                break;
            }
        }
        if let Some(e) = write_error {
            failure = Some(format!("failed to write sample: {}", e));
            break;
        }

        let mut state = lock(&meter);
        state.samples_written += frame.samples.len() as u64;
        state.power_db = average_power_db(&frame.samples);
    }

    let finalized = writer.finalize().context("Failed to finalize WAV file");

    let mut state = lock(&meter);
    if failure.is_none() && !state.stopping {
        failure = Some("input stream ended unexpectedly".to_string());
    }
    if let Some(reason) = failure {
        if !state.stopping {
            error!("Capture failed: {}", reason);
            state.status = CaptureStatus::Failed(reason);
        }
    }

    finalized
}

#[async_trait::async_trait]
impl CaptureBackend for WavRecorder {
    async fn open(&mut self, path: &Path, settings: &CaptureSettings) -> Result<()> {
        if self.path.is_some() {
            bail!("Recorder already opened");
        }

        let spec = hound::WavSpec {
            channels: settings.channels,
            sample_rate: settings.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!(
            "WAV recorder opened {} ({}Hz, {} channels, input: {})",
            path.display(),
            settings.sample_rate,
            settings.channels,
            self.input.name()
        );

        self.settings = settings.clone();
        self.path = Some(path.to_path_buf());
        self.writer = Some(writer);

        Ok(())
    }

    async fn record(&mut self) -> Result<()> {
        let status = self.meter().status.clone();
        match status {
            CaptureStatus::Recording => Ok(()),
            CaptureStatus::Paused => {
                self.meter().status = CaptureStatus::Recording;
                Ok(())
            }
            CaptureStatus::Idle => {
                let writer = self
                    .writer
                    .take()
                    .context("Recorder must be opened before recording")?;

                let audio_rx = self
                    .input
                    .start()
                    .await
                    .context("Failed to start audio input")?;

                self.meter().status = CaptureStatus::Recording;

                self.task = Some(tokio::spawn(write_frames(
                    writer,
                    audio_rx,
                    Arc::clone(&self.meter),
                    self.settings.clone(),
                )));

                Ok(())
            }
            CaptureStatus::Stopped | CaptureStatus::Failed(_) => {
                bail!("Recorder can't record in state {:?}", status)
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        let mut meter = self.meter();
        let status = meter.status.clone();
        match status {
            CaptureStatus::Recording | CaptureStatus::Paused => {
                meter.status = CaptureStatus::Paused;
                Ok(())
            }
            other => bail!("Recorder can't pause in state {:?}", other),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        {
            let mut meter = self.meter();
            if meter.status == CaptureStatus::Stopped {
                return Ok(());
            }
            meter.stopping = true;
        }

        if let Err(e) = self.input.stop().await {
            warn!("Failed to stop audio input: {}", e);
        }

        // Never started: finalize the empty file so it is a valid WAV
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        let result = match self.task.take() {
            Some(task) => task.await.context("WAV writer task panicked")?,
            None => Ok(()),
        };

        {
            let mut meter = self.meter();
            if !matches!(meter.status, CaptureStatus::Failed(_)) {
                meter.status = CaptureStatus::Stopped;
            }
        }

        if let Some(path) = &self.path {
            info!(
                "WAV recorder stopped {} ({:.1}s captured)",
                path.display(),
                self.current_time().as_secs_f64()
            );
        }

        result
    }

    fn current_time(&self) -> Duration {
        let per_second = self.settings.sample_rate as f64 * self.settings.channels.max(1) as f64;
        if per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.meter().samples_written as f64 / per_second)
    }

    fn average_power(&self) -> f32 {
        self.meter().power_db
    }

    fn status(&self) -> CaptureStatus {
        self.meter().status.clone()
    }

    fn name(&self) -> &str {
        "wav-recorder"
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("WAV recorder dropped while capturing");
            task.abort();
        }
    }
}
