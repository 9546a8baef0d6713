// Audio hardware backends on cpal
//
// cpal streams are not Send, so each stream lives on its own thread and is
// dropped there when the owning backend asks it to stop.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfigRange,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioFrame, AudioInput, CaptureSettings, PlaybackBackend, PlaybackStatus};

/// Thread owning one running cpal stream
struct StreamThread {
    stop: std_mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl StreamThread {
    /// Build and start a stream on a fresh thread, waiting until it plays
    async fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                // Runs until stopped or the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Audio thread exited before the stream started"))??;

        Ok(Self { stop, handle })
    }

    async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        tokio::task::spawn_blocking(move || self.handle.join())
            .await
            .context("Failed to join audio thread")?
            .map_err(|_| anyhow!("Audio thread panicked"))
    }
}

/// Pick a device configuration running at `sample_rate`, preferring `channels`
fn pick_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
    channels: u16,
) -> Option<cpal::SupportedStreamConfig> {
    let mut best: Option<SupportedStreamConfigRange> = None;

    for range in ranges {
        if range.min_sample_rate().0 > sample_rate || range.max_sample_rate().0 < sample_rate {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => current.channels() != channels && range.channels() == channels,
        };
        if better {
            best = Some(range);
        }
    }

    best.map(|range| range.with_sample_rate(cpal::SampleRate(sample_rate)))
}

/// Convert interleaved samples between channel counts
///
/// Downmixing to mono averages; otherwise missing channels repeat the last
/// source channel and extra ones are dropped.
fn remix<T: Copy + Into<f32>>(input: &[T], from: u16, to: u16, out: &mut Vec<f32>) {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;

    for frame in input.chunks_exact(from) {
        if to == 1 && from > 1 {
            let sum: f32 = frame.iter().map(|&s| s.into()).sum();
            out.push(sum / from as f32);
        } else {
            for channel in 0..to {
                out.push(frame[channel.min(from - 1)].into());
            }
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Microphone input through the default cpal host
pub struct DeviceInput {
    settings: CaptureSettings,
    capturing: Arc<AtomicBool>,
    stream: Option<StreamThread>,
}

impl DeviceInput {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            capturing: Arc::new(AtomicBool::new(false)),
            stream: None,
        }
    }
}

/// Sender shared by the data and error callbacks; taken on a stream error
type FrameSender = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    settings: CaptureSettings,
    frames: FrameSender,
    capturing: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let device_channels = config.channels;
    let per_buffer = (settings.sample_rate as u64 * settings.buffer_duration_ms / 1000).max(1) as usize
        * settings.channels.max(1) as usize;
    let mut pending: Vec<f32> = Vec::with_capacity(per_buffer * 2);
    let mut converted: Vec<f32> = Vec::new();
    let mut timestamp_ms = 0u64;

    let error_frames = Arc::clone(&frames);
    let error_capturing = Arc::clone(&capturing);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|&s| f32::from_sample(s)));
            remix(&converted, device_channels, settings.channels, &mut pending);

            while pending.len() >= per_buffer {
                let samples: Vec<i16> = pending.drain(..per_buffer).map(to_i16).collect();
                let frame = AudioFrame {
                    samples,
                    sample_rate: settings.sample_rate,
                    channels: settings.channels,
                    timestamp_ms,
                };
                timestamp_ms += settings.buffer_duration_ms;

                let guard = frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(tx) = guard.as_ref() {
                    if tx.try_send(frame).is_err() {
                        warn!("Dropped an input buffer; the recorder is falling behind");
                    }
                }
            }
        },
        move |err| {
            error!("Audio input stream error: {}", err);
            error_capturing.store(false, Ordering::SeqCst);
            // Closing the channel tells the recorder capture broke down
            error_frames
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
        },
        None,
    )?;

    Ok(stream)
}

#[async_trait::async_trait]
impl AudioInput for DeviceInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        let frames: FrameSender = Arc::new(Mutex::new(Some(tx)));
        let settings = self.settings.clone();
        let capturing = Arc::clone(&self.capturing);

        let stream = StreamThread::spawn("audio-input", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No default input device found"))?;
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());

            let supported = pick_config(
                device.supported_input_configs()?,
                settings.sample_rate,
                settings.channels,
            )
            .ok_or_else(|| anyhow!("{} can't capture at {}Hz", name, settings.sample_rate))?;
            let format = supported.sample_format();
            let config: StreamConfig = supported.into();

            info!(
                "Opening input device {} ({}Hz, {} channels, {:?})",
                name, config.sample_rate.0, config.channels, format
            );

            capturing.store(true, Ordering::SeqCst);
            match format {
                SampleFormat::F32 => build_input::<f32>(&device, &config, settings, frames, capturing),
                SampleFormat::I16 => build_input::<i16>(&device, &config, settings, frames, capturing),
                SampleFormat::U16 => build_input::<u16>(&device, &config, settings, frames, capturing),
                other => bail!("Unsupported input sample format {:?}", other),
            }
        })
        .await;

        match stream {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(rx)
            }
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            stream.shutdown().await?;
            info!("Input device stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "device-input"
    }
}

/// Decoded track and play head shared with the output callback
struct Track {
    /// Interleaved samples in -1.0..=1.0
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    /// Frames handed to the device so far
    cursor: AtomicU64,
    playing: AtomicBool,
}

impl Track {
    fn frames(&self) -> u64 {
        (self.samples.len() / self.channels.max(1) as usize) as u64
    }

    fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Fill one output buffer, advancing the play head while playing
    fn render(&self, out_channels: u16, out: &mut [f32]) {
        let out_channels = out_channels.max(1) as usize;
        let channels = self.channels.max(1) as usize;
        let total = self.frames();
        let mut cursor = self.cursor.load(Ordering::SeqCst);

        for frame in out.chunks_mut(out_channels) {
            if !self.playing.load(Ordering::SeqCst) || cursor >= total {
                frame.fill(0.0);
                continue;
            }
            let start = cursor as usize * channels;
            let source = &self.samples[start..start + channels];
            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample = if channels > 1 && out_channels == 1 {
                    source.iter().sum::<f32>() / channels as f32
                } else {
                    source[channel.min(channels - 1)]
                };
            }
            cursor += 1;
        }

        self.cursor.store(cursor, Ordering::SeqCst);
    }
}

fn decode(path: &Path) -> Result<Track> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Track {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        cursor: AtomicU64::new(0),
        playing: AtomicBool::new(false),
    })
}

fn build_output<T>(device: &cpal::Device, config: &StreamConfig, track: Arc<Track>) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let out_channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            track.render(out_channels, &mut scratch);
            for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(sample);
            }
        },
        |err| {
            error!("Audio output stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

/// Speaker output through the default cpal host
///
/// Decodes the whole WAV file on open; position is the number of frames
/// handed to the device.
pub struct DevicePlayer {
    track: Option<Arc<Track>>,
    stream: Option<StreamThread>,
    status: PlaybackStatus,
}

impl DevicePlayer {
    pub fn new() -> Self {
        Self {
            track: None,
            stream: None,
            status: PlaybackStatus::Idle,
        }
    }

    fn track(&self) -> Result<&Arc<Track>> {
        self.track.as_ref().context("Player must be opened first")
    }
}

impl Default for DevicePlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for DevicePlayer {
    async fn open(&mut self, path: &Path) -> Result<Duration> {
        if self.track.is_some() {
            bail!("Player already opened");
        }

        let track = Arc::new(decode(path)?);
        let length = track.frames_to_duration(track.frames());
        let output = Arc::clone(&track);

        let stream = StreamThread::spawn("audio-output", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow!("No default output device found"))?;
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());

            let supported = pick_config(
                device.supported_output_configs()?,
                output.sample_rate,
                output.channels,
            )
            .ok_or_else(|| anyhow!("{} can't play at {}Hz", name, output.sample_rate))?;
            let format = supported.sample_format();
            let config: StreamConfig = supported.into();

            info!(
                "Opening output device {} ({}Hz, {} channels, {:?})",
                name, config.sample_rate.0, config.channels, format
            );

            match format {
                SampleFormat::F32 => build_output::<f32>(&device, &config, output),
                SampleFormat::I16 => build_output::<i16>(&device, &config, output),
                SampleFormat::U16 => build_output::<u16>(&device, &config, output),
                other => bail!("Unsupported output sample format {:?}", other),
            }
        })
        .await?;

        info!("Device player opened {} ({:.1}s)", path.display(), length.as_secs_f64());

        self.track = Some(track);
        self.stream = Some(stream);
        self.status = PlaybackStatus::Paused;

        Ok(length)
    }

    async fn play(&mut self) -> Result<()> {
        match self.status() {
            PlaybackStatus::Playing => Ok(()),
            PlaybackStatus::Paused => {
                self.track()?.playing.store(true, Ordering::SeqCst);
                self.status = PlaybackStatus::Playing;
                Ok(())
            }
            other => bail!("Player can't play in state {:?}", other),
        }
    }

    async fn pause(&mut self) -> Result<()> {
        if self.status() == PlaybackStatus::Playing {
            self.track()?.playing.store(false, Ordering::SeqCst);
            self.status = PlaybackStatus::Paused;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(track) = &self.track {
            track.playing.store(false, Ordering::SeqCst);
        }
        self.status = PlaybackStatus::Stopped;
        if let Some(stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn position(&self) -> Duration {
        match &self.track {
            Some(track) => track.frames_to_duration(track.cursor.load(Ordering::SeqCst)),
            None => Duration::ZERO,
        }
    }

    fn set_position(&mut self, position: Duration) {
        if let Some(track) = &self.track {
            let frame = (position.as_secs_f64() * track.sample_rate as f64) as u64;
            track.cursor.store(frame.min(track.frames()), Ordering::SeqCst);
        }
    }

    fn status(&self) -> PlaybackStatus {
        if self.status == PlaybackStatus::Playing {
            if let Some(track) = &self.track {
                if track.cursor.load(Ordering::SeqCst) >= track.frames() {
                    return PlaybackStatus::Finished;
                }
            }
        }
        self.status
    }

    fn name(&self) -> &str {
        "device-player"
    }
}
