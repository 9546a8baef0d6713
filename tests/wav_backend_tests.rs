// Real-time tests for the shipped backends
//
// These run the signal input, the WAV recorder and the clock player on the
// tokio clock, with short buffers to keep them fast.

use anyhow::Result;
use audio_notes::{
    AudioBackendFactory, AudioFile, AudioFrame, AudioInput, AudioSource, BackendFactory,
    CaptureBackend, CaptureSettings, CaptureStatus, PlaybackBackend, PlaybackStatus, ProgressEvent,
    RecordStore, SessionConfig, SessionCoordinator, SessionEvent, StaticPermission,
};
use audio_notes::audio::{ClockPlayer, Signal, SignalInput, WavRecorder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn settings() -> CaptureSettings {
    CaptureSettings {
        sample_rate: 8000,
        channels: 1,
        buffer_duration_ms: 20,
    }
}

fn write_wav(path: &Path, frames: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..frames {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn assert_close(a: Duration, b: Duration) {
    let gap = if a > b { a - b } else { b - a };
    assert!(gap < Duration::from_millis(1), "{:?} vs {:?}", a, b);
}

/// Input that delivers a fixed number of frames and then closes its stream
struct FiniteInput {
    frames: usize,
}

#[async_trait::async_trait]
impl AudioInput for FiniteInput {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(self.frames.max(1));
        for i in 0..self.frames {
            tx.send(AudioFrame {
                samples: vec![1000; 160],
                sample_rate: 8000,
                channels: 1,
                timestamp_ms: i as u64 * 20,
            })
            .await?;
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "finite"
    }
}

#[tokio::test]
async fn test_recorder_excludes_paused_time() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("tone.wav");
    let input = SignalInput::new(
        Signal::Sine {
            frequency_hz: 440.0,
            amplitude: 0.5,
        },
        settings(),
    );
    let mut recorder = WavRecorder::new(Box::new(input));

    recorder.open(&path, &settings()).await?;
    recorder.record().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let power = recorder.average_power();
    assert!(power > -12.0 && power < -6.0, "power {} dBFS", power);

    recorder.pause().await?;
    assert_eq!(recorder.status(), CaptureStatus::Paused);
    // Let a frame already being written land
    tokio::time::sleep(Duration::from_millis(30)).await;
    let paused_at = recorder.current_time();
    assert!(paused_at > Duration::ZERO);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.current_time(), paused_at);

    recorder.record().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    recorder.stop().await?;

    assert_eq!(recorder.status(), CaptureStatus::Stopped);
    let elapsed = recorder.current_time();
    assert!(elapsed > paused_at);

    let file = AudioFile::probe(&path)?;
    assert_eq!(file.sample_rate, 8000);
    assert_eq!(file.channels, 1);
    assert_close(file.duration, elapsed);

    Ok(())
}

#[tokio::test]
async fn test_recorder_fails_when_input_ends() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("short.wav");
    let mut recorder = WavRecorder::new(Box::new(FiniteInput { frames: 3 }));

    recorder.open(&path, &settings()).await?;
    recorder.record().await?;

    let mut waited = Duration::ZERO;
    while !matches!(recorder.status(), CaptureStatus::Failed(_)) {
        assert!(waited < Duration::from_secs(1), "recorder never failed");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    recorder.stop().await?;
    assert!(matches!(recorder.status(), CaptureStatus::Failed(_)));

    // What was captured before the failure is still a valid file
    let file = AudioFile::probe(&path)?;
    assert_close(file.duration, Duration::from_millis(60));

    Ok(())
}

#[tokio::test]
async fn test_recorder_rejects_second_open() -> Result<()> {
    let dir = TempDir::new()?;
    let mut recorder = WavRecorder::new(Box::new(SignalInput::new(Signal::Silence, settings())));

    recorder.open(&dir.path().join("a.wav"), &settings()).await?;
    assert!(recorder.open(&dir.path().join("b.wav"), &settings()).await.is_err());

    // Stopping before recording leaves an empty but valid file
    recorder.stop().await?;
    assert_eq!(AudioFile::probe(dir.path().join("a.wav"))?.duration, Duration::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_clock_player_tracks_position() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("one-second.wav");
    write_wav(&path, 8000)?;

    let mut player = ClockPlayer::new();
    let length = player.open(&path).await?;
    assert_eq!(length, Duration::from_secs(1));
    assert_eq!(player.status(), PlaybackStatus::Paused);

    player.play().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(player.position() >= Duration::from_millis(50));

    player.pause().await?;
    let paused_at = player.position();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(player.position(), paused_at);

    player.set_position(Duration::from_secs(5));
    assert_eq!(player.position(), Duration::from_secs(1));

    player.play().await?;
    assert_eq!(player.status(), PlaybackStatus::Finished);

    player.stop().await?;
    assert_eq!(player.status(), PlaybackStatus::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_clock_player_rejects_missing_file() {
    let dir = TempDir::new().unwrap();
    let mut player = ClockPlayer::new();

    assert!(player.open(&dir.path().join("missing.wav")).await.is_err());
}

#[test]
fn test_factory_rejects_out_of_band_tone() {
    let factory = AudioBackendFactory::new(AudioSource::Tone(5000.0), settings());
    assert!(factory.create_input().is_err());

    let factory = AudioBackendFactory::new(AudioSource::Tone(440.0), settings());
    assert!(factory.create_input().is_ok());
}

#[cfg(feature = "device")]
#[test]
fn test_device_source_uses_hardware_backends() -> Result<()> {
    assert_eq!(AudioSource::default(), AudioSource::Device);

    let factory = AudioBackendFactory::new(AudioSource::Device, settings());
    // Devices open lazily, so building the backends needs no hardware
    assert_eq!(factory.create_input()?.name(), "device-input");
    assert_eq!(factory.playback_backend()?.name(), "device-player");

    let factory = AudioBackendFactory::new(AudioSource::Silence, settings());
    assert_eq!(factory.playback_backend()?.name(), "clock-player");

    Ok(())
}

#[cfg(not(feature = "device"))]
#[test]
fn test_device_source_needs_device_feature() {
    assert_eq!(AudioSource::default(), AudioSource::Silence);

    let factory = AudioBackendFactory::new(AudioSource::Device, settings());
    assert!(factory.create_input().is_err());
    assert!(factory.capture_backend().is_err());
    assert!(factory.playback_backend().is_err());
}

#[tokio::test]
async fn test_record_then_play_to_completion() -> Result<()> {
    let dir = TempDir::new()?;
    let store = RecordStore::open(dir.path(), "records")?;
    let factory = Arc::new(AudioBackendFactory::new(AudioSource::Tone(440.0), settings()));
    let config = SessionConfig {
        capture: settings(),
        progress_interval: Duration::from_millis(20),
        ..SessionConfig::default()
    };
    let mut coordinator =
        SessionCoordinator::new(store.clone(), factory, Arc::new(StaticPermission(true)), config);

    coordinator.start_recording(Some("Tone".to_string())).await?;

    // Record until progress shows a fifth of a second
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), coordinator.next_event()).await?;
        match event {
            Some(SessionEvent::Progress(ProgressEvent::Recording { elapsed, level })) => {
                if elapsed >= Duration::from_millis(200) {
                    assert!(level > 0.0);
                    break;
                }
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    let record = coordinator.stop_recording(true).await?.expect("record saved");
    let duration = record.duration().unwrap_or_default();
    assert!(duration >= Duration::from_millis(200));
    assert_close(
        AudioFile::probe(store.audio_path(&record.file_reference))?.duration,
        duration,
    );

    coordinator.play(0).await?;

    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), coordinator.next_event()).await?;
        match event {
            Some(SessionEvent::Progress(ProgressEvent::Playback { position, .. })) => {
                assert!((0.0..=1.0).contains(&position));
            }
            Some(SessionEvent::Completed(done)) => {
                assert_eq!(done.record, record);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert!(coordinator.active().is_none());
    coordinator.shutdown().await;

    Ok(())
}
