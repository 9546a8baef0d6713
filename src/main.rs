use anyhow::{Context, Result};
use audio_notes::{
    format_clock, AudioBackendFactory, AudioSource, Config, Intent, IntentOutcome, ProgressEvent,
    RecordStore, SessionConfig, SessionCoordinator, SessionEvent, StaticPermission,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "audio-notes", version, about = "Record, list and play short audio notes")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/audio-notes")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored notes, newest first
    List,
    /// Record a note from the microphone
    Record {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
        /// Record a generated tone at this frequency in Hz instead
        #[arg(long)]
        tone: Option<f32>,
    },
    /// Play the note at INDEX
    Play { index: usize },
    /// Delete the note at INDEX
    Delete { index: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Audio Notes v{}", env!("CARGO_PKG_VERSION"));

    let store = RecordStore::from_config(&cfg.storage)?;
    let session_config = SessionConfig::from(&cfg);

    let source = match &cli.command {
        Command::Record { tone: Some(hz), .. } => AudioSource::Tone(*hz),
        _ => AudioSource::default(),
    };
    let factory = Arc::new(AudioBackendFactory::new(source, session_config.capture.clone()));
    let mut coordinator =
        SessionCoordinator::new(store, factory, Arc::new(StaticPermission(true)), session_config);

    let result = match cli.command {
        Command::List => {
            list(&coordinator);
            Ok(())
        }
        Command::Record { name, seconds, .. } => record(&mut coordinator, name, seconds).await,
        Command::Play { index } => play(&mut coordinator, index).await,
        Command::Delete { index } => match coordinator.handle(Intent::Delete { index }).await? {
            IntentOutcome::Deleted(record) => {
                println!("Deleted \"{}\"", record.name);
                Ok(())
            }
            _ => Ok(()),
        },
    };

    coordinator.shutdown().await;

    result
}

fn list(coordinator: &SessionCoordinator) {
    let records = coordinator.records();
    if records.is_empty() {
        println!("No notes yet");
        return;
    }

    for (index, record) in records.iter().enumerate() {
        let duration = record.duration().map(format_clock).unwrap_or_default();
        println!(
            "{:>3}  {:<24} {}  {}",
            index,
            record.name,
            record.created_at.format("%Y-%m-%d %H:%M"),
            duration
        );
    }
}

async fn record(coordinator: &mut SessionCoordinator, name: String, seconds: f64) -> Result<()> {
    let length = Duration::try_from_secs_f64(seconds).context("Invalid recording length")?;

    coordinator
        .handle(Intent::StartRecording { name: Some(name) })
        .await?;
    println!("Recording for {}... (Ctrl-C to discard)", format_clock(length));

    let deadline = tokio::time::sleep(length);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                coordinator.handle(Intent::StopRecording { commit: false }).await?;
                println!("\nDiscarded");
                return Ok(());
            }
            event = coordinator.next_event() => match event {
                Some(SessionEvent::Progress(ProgressEvent::Recording { elapsed, level })) => {
                    let bar = "#".repeat((level * 20.0).round() as usize);
                    println!("{}  {:<20}", format_clock(elapsed), bar);
                }
                Some(SessionEvent::Error(error)) => anyhow::bail!(error.message),
                _ => {}
            }
        }
    }

    match coordinator
        .handle(Intent::StopRecording { commit: true })
        .await?
    {
        IntentOutcome::Saved(Some(record)) => println!(
            "Saved \"{}\" ({})",
            record.name,
            record.duration().map(format_clock).unwrap_or_default()
        ),
        _ => println!("Nothing saved"),
    }

    Ok(())
}

async fn play(coordinator: &mut SessionCoordinator, index: usize) -> Result<()> {
    coordinator.handle(Intent::Play { index }).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                coordinator.handle(Intent::StopPlayback).await?;
                println!("\nStopped");
                return Ok(());
            }
            event = coordinator.next_event() => match event {
                Some(SessionEvent::Progress(ProgressEvent::Playback { elapsed, position, remaining })) => {
                    println!(
                        "{}  {:>3.0}%  -{}",
                        format_clock(elapsed),
                        position * 100.0,
                        format_clock(remaining)
                    );
                }
                Some(SessionEvent::Completed(done)) => {
                    println!("Finished \"{}\"", done.record.name);
                    return Ok(());
                }
                Some(SessionEvent::Error(error)) => anyhow::bail!(error.message),
                _ => {}
            }
        }
    }
}
