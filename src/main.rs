use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use touchtalk::audio::{
    AudioChunk, AudioInput, AudioThreadHandle, InterruptSignal, PlaybackBuffer, rms,
    samples_to_wav,
};
use touchtalk::device::{DeviceClient, DeviceCommand, HttpDevice};
use touchtalk::session::EchoConnector;
use touchtalk::{Config, Daemon};

/// touchtalk - Touch-to-wake voice bridge for a desk device
#[derive(Parser)]
#[command(name = "touchtalk", version, about)]
struct Cli {
    /// Base URL of the device web server (e.g. `http://192.168.1.100`)
    #[arg(long, env = "TOUCHTALK_DEVICE_URL")]
    device_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for touch and hold a voice session while the device is awake (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Poll the device wake state once
    Status,
    /// Put the device to sleep
    Sleep,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,touchtalk=info",
        1 => "info,touchtalk=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?.with_device_url(cli.device_url);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!(
                device = config.device_url()?,
                sample_rate = config.audio.sample_rate,
                playback_capacity = config.audio.playback_capacity,
                "starting touchtalk"
            );
            let connector = Arc::new(EchoConnector::new(config.session.echo_delay));
            Daemon::new(config, connector).run().await?;
            Ok(())
        }
        Command::TestMic { duration, output } => test_mic(&config, duration, output).await,
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Status => cmd_status(&config).await,
        Command::Sleep => cmd_sleep(&config).await,
    }
}

/// Test microphone input with a level meter
async fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let audio = AudioThreadHandle::spawn(
        config.audio,
        PlaybackBuffer::new(config.audio.playback_capacity),
        InterruptSignal::new(),
    )?;
    audio.start()?;

    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    let mut recording = Vec::new();

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = audio.take_captured();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recording.extend_from_slice(&samples);
        }
    }

    audio.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, config.audio.sample_rate)?;
        std::fs::write(&path, wav)?;
        println!("\nWrote {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave streamed through the playback buffer
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = PlaybackBuffer::new(config.audio.playback_capacity);
    let audio = AudioThreadHandle::spawn(config.audio, playback.clone(), InterruptSignal::new())?;

    let sample_rate = config.audio.sample_rate;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let tone: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            // 30% volume
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", tone.len(), sample_rate);

    let frame = config.audio.frame_samples();
    for chunk in tone.chunks(frame) {
        // Stay under capacity so nothing is evicted
        while playback.len() >= playback.capacity() {
            tokio::time::sleep(config.audio.period()).await;
        }
        playback.enqueue(AudioChunk::new(chunk.to_vec()));
    }
    while !playback.is_empty() {
        tokio::time::sleep(config.audio.period()).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    audio.shutdown();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Poll the device once
async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let device = HttpDevice::from_config(&config.device)?;
    let state = device.poll().await?;

    println!("Device:          {}", device.base_url());
    println!("Awake:           {}", state.is_awake);
    println!("Wake requested:  {}", state.wake_requested);

    Ok(())
}

/// Put the device to sleep
async fn cmd_sleep(config: &Config) -> anyhow::Result<()> {
    let device = HttpDevice::from_config(&config.device)?;
    device.send_command(DeviceCommand::Sleep).await?;
    println!("Device is going to sleep");
    Ok(())
}
