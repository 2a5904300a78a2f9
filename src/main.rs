use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hark::audio::{
    AudioBackend, CpalBackend, DeviceConfig, DevicePreference, DeviceSelector, NotificationTone,
    StreamHandle, select_playback,
};
use hark::{Config, assistant};

/// Hark - voice-activated personal assistant
#[derive(Parser)]
#[command(name = "hark", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.config/hark/config.toml)
    #[arg(short, long, env = "HARK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// List audio input devices and the one that would be used
    Devices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hark=info",
        1 => "info,hark=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Devices => list_devices(&config),
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    tracing::info!(
        keywords = config.detector.keyword_paths.len(),
        stt = ?config.stt.provider,
        tts = ?config.tts.provider,
        "starting hark"
    );

    let mut shutdown = assistant::ctrl_c_shutdown();
    assistant::run(&config, &mut shutdown).await?;

    Ok(())
}

/// Print every device the host reports
fn list_devices(config: &Config) -> anyhow::Result<()> {
    let backend = CpalBackend::new();
    let devices = backend.input_devices()?;

    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    println!("Audio devices:");
    for device in &devices {
        let marker = if device.is_input_capable() { " " } else { "x" };
        println!("  {marker} {device}");
    }

    let selector = DeviceSelector::new(config.audio.input_device.clone(), false);
    match selector.select(&devices) {
        Ok(chosen) => println!("\nSelected: [{}] {}", chosen.index, chosen.name),
        Err(e) => println!("\nNo usable input device: {e}"),
    }
    if config.audio.input_device != DevicePreference::FirstInput {
        println!("(preference: {:?})", config.audio.input_device);
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    let backend = CpalBackend::new().with_read_timeout(config.audio.read_timeout);
    let devices = backend.input_devices()?;
    let selector = DeviceSelector::new(config.audio.input_device.clone(), false);
    let info = selector.select(&devices)?;

    let sample_rate = info.default_sample_rate;
    let device = DeviceConfig {
        device_index: info.index,
        device_name: info.name.clone(),
        sample_rate,
        frame_length: usize::try_from(sample_rate)?,
    };

    println!("Testing microphone \"{}\" for {duration} seconds...", info.name);
    println!("Speak into your microphone!\n");
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut stream = StreamHandle::open(&backend, &device);
    if !stream.is_open() {
        anyhow::bail!(
            "failed to open input: {}",
            stream.fault_reason().unwrap_or("unknown")
        );
    }

    for i in 0..duration {
        let frame = stream.read(device.frame_length).await?;
        let energy = frame.energy();
        let peak = frame
            .samples()
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0);

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
    }

    stream.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: hark devices");
    println!("  3. Set HARK_INPUT_DEVICE to a device index or name");

    Ok(())
}

/// Test speaker output with the notification tone
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear three short beeps\n");

    let mut playback = select_playback(config.playback)?;
    println!("Using {} playback", playback.name());

    let tone = NotificationTone::default();
    let samples = tone.render();
    for _ in 0..3 {
        playback.play_pcm(&samples, tone.sample_rate).await?;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    println!("\n---");
    println!("If you heard the beeps, your speakers are working!");
    println!("If not, try HARK_PLAYBACK=command or HARK_PLAYBACK=cpal");

    Ok(())
}

/// Test TTS output
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = assistant::build_synthesizer(&config.tts)?;

    println!("Synthesizing speech...");
    let audio = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of {:?} audio", audio.data.len(), audio.format);

    println!("Playing audio...");
    let mut playback = select_playback(config.playback)?;
    playback.play_speech(&audio).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
