use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use casefile_live::live::{GeminiConnector, SessionController, SessionHandle};
use casefile_live::voice::{
    AudioBackend, BAR_COUNT, BIN_COUNT, CapturePipeline, CpalBackend, Levels, PlaybackScheduler,
    levels_from_spectrum,
};
use casefile_live::Config;

/// Casefile - live voice conversation in the terminal
#[derive(Parser)]
#[command(name = "casefile", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a live voice session (default)
    Live,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test gapless speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,casefile_live=info",
        1 => "info,casefile_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Live) {
        Command::Live => live(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(&config).await,
    }
}

/// Run one live session until it ends or Ctrl-C
#[allow(clippy::future_not_send)]
async fn live(config: Config) -> anyhow::Result<()> {
    tracing::info!(model = %config.live.model, voice = %config.live.voice, "starting live session");

    let connector = GeminiConnector::new(&config.live);
    let (controller, handle) = SessionController::new(config, CpalBackend, connector);

    // Cpal streams are not Send, so the controller runs on this task
    let (_, outcome) = tokio::join!(controller.run(), render(handle));
    outcome
}

/// Draw the status line and bars until the session ends
async fn render(handle: SessionHandle) -> anyhow::Result<()> {
    let mut status = handle.status();
    let levels = handle.levels();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    handle.start_session();
    let mut started = false;

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                handle.stop_session();
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                if current.is_active() {
                    started = true;
                } else if started {
                    if let Some(fault) = current.error {
                        break Err(anyhow::anyhow!("{} ({})", fault.headline(), fault.message));
                    }
                    break Ok(());
                } else if let Some(fault) = current.error {
                    break Err(anyhow::anyhow!("{} ({})", fault.headline(), fault.message));
                }
            }
            _ = ticker.tick() => {
                let label = status.borrow().label();
                draw(label, &levels.borrow());
            }
        }
    };

    println!();
    outcome
}

fn draw(label: &str, levels: &Levels) {
    const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    let bars: String = levels
        .iter()
        .map(|&level| BLOCKS[usize::from(level.min(99)) * BLOCKS.len() / 100])
        .collect();

    print!("\r{bars}  {label:<28}");
    let _ = std::io::stdout().flush();
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (blocks_tx, mut blocks_rx) = tokio::sync::mpsc::unbounded_channel::<usize>();
    let mut capture = CapturePipeline::start(
        &CpalBackend,
        config.audio.capture_sample_rate,
        config.audio.block_size,
        move |block| {
            let _ = blocks_tx.send(block.len());
        },
    )?;
    let analyzer = capture.analyzer();

    println!(
        "Sample rate: {} Hz, block size: {}",
        config.audio.capture_sample_rate, config.audio.block_size
    );
    println!("---");

    let mut bins = [0u8; BIN_COUNT];
    let mut blocks = 0usize;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        while blocks_rx.try_recv().is_ok() {
            blocks += 1;
        }

        let Some(analyzer) = analyzer.upgrade() else {
            break;
        };
        if let Ok(mut analyzer) = analyzer.lock() {
            analyzer.byte_frequency_data(&mut bins);
        }
        let levels = levels_from_spectrum(&bins);

        let bars: Vec<String> = levels.iter().map(|l| format!("{l:3}")).collect();
        println!("[{:2}s] blocks: {blocks:4} | {}", i + 1, bars.join(" "));
    }

    capture.stop();

    println!("\n---");
    println!("Each row shows {BAR_COUNT} bars between 10 (silent) and 100.");
    println!("If the bars stayed at 10, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a tone split into back-to-back chunks
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let sample_rate = config.audio.output_sample_rate;
    let sink = CpalBackend.open_output(sample_rate, std::sync::Arc::new(|_| {}))?;
    let mut playback = PlaybackScheduler::new(sink, sample_rate);

    let frequency = 440.0_f32;
    let chunk_len = sample_rate as usize / 10;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..chunk_len * 20)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    for chunk in tone.chunks(chunk_len) {
        if let Some(scheduled) = playback.enqueue_samples(chunk.to_vec()) {
            tracing::debug!(start = scheduled.start, duration = scheduled.duration, "chunk scheduled");
        }
    }

    println!("Scheduled {} chunks ending at {:.2}s", 20, playback.running_clock());

    tokio::time::sleep(Duration::from_secs_f64(playback.running_clock() + 0.3)).await;
    playback.teardown();

    println!("\n---");
    println!("If you heard clicks between chunks, scheduling is not gapless.");
    println!("If you heard nothing, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
