use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use mic_visualiser_core::{
    default_input_device_name, event_callback, list_input_devices, AppConfig, AudioBuffer,
    AudioProcessingContext, CaptureSource, DeviceVisualizer, EventKind, FrameGraph, MicVizError,
    Renderer, ResolvingCaptureSource, SyntheticCaptureSource, VisualizerEvent, VisualizerParams,
    WaveformCanvas,
};
use tracing_subscriber::EnvFilter;

const SYNTHETIC_SAMPLE_RATE: u32 = 48_000;
const TICK: Duration = Duration::from_millis(20);

fn main() -> mic_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Devices => run_devices(),
    }
}

fn run_live(args: LiveArgs) -> mic_visualiser_core::Result<()> {
    let config = load_config(&args)?;
    let run_for = seconds(args.seconds)?;
    let toggle_every = args.toggle_every.map(seconds).transpose()?;
    tracing::info!(?config, "starting live mode");

    let (capture, synthetic): (Arc<dyn CaptureSource>, Option<Arc<SyntheticCaptureSource>>) =
        if config.capture.synthetic {
            let source = Arc::new(SyntheticCaptureSource::new(
                SYNTHETIC_SAMPLE_RATE,
                u16::from(config.visualizer.number_of_input_channels.unwrap_or(1)),
                config.capture.synthetic_frequency_hz,
            ));
            (source.clone() as Arc<dyn CaptureSource>, Some(source))
        } else {
            (
                Arc::new(ResolvingCaptureSource::system(config.capture.device.clone()))
                    as Arc<dyn CaptureSource>,
                None,
            )
        };

    let renderer = Arc::new(TerminalRenderer::new(config.display.width));
    let params = VisualizerParams::new(renderer)
        .with_capture(capture)
        .with_options(config.visualizer);
    let mut visualizer = DeviceVisualizer::init(params)?;

    visualizer.on(
        EventKind::DeviceReady,
        event_callback(|event| {
            if let VisualizerEvent::DeviceReady(stream) = event {
                tracing::info!(stream = stream.id(), "listening");
            }
        }),
    );
    visualizer.on(
        EventKind::DeviceError,
        event_callback(|event| {
            if let VisualizerEvent::DeviceError(error) = event {
                tracing::error!(%error, "could not open an input device");
            }
        }),
    );

    visualizer.toggle_play()?;

    let frames_per_tick =
        (SYNTHETIC_SAMPLE_RATE as u128 * TICK.as_millis() / 1_000) as usize;
    let deadline = Instant::now() + run_for;
    let mut last_toggle = Instant::now();

    while Instant::now() < deadline {
        visualizer.process_pending();
        if let Some(source) = &synthetic {
            source.pump(frames_per_tick);
        }

        if let Some(every) = toggle_every {
            if last_toggle.elapsed() >= every {
                visualizer.toggle_play()?;
                tracing::info!(state = ?visualizer.state(), "toggled playback");
                last_toggle = Instant::now();
            }
        }

        thread::sleep(TICK);
    }

    visualizer.destroy();
    tracing::info!("live mode finished");
    Ok(())
}

fn run_devices() -> mic_visualiser_core::Result<()> {
    let default = default_input_device_name();
    for name in list_input_devices()? {
        let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

fn load_config(args: &LiveArgs) -> mic_visualiser_core::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if args.device.is_some() {
        config.capture.device = args.device.clone();
    }
    if args.synthetic {
        config.capture.synthetic = true;
    }
    if args.buffer_size.is_some() {
        config.visualizer.buffer_size = args.buffer_size;
    }
    if args.input_channels.is_some() {
        config.visualizer.number_of_input_channels = args.input_channels;
    }
    if args.output_channels.is_some() {
        config.visualizer.number_of_output_channels = args.output_channels;
    }

    Ok(config)
}

fn seconds(value: f64) -> mic_visualiser_core::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| MicVizError::config(format!("invalid duration {value}: {e}")))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Draws each frame as one line of block characters.
struct TerminalRenderer {
    canvas: WaveformCanvas,
}

impl TerminalRenderer {
    fn new(width: usize) -> Self {
        Self {
            canvas: WaveformCanvas::new(Arc::new(FrameGraph::default()), width),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn audio_context(&self) -> Arc<dyn AudioProcessingContext> {
        self.canvas.audio_context()
    }

    fn empty(&self) {
        self.canvas.empty();
    }

    fn load_decoded_buffer(&self, buffer: &AudioBuffer) {
        self.canvas.load_decoded_buffer(buffer);

        let snapshot = self.canvas.snapshot();
        let line: String = snapshot
            .peaks
            .iter()
            .map(|peak| level_glyph(peak.max.abs().max(peak.min.abs())))
            .collect();
        match snapshot.summary {
            Some(summary) => println!(
                "{line} rms {:.3} centroid {:>7.1} Hz",
                summary.rms, summary.spectral_centroid_hz
            ),
            None => println!("{line}"),
        }
    }
}

fn level_glyph(level: f32) -> char {
    const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let index = (level.clamp(0.0, 1.0) * (GLYPHS.len() - 1) as f32).round() as usize;
    GLYPHS[index]
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Live microphone waveform visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture from an input device and draw every frame.
    Live(LiveArgs),
    /// List the input devices of the default audio host.
    Devices,
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Input device name. Defaults to the host's default input.
    #[arg(short, long)]
    device: Option<String>,
    /// Sample-frames per delivered frame.
    #[arg(long)]
    buffer_size: Option<u32>,
    #[arg(long)]
    input_channels: Option<u8>,
    #[arg(long)]
    output_channels: Option<u8>,
    /// How long to run before shutting down.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    /// Pause or resume every N seconds.
    #[arg(long)]
    toggle_every: Option<f64>,
    /// Use a generated tone instead of a microphone.
    #[arg(long)]
    synthetic: bool,
}
