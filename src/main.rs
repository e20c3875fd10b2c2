//! Demo host binary for the live-coding music engine runtime
//!
//! Loads a schedule from disk, plays it through either a real MIDI port or a discarding sink, and
//! runs the poll loop until playback finishes or the user presses `q`. This binary is a thin
//! demonstration of [`concordia::runtime::Runtime`]; the embedded language backend, editor, and
//! UI host it is meant to sit behind are out of scope here.

use std::io::BufReader;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event as TermEvent, KeyCode};
use crossterm::terminal;

use concordia::dispatch::NullBufferLookup;
use concordia::dispatch::NullCallbackRuntime;
use concordia::event::Schedule;
use concordia::interpreter::NullInterpreter;
use concordia::runtime::Runtime;
use concordia::sink::{MidiSink, NullSink, Sink};
use concordia::version::Version;

/// Path to the cache location, based on OS convention.
fn log_path() -> std::path::PathBuf {
    let path = dirs::cache_dir()
        .expect("documentation states that this function should work on all platforms")
        .join("concordia");
    std::fs::create_dir_all(&path).unwrap();
    path
}

#[derive(Parser, Debug)]
#[command(version = format!("{}", Version::default()))]
/// Plays a bson-encoded schedule through the concordia runtime
struct Cli {
    /// Path to a bson-encoded schedule file
    schedule: std::path::PathBuf,

    /// Rendering backend to use
    #[arg(long, value_enum, default_value_t = SinkKind::Midi)]
    sink: SinkKind,

    /// Name (substring) of the MIDI output port to open, when `--sink midi`
    #[arg(long)]
    midi_port: Option<String>,

    /// Don't start network tempo sync
    #[arg(long)]
    disable_link: bool,

    /// Tempo to start network sync at, in BPM
    #[arg(long, default_value_t = 120.0)]
    initial_tempo: f64,

    /// Disable colors. Overwrites NO_COLOR environment variable
    #[arg(long = "no-color", default_value_t = false)]
    disable_colors: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum SinkKind {
    /// Real MIDI output port.
    Midi,
    /// Discards every event; useful for timing tests without a MIDI device attached.
    Null,
}

/// Initialize logging: colored console output plus a daily-rotating plain log file.
fn setup_logging_system(cli: &Cli) -> tracing_appender::non_blocking::WorkerGuard {
    let log_file_appender = tracing_appender::rolling::daily(log_path(), "logs");
    let (log_file_appender, guard) = tracing_appender::non_blocking(log_file_appender);

    // https://no-color.org/
    let disable_colors = cli.disable_colors
        || std::env::var("NO_COLOR")
            .map(|x| !x.is_empty())
            .unwrap_or(false);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concordia=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!disable_colors)
                .and_then(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(log_file_appender),
                ),
        )
        .init();
    guard
}

/// Build the rendering backend requested on the command line.
fn build_sink(cli: &Cli) -> anyhow::Result<Box<dyn Sink + Send>> {
    match cli.sink {
        SinkKind::Null => Ok(Box::new(NullSink)),
        SinkKind::Midi => {
            let output = midir::MidiOutput::new("concordia").context("opening midi client")?;
            let ports = output.ports();
            let port = match &cli.midi_port {
                Some(name) => ports
                    .iter()
                    .find(|p| {
                        output
                            .port_name(p)
                            .map(|n| n.contains(name.as_str()))
                            .unwrap_or(false)
                    })
                    .context("no midi port matched --midi-port")?,
                None => ports.first().context("no midi output ports available")?,
            };
            let connection = output
                .connect(port, "concordia")
                .context("connecting to midi port")?;
            Ok(Box::new(MidiSink::new(connection)))
        }
    }
}

/// Load a schedule from a bson file on disk.
fn load_schedule(path: &std::path::Path) -> anyhow::Result<Schedule> {
    let file = std::fs::File::open(path).context("opening schedule file")?;
    let schedule: Schedule =
        bson::from_reader(BufReader::new(file)).context("decoding schedule as bson")?;
    Ok(schedule)
}

/// Poll for a `q` keypress without blocking. Used to allow early exit from the terminal.
fn quit_requested() -> bool {
    match event::poll(Duration::from_millis(0)) {
        Ok(true) => matches!(
            event::read(),
            Ok(TermEvent::Key(key)) if key.code == KeyCode::Char('q')
        ),
        _ => false,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = setup_logging_system(&cli);

    tracing::info!("starting up version {}", Version::default());

    let schedule = match load_schedule(&cli.schedule) {
        Ok(schedule) => schedule,
        Err(err) => {
            tracing::error!("failed to load schedule: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let sink = match build_sink(&cli) {
        Ok(sink) => sink,
        Err(err) => {
            tracing::error!("failed to open sink: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = Runtime::new();
    if !cli.disable_link {
        if let Err(err) = runtime.enable_tempo_sync(cli.initial_tempo) {
            tracing::warn!("tempo sync init failed: {err}");
        }
    }

    let slot = match runtime.engine.play(schedule, sink) {
        Ok(slot) => slot,
        Err(err) => {
            tracing::error!("failed to start playback: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("playing, press q to stop early");
    let raw_mode = terminal::enable_raw_mode().is_ok();

    let mut interpreter = NullInterpreter;
    let mut callbacks = NullCallbackRuntime;
    let buffers = NullBufferLookup;

    loop {
        runtime.poll(&mut interpreter, &mut callbacks, &buffers);
        if !runtime.engine.is_slot_playing(slot) {
            break;
        }
        if raw_mode && quit_requested() {
            runtime.engine.stop(slot);
            runtime.engine.wait(slot, 1000);
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    if raw_mode {
        let _ = terminal::disable_raw_mode();
    }

    tracing::info!("playback finished");
    ExitCode::SUCCESS
}
