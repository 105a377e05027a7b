//! haptic-synth: play MIDI files or a live MIDI input on haptic motors.

use clap::{Parser, ValueEnum};
use haptic_synth::midi::{stop_channel, ParsedMidiFile, StopSignal};
use haptic_synth::output::{LogTransport, Transport};
use haptic_synth::voice::AllocatorPolicy;
use haptic_synth::{
    run_file, run_tune, Error, Mode, ReleaseClock, Result, RunReport, Session, SynthConfig,
    DEFAULT_MOTORS_PER_DEVICE, RELEASE_CLOCK_INTERVAL,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Play MIDI on the haptic motors of one or more devices
#[derive(Parser, Debug)]
#[command(name = "haptic-synth")]
#[command(version)]
struct Cli {
    /// MIDI file to play (omit to play from a live MIDI input)
    #[arg(short, long, conflicts_with = "tune")]
    file: Option<PathBuf>,

    /// Step the first motor through every note, one per Enter press
    #[arg(long)]
    tune: bool,

    /// Advance the tuning sweep automatically after this many milliseconds
    #[arg(long, requires = "tune", value_name = "MS")]
    tune_step_ms: Option<u64>,

    /// Voice allocation for file playback; live play always uses polyphony
    #[arg(short, long, value_enum, default_value_t = Logic::Polyphony)]
    logic: Logic,

    /// Number of devices to drive when no serial ports are given
    #[arg(short = 'n', long, default_value_t = 1)]
    devices: usize,

    /// Serial port of a device; repeat once per device
    #[arg(short, long = "serial", value_name = "PATH")]
    serial: Vec<String>,

    /// Motors on each device
    #[arg(long, default_value_t = DEFAULT_MOTORS_PER_DEVICE)]
    motors: u8,

    /// MIDI input port for live play (index or part of the name)
    #[arg(short, long)]
    port: Option<String>,

    /// Time a released note keeps its motor, in milliseconds
    #[arg(long, default_value_t = 5)]
    release_ms: u64,

    /// Minimum spacing of writes to one device, in milliseconds
    #[arg(long, default_value_t = 10)]
    min_interval_ms: u64,

    /// Drive wired Steam Controllers over USB; -n picks how many
    #[arg(long, conflicts_with = "serial")]
    usb: bool,

    /// Log motor updates instead of writing to devices
    #[arg(long)]
    dry_run: bool,

    /// List MIDI inputs, serial ports and controllers, then exit
    #[arg(long)]
    list_ports: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Logic {
    Polyphony,
    #[value(name = "single_voice")]
    SingleVoice,
}

impl From<Logic> for AllocatorPolicy {
    fn from(logic: Logic) -> Self {
        match logic {
            Logic::Polyphony => AllocatorPolicy::Polyphony,
            Logic::SingleVoice => AllocatorPolicy::SingleVoice,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if cli.list_ports {
        list_ports();
        return Ok(());
    }

    let config = SynthConfig {
        policy: cli.logic.into(),
        devices: cli.devices,
        device_paths: cli.serial.clone(),
        input_port: cli.port.clone(),
        file: cli.file.clone(),
        tune: cli.tune,
        release_tail_ms: cli.release_ms,
        min_update_interval_ms: cli.min_interval_ms,
        motors_per_device: cli.motors,
        ..Default::default()
    }
    .resolve()?;

    let transport = transport(&cli)?;
    let session = Arc::new(Session::builder(transport).config(&config).build()?);
    let clock = ReleaseClock::start(Arc::clone(&session), RELEASE_CLOCK_INTERVAL)?;

    let (stop, signal) = stop_channel();
    if let Err(e) = ctrlc::set_handler(move || stop.stop()) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    let result = match &config.mode {
        Mode::File(path) => ParsedMidiFile::load(path)
            .map_err(Error::from)
            .map(|file| run_file(&session, &file, signal)),
        Mode::Live { port } => live(&session, port.as_deref(), signal),
        Mode::Tune => Ok(tune(&session, cli.tune_step_ms, signal)),
    };

    clock.stop();
    session.shutdown();

    let report = result?;
    info!(
        events = report.events,
        notes = report.notes,
        stolen = report.stolen,
        dropped = report.dropped,
        stopped = report.stopped,
        "Done"
    );
    Ok(())
}

fn transport(cli: &Cli) -> Result<Arc<dyn Transport>> {
    if cli.dry_run {
        return Ok(Arc::new(LogTransport));
    }
    if cli.usb {
        return usb_transport();
    }
    if cli.serial.is_empty() {
        warn!("No serial ports given; logging motor updates instead");
        return Ok(Arc::new(LogTransport));
    }

    #[cfg(feature = "serial")]
    {
        Ok(Arc::new(haptic_synth::output::SerialTransport::default()))
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(Error::InvalidConfig(
            "serial devices require the `serial` feature".to_string(),
        ))
    }
}

#[cfg(feature = "usb")]
fn usb_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(haptic_synth::output::SteamControllerTransport::new()))
}

#[cfg(not(feature = "usb"))]
fn usb_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::InvalidConfig(
        "USB controllers require the `usb` feature".to_string(),
    ))
}

/// Without a step interval each note waits for Enter; end of input stops.
fn tune(session: &Session, step_ms: Option<u64>, signal: StopSignal) -> RunReport {
    match step_ms {
        Some(ms) => run_tune(session, signal, |_, stop| {
            !stop.wait(Duration::from_millis(ms))
        }),
        None => {
            let stdin = std::io::stdin();
            let mut lines = stdin.lock().lines();
            println!("Press Enter for the next note");
            run_tune(session, signal, |_, stop| {
                matches!(lines.next(), Some(Ok(_))) && !stop.is_stopped()
            })
        }
    }
}

#[cfg(feature = "midi-io")]
fn live(session: &Session, port: Option<&str>, signal: StopSignal) -> Result<RunReport> {
    let input = haptic_synth::midi::LiveInput::open(port)?;
    haptic_synth::run_live(session, &input, signal)
}

#[cfg(not(feature = "midi-io"))]
fn live(_session: &Session, _port: Option<&str>, _signal: StopSignal) -> Result<RunReport> {
    Err(Error::LiveInputUnavailable)
}

fn list_ports() {
    #[cfg(feature = "midi-io")]
    {
        let inputs = haptic_synth::midi::list_input_ports();
        if inputs.is_empty() {
            println!("No MIDI inputs found");
        }
        for input in inputs {
            println!("midi  {}: {}", input.index, input.name);
        }
    }

    #[cfg(feature = "serial")]
    {
        match haptic_synth::output::SerialTransport::usb_ports() {
            Ok(ports) if ports.is_empty() => println!("No USB serial ports found"),
            Ok(ports) => {
                for port in ports {
                    println!("serial  {port}");
                }
            }
            Err(e) => warn!("Could not list serial ports: {e}"),
        }
    }

    #[cfg(feature = "usb")]
    {
        match haptic_synth::output::SteamControllerTransport::list() {
            Ok(found) if found.is_empty() => println!("No Steam Controllers found"),
            Ok(found) => {
                for location in found {
                    println!("usb  {location}");
                }
            }
            Err(e) => warn!("Could not list USB devices: {e}"),
        }
    }
}
