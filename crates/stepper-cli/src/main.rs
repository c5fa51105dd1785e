//! Demo command-line harness for `stepper-engine`: stands in for the
//! interactive test rig a stepper driver would be exercised with, minus
//! the interactive keypress reading. Creates motors from a `motors.cfg`
//! file, runs a bounded job or plays back a motion-profile file, and
//! reports the engine's lock-free counters once the job finishes.

mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use stepper_engine::{Direction, Engine, EngineOptions, Mode, MotorHandle, SpeedFormat};
use stepper_gpio::MockGpio;

/// CLI-facing mirror of [`SpeedFormat`] so `clap` can derive parsing for it.
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Omega,
    Freq,
    Rpm,
    Step,
}

impl From<FormatArg> for SpeedFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Omega => SpeedFormat::Omega,
            FormatArg::Freq => SpeedFormat::Freq,
            FormatArg::Rpm => SpeedFormat::Rpm,
            FormatArg::Step => SpeedFormat::Step,
        }
    }
}

#[derive(Parser)]
#[command(name = "stepper-cli", about = "Drive A4988-class stepper motors from the command line")]
struct Cli {
    /// motors.cfg listing [motor.<name>] sections.
    #[arg(long, default_value = "motors.cfg")]
    config: PathBuf,

    /// SCHED_FIFO priority for the scheduler thread.
    #[arg(long, default_value_t = stepper_engine::DEFAULT_RT_PRIORITY)]
    rt_priority: i32,

    /// CPU core to pin the scheduler thread to, best-effort.
    #[arg(long)]
    rt_core: Option<usize>,

    /// Use the real Raspberry Pi GPIO backend instead of the in-memory mock
    /// (requires the `rppal` cargo feature).
    #[arg(long)]
    rppal: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a bounded, accelerating/decelerating move on one motor.
    Run {
        motor: String,
        #[arg(long)]
        steps: u64,
        #[arg(long)]
        rpm: f64,
    },
    /// Load a motion-profile file and play it back on one motor.
    PlayDiagram {
        motor: String,
        #[arg(long)]
        profile: PathBuf,
        /// How to interpret each profile line's two fields.
        #[arg(long, value_enum, default_value = "omega")]
        format: FormatArg,
        /// Optional path to dump the diagram's plot data to.
        #[arg(long)]
        plot: Option<PathBuf>,
    },
    /// List the motors a config file defines, without running anything.
    ListMotors,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let configs = config::load_motors_cfg(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if let Command::ListMotors = cli.command {
        for m in &configs {
            println!("{}: step={} dir={} enable={}", m.name, m.pins.step, m.pins.dir, m.pins.enable);
        }
        return Ok(());
    }

    let gpio = make_gpio(cli.rppal)?;
    let engine = Engine::new(
        gpio,
        EngineOptions {
            rt_priority: cli.rt_priority,
            rt_core: cli.rt_core,
        },
    );

    let mut handles = Vec::new();
    for m in &configs {
        let handle = engine.new_motor(m.pins, m.params.steps_per_rev)?;
        engine.enable(handle.id())?;
        handles.push((m.name.clone(), handle));
    }

    match cli.command {
        Command::Run { motor, steps, rpm } => {
            let handle = find_motor(&handles, &motor)?;
            let configs_entry = configs.iter().find(|c| c.name == motor).expect("looked up above");
            engine.set_params(
                handle.id(),
                Direction::Cw,
                steps as i64,
                configs_entry.params.alpha_up,
                configs_entry.params.alpha_down,
            )?;
            engine.set_rpm(handle.id(), rpm)?;
            engine.start(handle.id())?;
            wait_for_job_ready(handle);
            report(handle);
        }
        Command::PlayDiagram { motor, profile, format, plot } => {
            let handle = find_motor(&handles, &motor)?;
            let configs_entry = configs.iter().find(|c| c.name == motor).expect("looked up above");
            let diagram =
                engine.load_diagram_from_file(&profile, configs_entry.params.steps_per_rev, format.into())?;
            if let Some(plot_path) = plot {
                engine.plot_diagram(diagram, &plot_path)?;
            }
            engine.start_md(handle.id(), diagram)?;
            wait_for_job_ready(handle);
            report(handle);
        }
        Command::ListMotors => unreachable!("handled above"),
    }

    Ok(())
}

fn make_gpio(use_rppal: bool) -> Result<Box<dyn stepper_gpio::GpioPort>> {
    if use_rppal {
        #[cfg(feature = "rppal")]
        {
            return Ok(Box::new(stepper_gpio::RppalGpio::new()?));
        }
        #[cfg(not(feature = "rppal"))]
        anyhow::bail!("built without the `rppal` feature");
    }
    Ok(Box::new(MockGpio::new()))
}

fn find_motor<'a>(handles: &'a [(String, MotorHandle)], name: &str) -> Result<&'a MotorHandle> {
    handles
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, h)| h)
        .with_context(|| format!("no motor named `{name}` in config"))
}

fn wait_for_job_ready(handle: &MotorHandle) {
    let start = Instant::now();
    while handle.mode() != Mode::JobReady && start.elapsed() < Duration::from_secs(60) {
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn report(handle: &MotorHandle) {
    println!(
        "steps={} max_latency_us={} runtime_us={}",
        handle.real_stepcount(),
        handle.max_latency_us(),
        handle.runtime_us()
    );
}
