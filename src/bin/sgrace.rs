use clap::{App, Arg, ArgMatches};
use colored::*;
use sgrace::coordinator::RunSummary;
use sgrace::report;
use sgrace::{Coordinator, HarnessConfig, HarnessError, SharedState, SimulatedDevice, SimulationConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{warn, Level};

const DEFAULT_MODEL: &str = "scsi_debug";
const EXIT_STARTUP_FAILURE: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// What the n-th interrupt (1-based) of a run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Ask every task to wind down and let the run finish its shutdown.
    Stop,
    /// Shutdown is stuck (e.g. a worker blocked in `SG_IO`); leave now.
    Exit,
}

fn interrupt_action(received: u32) -> InterruptAction {
    if received <= 1 {
        InterruptAction::Stop
    } else {
        InterruptAction::Exit
    }
}

#[tokio::main]
async fn main() {
    let matches = App::new("sgrace")
        .version("0.1.0")
        .author("Storage Test Engineering Team")
        .about("Hammer a SCSI generic device and watch /proc/scsi/sg/debug for bogus elapsed times")
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .value_name("PATH")
                .help("sg node to drive (default: discover by model)")
                .takes_value(true)
                .conflicts_with("simulate"),
        )
        .arg(
            Arg::with_name("model")
                .short("m")
                .long("model")
                .value_name("NAME")
                .help("SCSI model string used to discover the sg node")
                .takes_value(true)
                .default_value(DEFAULT_MODEL),
        )
        .arg(
            Arg::with_name("simulate")
                .long("simulate")
                .help("Drive an in-process simulated device instead of real hardware"),
        )
        .arg(
            Arg::with_name("bogus-every")
                .long("bogus-every")
                .value_name("N")
                .help("With --simulate: plant a bogus elapsed time in every Nth feed snapshot")
                .takes_value(true)
                .requires("simulate")
                .validator(is_number::<u64>),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON config file; flags override its values")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("workers")
                .short("w")
                .long("workers")
                .value_name("N")
                .help("Number of concurrent I/O workers")
                .takes_value(true)
                .validator(is_number::<usize>),
        )
        .arg(
            Arg::with_name("iterations")
                .short("n")
                .long("iterations")
                .value_name("K")
                .help("Feed snapshots to take before stopping")
                .takes_value(true)
                .validator(is_number::<u64>),
        )
        .arg(
            Arg::with_name("threshold")
                .short("t")
                .long("threshold")
                .value_name("MS")
                .help("Elapsed times above this are flagged")
                .takes_value(true)
                .validator(is_number::<i64>),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("PATH")
                .help("Bug log file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Summary format")
                .takes_value(true)
                .possible_values(&["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_max_level(if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let coordinator = match load_config(&matches).and_then(Coordinator::new) {
        Ok(coordinator) => coordinator,
        Err(e) => exit_startup_failure(&e),
    };
    install_interrupt_handler(coordinator.state());

    let result = if matches.is_present("simulate") {
        report::print_banner("simulated sg device", coordinator.config());
        let simulation = SimulationConfig {
            bogus_every: parse_arg::<u64>(&matches, "bogus-every").ok().flatten(),
            ..SimulationConfig::default()
        };
        coordinator.run(move || Ok(SimulatedDevice::new(simulation))).await
    } else {
        let target = matches.value_of("device").unwrap_or("auto-discover");
        report::print_banner(target, coordinator.config());
        run_sg(coordinator, &matches).await
    };

    match result {
        Ok(summary) => {
            print_summary(&summary, matches.value_of("format").unwrap_or("text"));
            std::process::exit(summary.verdict.exit_code());
        }
        Err(e) => exit_startup_failure(&e),
    }
}

#[cfg(target_os = "linux")]
async fn run_sg(coordinator: Coordinator, matches: &ArgMatches<'_>) -> sgrace::Result<RunSummary> {
    use sgrace::device::ScsiGenericDevice;

    let node = match matches.value_of("device") {
        Some(path) => PathBuf::from(path),
        None => ScsiGenericDevice::discover(matches.value_of("model").unwrap_or(DEFAULT_MODEL))?,
    };
    coordinator.run(move || ScsiGenericDevice::acquire(node)).await
}

#[cfg(not(target_os = "linux"))]
async fn run_sg(_coordinator: Coordinator, _matches: &ArgMatches<'_>) -> sgrace::Result<RunSummary> {
    Err(HarnessError::ResourceUnavailable(
        "SCSI generic devices are only supported on Linux; use --simulate".into(),
    ))
}

fn load_config(matches: &ArgMatches<'_>) -> sgrace::Result<HarnessConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => HarnessConfig::from_json_file(Path::new(path))?,
        None => HarnessConfig::default(),
    };

    if let Some(workers) = parse_arg(matches, "workers")? {
        config.workers = workers;
    }
    if let Some(iterations) = parse_arg(matches, "iterations")? {
        config.max_iterations = iterations;
    }
    if let Some(threshold) = parse_arg(matches, "threshold")? {
        config.anomaly_threshold_ms = threshold;
    }
    if let Some(log) = matches.value_of("log") {
        config.bug_log_path = PathBuf::from(log);
    }
    Ok(config)
}

fn parse_arg<T: FromStr>(matches: &ArgMatches<'_>, name: &str) -> sgrace::Result<Option<T>> {
    matches
        .value_of(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| HarnessError::Config(format!("--{}: invalid value {:?}", name, value)))
        })
        .transpose()
}

fn is_number<T: FromStr>(value: String) -> Result<(), String> {
    value
        .parse::<T>()
        .map(|_| ())
        .map_err(|_| format!("{:?} is not a valid number", value))
}

fn install_interrupt_handler(state: Arc<SharedState>) {
    tokio::spawn(async move {
        let mut received = 0;
        loop {
            wait_for_interrupt().await;
            received += 1;
            match interrupt_action(received) {
                InterruptAction::Stop => {
                    println!(
                        "\n{}",
                        "Interrupt received, stopping workers... (interrupt again to exit now)".yellow()
                    );
                    warn!("interrupt received; requesting stop");
                    state.request_stop();
                }
                InterruptAction::Exit => {
                    eprintln!("{}", "Second interrupt, exiting without cleanup".red());
                    warn!("second interrupt; exiting immediately");
                    std::process::exit(EXIT_INTERRUPTED);
                }
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot watch SIGTERM; only Ctrl+C will stop the run");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_summary(summary: &RunSummary, format: &str) {
    match format {
        "json" => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "could not serialize summary"),
        },
        _ => report::print_summary(summary),
    }
}

fn exit_startup_failure(error: &HarnessError) -> ! {
    eprintln!("{} {}", "❌".red(), error.to_string().bright_red());
    if matches!(error, HarnessError::ResourceUnavailable(_)) {
        eprintln!(
            "{} Load scsi_debug first, e.g. {}",
            "💡".yellow(),
            "modprobe scsi_debug ptype=1 delay=1000 ndelay=500000 max_luns=1 num_tgts=1".bright_cyan()
        );
        eprintln!("   or try {}", "sgrace --simulate".bright_cyan());
    }
    std::process::exit(EXIT_STARTUP_FAILURE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_stops_second_exits() {
        assert_eq!(interrupt_action(1), InterruptAction::Stop);
        assert_eq!(interrupt_action(2), InterruptAction::Exit);
        assert_eq!(interrupt_action(5), InterruptAction::Exit);
    }
}
