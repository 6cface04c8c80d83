//! `daq_bridge` command-line entry point.
//!
//! ```bash
//! # Bridge the configured instrument (JSON lines on stdin/stdout)
//! daq_bridge --config config/mg3692c.toml run
//!
//! # Same, against a simulated instrument
//! daq_bridge --config config/mg3692c.toml run --simulate
//!
//! # Check a configuration file
//! daq_bridge --config config/lakeshore218.toml validate
//!
//! # One reading of every monitored quantity
//! daq_bridge --config config/tr71w.toml read
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use daq_bridge::app::{self, Mode};
use daq_bridge::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use daq_bridge::logging::{self, LogFormat, LoggingConfig};
use daq_bridge::relay;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;

/// Grace period for blocking work (stdin reads) when the runtime stops.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Laboratory instrument bridge
#[derive(Parser, Debug)]
#[command(name = "daq_bridge")]
#[command(about = "Bridges GPIB/LAN/HTTP instruments to a publish/subscribe topic bus")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bridge
    Run {
        /// Use a simulated instrument instead of the hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Load and validate the configuration, then print it
    Validate,

    /// Poll every monitored quantity once and print the readings
    Read {
        /// Use a simulated instrument instead of the hardware
        #[arg(long)]
        simulate: bool,
    },
}

fn mode(simulate: bool) -> Mode {
    if simulate {
        Mode::Simulated
    } else {
        Mode::Hardware
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match BridgeConfig::load_from(&args.config) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init(LoggingConfig::default().with_format(args.log_format));
            error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_from_config(&config, args.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(execute(args.command, &config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Bridge stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: &BridgeConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run { simulate } => app::run(config, mode(simulate))
            .await
            .with_context(|| format!("running {}", config.describe())),
        Commands::Validate => {
            let rendered =
                toml::to_string_pretty(config).context("rendering the effective configuration")?;
            print!("{}", rendered);
            Ok(())
        }
        Commands::Read { simulate } => {
            let readings = app::read_once(config, mode(simulate))
                .await
                .with_context(|| format!("reading {}", config.describe()))?;
            let mut stdout = std::io::stdout().lock();
            for envelope in &readings {
                stdout.write_all(relay::encode_line(envelope)?.as_bytes())?;
            }
            stdout.flush()?;
            Ok(())
        }
    }
}
