use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use linkstress::campaign::{format_summary, CampaignPlan};
use linkstress::config::{Backend, BaudRate, HarnessConfig, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "linkstress",
    about = "Serial link stress tester: finds dropped bytes between paired ports",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stress campaign
    Run(RunArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Seconds each session transmits for
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    duration_sec: u64,

    /// Line speed: 50, 75, 110, 300, 600, 1200, 9600, 14400, 19200, 28800,
    /// 57600, 115200 or 230400
    baudrate: BaudRate,

    /// Log every chunk and compare sent and received content after each session
    #[arg(long)]
    detailed_logging: bool,

    /// Number of sessions to run
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,

    /// Keep running sessions until one fails
    #[arg(long)]
    continuous: bool,

    /// Config file (default: $LINKSTRESS_CONFIG, then /etc/linkstress/linkstress.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// DUT port, repeat for each pair (replaces the configured list)
    #[arg(long = "dut")]
    dut: Vec<String>,

    /// AUX port, repeat for each pair (replaces the configured list)
    #[arg(long = "aux")]
    aux: Vec<String>,

    /// Port backend
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// JSON output for machine parsing
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        /// Config file to load instead of the default locations
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(path),
        None => Ok(HarnessConfig::load_or_default()),
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level: {}", logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path.display()))?;
            let writer = Mutex::new(file);
            if logging.json {
                builder.json().with_ansi(false).with_writer(writer).init();
            } else {
                builder.with_ansi(false).with_writer(writer).init();
            }
        }
        None => {
            if logging.json {
                builder.json().with_writer(std::io::stderr).init();
            } else {
                builder.with_writer(std::io::stderr).init();
            }
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if !args.dut.is_empty() {
        config.ports.dut = args.dut;
    }
    if !args.aux.is_empty() {
        config.ports.aux = args.aux;
    }
    if let Some(backend) = args.backend {
        config.ports.backend = backend;
    }
    if args.detailed_logging {
        config.logging.level = "debug".to_string();
    }

    init_tracing(&config.logging)?;

    let plan = CampaignPlan {
        duration: Duration::from_secs(args.duration_sec),
        baud: args.baudrate,
        detailed_logging: args.detailed_logging,
        iterations: args.iterations,
        continuous: args.continuous,
    };
    tracing::info!(
        backend = ?config.ports.backend,
        dut = ?config.ports.dut,
        aux = ?config.ports.aux,
        "Running stress test"
    );

    let report = linkstress::run(config, plan).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\nlinkstress report");
        print!("{}", format_summary(&report));
        println!();
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Config { action } => match action {
            ConfigAction::Show { config } => {
                // Plain stderr logging so fallback warnings from loading are seen.
                init_tracing(&LoggingConfig::default())?;
                let config = load_config(config.as_deref())?;
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}
