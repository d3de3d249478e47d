//! mocksrv - simulated Modbus sensor stack

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::config_loader::{get_config_value, get_optional_value};
use common::logging::{self, LogConfig};
use common::shutdown::wait_for_shutdown;
use common::SystemClock;
use errors::SimErrorTrait;
use mocksrv::config::DEFAULT_CONFIG_PATH;
use mocksrv::{MockStack, StackConfig};
use sensor_model::Scenario;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulated Modbus sensor stack")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "MOCKSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory for current.json and modbus_log.json
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Scenario for the current and modbus subsystems
    #[arg(short, long)]
    scenario: Option<Scenario>,

    /// Generator seed for the current and modbus subsystems
    #[arg(long)]
    seed: Option<u64>,

    /// Generate one snapshot and exit
    #[arg(long)]
    once: bool,

    /// Only validate configuration without starting
    #[arg(long)]
    validate: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn apply_overrides(config: &mut StackConfig, args: &Args) {
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.logging.dir = get_optional_value(args.log_dir.clone(), "MOCKSRV_LOG_DIR")
        .or_else(|| config.logging.dir.clone());

    let output_dir = config.current.output.dir.clone();
    config.current.output.dir =
        get_config_value(args.output_dir.clone(), "MOCKSRV_OUTPUT_DIR", output_dir);

    if let Some(seed) = get_optional_value(args.seed, "MOCKSRV_SEED") {
        config.current.seed = seed;
        config.modbus.seed = seed;
    }

    if let Some(scenario) = args.scenario {
        config.current.scenario = scenario;
        config.modbus.scenario = scenario;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = StackConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    apply_overrides(&mut config, &args);

    logging::init_with_config(LogConfig {
        service_name: "mocksrv".to_string(),
        log_dir: config.logging.dir.clone(),
        level: logging::parse_level(&config.logging.level),
        enable_json: config.logging.enable_json,
        ansi: !args.no_color,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting mocksrv v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        let info = e.to_error_info();
        error!(
            code = e.error_code(),
            fields = ?info.field_errors,
            "Invalid configuration: {}",
            e
        );
        return Err(e.into());
    }
    if args.validate {
        info!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    let stack = MockStack::new(config, SystemClock::shared())?;

    if args.once {
        let snapshot = stack.current().generate_once()?;
        info!(
            "Generated snapshot at {} with {} sensors into {}",
            snapshot.timestamp,
            snapshot.sensors.len(),
            stack.current().status().current_file.display()
        );
        return Ok(());
    }

    stack.start_all();
    let signal = wait_for_shutdown().await;
    info!("Shutdown signal received: {:?}", signal);
    stack.stop_all().await;

    info!("mocksrv stopped");
    Ok(())
}
