//! Tactical risk gate and execution loop - entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;

use tgate_bot::{AppConfig, Application, CycleController};

/// Tactical risk gate and autonomous execution loop
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TGATE_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loop until Ctrl-C (default)
    Run,
    /// Run exactly one cycle and print its summary
    Once,
    /// Print the persisted tracker, kill switch and open positions
    Status,
    /// Manually move a HALTED kill switch back to ARMED
    ResetKillSwitch {
        /// Who is resetting, recorded in the log
        #[arg(long)]
        operator: String,
    },
    /// Start a new drawdown session at the given equity
    RestartSession {
        #[arg(long)]
        equity: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI arg > TGATE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TGATE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = AppConfig::from_file(&config_path)?;
    tgate_telemetry::init_logging(&config.telemetry)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path,
        mode = %config.mode,
        "Configuration loaded"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let app = Application::new(config)?;
            app.run().await?;
        }
        Command::Once => {
            let app = Application::new(config)?;
            let summary = app.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Status => {
            let controller = CycleController::from_config(&config)?;
            let report = serde_json::json!({
                "status": controller.status().await,
                "positions": controller.open_positions().await,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ResetKillSwitch { operator } => {
            let controller = CycleController::from_config(&config)?;
            let status = controller.reset_kill_switch(&operator).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::RestartSession { equity } => {
            let controller = CycleController::from_config(&config)?;
            let tracker = controller.restart_session(equity).await?;
            println!("{}", serde_json::to_string_pretty(&tracker)?);
        }
    }

    Ok(())
}
