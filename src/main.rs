use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use courier_workflow::simulation::{run_scenario, Scenario, ScenarioReport};
use courier_workflow::{init_config, init_telemetry, WorkflowConfig, WorkflowSettings};

#[derive(Parser)]
#[command(name = "courier-workflow")]
#[command(about = "Delivery completion workflow for parcel couriers")]
#[command(long_about = "Drives the courier's delivery completion steps (details, OTP, proof, \
                       confirm) against scripted location and server answers, and shows the \
                       effective configuration.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted delivery session from a scenario file
    Run {
        /// Scenario TOML describing the parcel, location, server answers and actions
        scenario: PathBuf,
        /// Print the report as JSON instead of a readable summary
        #[arg(long, help = "Emit the scenario report as JSON on stdout")]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write the effective configuration to this path
        #[arg(long, help = "Write the effective configuration as TOML to this path")]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = courier_workflow::config()?;
    init_telemetry(&config.observability)?;
    init_config()?;

    match cli.command {
        Commands::Run { scenario, json } => tokio::runtime::Runtime::new()?
            .block_on(async { run_command(config, scenario, json).await }),
        Commands::Config { write } => config_command(config, write),
    }
}

async fn run_command(config: &WorkflowConfig, path: PathBuf, json: bool) -> Result<()> {
    let scenario = Scenario::from_file(&path)
        .await
        .with_context(|| format!("Failed to load scenario {}", path.display()))?;

    let report = run_scenario(&scenario, WorkflowSettings::from(config)).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&scenario, &report);
    }
    Ok(())
}

fn print_report(scenario: &Scenario, report: &ScenarioReport) {
    println!(
        "📦 Parcel {} ({}) for {}",
        scenario.delivery.tracking_number, scenario.delivery.id, scenario.delivery.customer_name
    );
    println!();

    for (i, action) in report.actions.iter().enumerate() {
        let step = action
            .result
            .step
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &action.result.message {
            Some(message) => println!(
                "  {:>2}. {:<24} {} at {}: {}",
                i + 1,
                format!("{:?}", action.action),
                action.result.outcome,
                step,
                message
            ),
            None => println!(
                "  {:>2}. {:<24} {} -> {}",
                i + 1,
                format!("{:?}", action.action),
                action.result.outcome,
                step
            ),
        }
    }

    println!();
    println!("🧭 Timeline:");
    if let Some(last) = report.actions.last() {
        for milestone in &last.timeline {
            let mark = if milestone.achieved { "✅" } else { "❌" };
            println!("  {mark} {}", milestone.label);
        }
    }

    println!();
    println!("📡 Server calls:");
    for operation in &report.gateway_calls {
        println!("  - {operation}");
    }

    println!();
    match &report.result {
        Some(result) if result.is_delivered() => println!("🎉 Result: delivered"),
        Some(result) => println!("⚠️  Result: {result:?}"),
        None if report.exited => println!("🚪 Session exited without a result"),
        None => println!("⏸️  Session still open"),
    }
}

fn config_command(config: &WorkflowConfig, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config
                .save_to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Configuration written to {}", path.display());
        }
        None => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}
