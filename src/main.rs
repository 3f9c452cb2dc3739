//! CLI Entry Point for sortgate
//!
//! Provides command-line access to the gate controller:
//! - Listing candidate serial ports
//! - Printing the effective configuration
//! - Connecting and showing link status
//! - Opening a gate manually (test buttons)
//! - Feeding classifier labels through the full pipeline
//!
//! # Usage
//!
//! Open the corrosive gate on real hardware:
//! ```bash
//! sortgate test corrosive
//! ```
//!
//! Pipe classifier output through the controller without a board:
//! ```bash
//! printf 'Flammable\nCorrosive|Hydrochloric acid\n' | sortgate --mock run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sortgate::command::Category;
use sortgate::config::{SortgateConfig, DEFAULT_CONFIG_PATH};
use sortgate::controller::ControllerStatus;
use sortgate::discovery::{GlobScanner, PortScanner};
use sortgate::dispatcher::DispatchOutcome;
use sortgate::link::{PortOpener, TokioSerialOpener};
use sortgate::mock::{MockPortOpener, MOCK_PORT_PATH};
use sortgate::notify::InventoryNotifier;
use sortgate::service::GateService;
use sortgate::trigger::TriggerReport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "sortgate")]
#[command(about = "Gate actuation controller for the chemical sorting station", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use a simulated gate controller instead of a serial port
    #[arg(long, global = true)]
    mock: bool,

    /// Print status as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate serial ports
    Ports,

    /// Print the effective configuration as TOML
    Config,

    /// Connect to the gate controller and print the link status
    Connect,

    /// Open one gate directly and wait for it to close
    Test {
        /// flammable, cold-storage, corrosive or other
        category: Category,
    },

    /// Handle one classifier label (gate + inventory)
    Classify {
        /// Label as returned by the classifier, e.g. "Corrosive."
        label: String,

        /// Text extracted from the container label
        #[arg(long)]
        text: Option<String>,
    },

    /// Read `label` or `label|text` lines from stdin until EOF
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SortgateConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    sortgate::logging::init_from_config(&config)?;

    let (opener, scanner) = hardware(&config, cli.mock);

    match cli.command {
        Commands::Ports => return list_ports(scanner.as_ref()),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        _ => {}
    }

    let sink = Arc::new(InventoryNotifier::new(&config.notification)?);
    let service = GateService::start(&config, opener, scanner, sink);

    let result = match cli.command {
        Commands::Ports | Commands::Config => Ok(()),
        Commands::Connect => connect(&service, cli.json).await,
        Commands::Test { category } => test_gate(&service, category, cli.json).await,
        Commands::Classify { label, text } => {
            let report = service.handle_label(&label, text.as_deref()).await;
            print_report(&report);
            wait_for_close(&service).await;
            print_status(&service.status().await, cli.json)
        }
        Commands::Run => run_loop(&service, cli.json).await,
    };

    service.shutdown().await;
    result
}

fn hardware(config: &SortgateConfig, mock: bool) -> (Arc<dyn PortOpener>, Arc<dyn PortScanner>) {
    if mock {
        let bench = MockPortOpener::new();
        bench.attach(MOCK_PORT_PATH);
        return (Arc::new(bench.clone()), Arc::new(bench));
    }

    let scanner = match &config.serial.port_patterns {
        Some(patterns) => GlobScanner::with_patterns(patterns.clone()),
        None => GlobScanner::new(),
    };
    (Arc::new(TokioSerialOpener), Arc::new(scanner))
}

fn list_ports(scanner: &dyn PortScanner) -> Result<()> {
    let ports = scanner.list_candidate_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn connect(service: &GateService, json: bool) -> Result<()> {
    match service.reconnect().await {
        Ok(()) => println!("✅ Connected"),
        Err(e) => println!("❌ {e}"),
    }
    print_status(&service.status().await, json)
}

async fn test_gate(service: &GateService, category: Category, json: bool) -> Result<()> {
    match service.test_category(category).await {
        Ok(DispatchOutcome::Opened { category, .. }) => {
            println!("✅ Opened gate {} ({category})", category.gate());
            wait_for_close(service).await;
        }
        Ok(DispatchOutcome::NoAction { label }) => println!("No gate for '{label}'"),
        Err(e) => println!("❌ Could not open gate: {e}"),
    }
    print_status(&service.status().await, json)
}

async fn run_loop(service: &GateService, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
        };
        let Some(line) = line else { break };

        service.tick().await;
        let (label, text) = match line.split_once('|') {
            Some((label, text)) => (label, Some(text.trim())),
            None => (line.as_str(), None),
        };
        if label.trim().is_empty() {
            continue;
        }

        let report = service.handle_label(label, text).await;
        print_report(&report);
        print_status(&service.status().await, json)?;
    }

    wait_for_close(service).await;
    Ok(())
}

/// Sleep out the dwell of an open gate and make sure it closes.
async fn wait_for_close(service: &GateService) {
    if let Some(remaining) = service.status().await.gate.closes_in {
        tokio::time::sleep(remaining).await;
        service.tick().await;
    }
}

fn print_report(report: &TriggerReport) {
    match report {
        TriggerReport::Skipped { label } => println!("'{label}': no action"),
        TriggerReport::Handled {
            label,
            dispatch,
            notification,
        } => {
            match dispatch {
                Ok(DispatchOutcome::Opened { category, .. }) => {
                    println!("'{label}': opened gate {}", category.gate())
                }
                Ok(DispatchOutcome::NoAction { .. }) => println!("'{label}': no gate for this label"),
                Err(e) => println!("'{label}': ⚠️  gate not actuated: {e}"),
            }
            match notification {
                Ok(receipt) => println!("   inventory: {} ({})", receipt.url, receipt.status),
                Err(e) => println!("   inventory: ⚠️  {e}"),
            }
        }
    }
}

fn print_status(status: &ControllerStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let conn = &status.connection;
    match &conn.active_path {
        Some(path) => println!("Serial: {:?} on {path}", conn.state),
        None => println!("Serial: {:?}", conn.state),
    }
    if let Some(at) = conn.last_liveness {
        println!("   last seen: {}", at.to_rfc3339());
    }
    if conn.should_alert() {
        println!(
            "   🔴 gate controller unreachable ({} failed attempts); check the USB cable",
            conn.consecutive_failures
        );
    }
    match (status.gate.open_category, status.gate.closes_in) {
        (Some(category), Some(left)) => {
            println!("Gate: {category} open, closing in {:.1}s", left.as_secs_f64())
        }
        _ => println!("Gate: closed"),
    }
    Ok(())
}
