//! `convoy` command-line entry point.
//!
//! `convoy simulate` drives the whole live pipeline against an in-process
//! backend and prints the advisory summary; `convoy config` prints the
//! effective configuration.

mod sim;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use convoy_live::ConvoyConfig;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(about = "Live fleet state reconciliation simulator")]
#[command(version)]
struct Cli {
	/// Configuration file (TOML)
	#[arg(short, long, global = true, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run a scripted fleet against an in-memory backend
	Simulate(SimulateArgs),
	/// Print the effective configuration
	Config,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SimulateArgs {
	/// Route shown by the simulated map view
	#[arg(long, default_value = "15")]
	pub route: String,

	/// Vehicles on the route
	#[arg(long, default_value_t = 4)]
	pub vehicles: usize,

	/// Simulation steps
	#[arg(long, default_value_t = 20)]
	pub ticks: u32,

	/// Step length in milliseconds; also the position sampling interval
	#[arg(long, default_value_t = 250)]
	pub tick_ms: u64,

	/// Vehicle the simulated operator device reports for
	#[arg(long, value_name = "ID")]
	pub self_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let config = match &cli.config {
		Some(path) => ConvoyConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => ConvoyConfig::default(),
	};

	match cli.command {
		Command::Simulate(args) => {
			let summary = sim::run(config, args).await?;
			println!("{}", summary.to_json()?);
		}
		Command::Config => print!("{}", config.to_toml_string()?),
	}
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = std::env::var("CONVOY_LOG")
		.ok()
		.and_then(|spec| EnvFilter::try_new(spec).ok())
		.or_else(|| EnvFilter::try_from_default_env().ok())
		.unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "info" }));

	// Logs go to stderr; stdout carries the command output.
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(verbose)
		.init();
}
