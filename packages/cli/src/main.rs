#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the Kisumu health access analysis.
//!
//! Loads facilities, wards, and optionally the county boundary, then runs
//! one analysis and prints its result as JSON. Without a subcommand an
//! interactive menu is shown instead.
//!
//! Uses `indicatif-log-bridge` (via [`health_access_cli_utils::init_logger`])
//! so log lines and progress bars share the terminal.

mod commands;
mod interactive;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands::Inputs;

#[derive(Parser)]
#[command(name = "health_access", about = "Healthcare coverage analysis for Kisumu County")]
struct Cli {
    #[command(flatten)]
    data: DataArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct DataArgs {
    /// Facilities `GeoJSON` (file path or URL)
    #[arg(long, global = true)]
    facilities: Option<String>,
    /// Wards `GeoJSON` with census population (file path or URL)
    #[arg(long, global = true)]
    wards: Option<String>,
    /// County boundary `GeoJSON` (file path or URL), needed for site suitability
    #[arg(long, global = true)]
    boundary: Option<String>,
    /// Analysis configuration TOML replacing the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Do not contact the GIS server even if one is configured
    #[arg(long, global = true)]
    offline: bool,
    /// Write the JSON result to this file instead of stdout
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find coverage gaps, score them with population density, and print
    /// the needs report
    Analyze,
    /// Print the merged facility service area and ward coverage
    ServiceAreas,
    /// Rank candidate sites for new facilities
    Suitability {
        /// Ask the GIS server to run the search instead of running it locally
        #[arg(long)]
        remote: bool,
    },
    /// Fetch travel-time isochrones and the population they reach
    TravelTime,
}

impl DataArgs {
    fn inputs(&self) -> Result<Inputs, Box<dyn std::error::Error>> {
        let (Some(facilities), Some(wards)) = (&self.facilities, &self.wards) else {
            return Err("--facilities and --wards are required".into());
        };
        Ok(Inputs {
            facilities: facilities.clone(),
            wards: wards.clone(),
            boundary: self.boundary.clone(),
            config: self.config.clone(),
            offline: self.offline,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = health_access_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(&multi, &cli.data).await;
    };

    let session = commands::open_session(&cli.data.inputs()?).await?;
    let value = match command {
        Commands::Analyze => commands::analyze(&session, &multi).await?,
        Commands::ServiceAreas => commands::service_areas(&session).await?,
        Commands::Suitability { remote } => commands::suitability(&session, &multi, remote).await?,
        Commands::TravelTime => commands::travel_time(&session).await?,
    };
    commands::emit(&value, cli.data.output.as_deref())
}
