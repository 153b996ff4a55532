#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the risk surface pipeline.
//!
//! Loads the boundary, events, risk layers, optional group polygons and
//! optional held-out events from `GeoJSON`, runs the pipeline with a TOML
//! configuration, and writes the JSON report. Set `RUST_LOG=info` to see
//! stage progress.

mod load;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use clap::Parser;
use risk_map_pipeline::{PipelineConfig, PipelineInputs};

/// Build a crime risk surface and compare it against kernel density.
#[derive(Parser)]
#[command(name = "risk_map")]
#[command(about = "Build a crime risk surface and compare it against kernel density")]
struct Cli {
    /// Pipeline configuration (TOML). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Study-area boundary polygons.
    #[arg(long)]
    boundary: PathBuf,

    /// Events to model. Categories come from a `category` property, else
    /// the file name.
    #[arg(long)]
    events: PathBuf,

    /// Risk-factor points, one layer per `category` property value.
    #[arg(long)]
    risk_layers: PathBuf,

    /// Named group polygons (e.g. neighborhoods) for LOGO-CV folds.
    #[arg(long)]
    groups: Option<PathBuf>,

    /// Later-period events to score the risk bands against.
    #[arg(long)]
    holdout: Option<PathBuf>,

    /// Write the report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn file_category(path: &Path) -> &str {
    path.file_stem().and_then(OsStr::to_str).unwrap_or("events")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_str(&load::read(path)?)?,
        None => PipelineConfig::default(),
    };

    let boundary = load::boundary(&load::read(&cli.boundary)?)?;
    let events = load::points(&load::read(&cli.events)?, file_category(&cli.events))?;
    let risk_layers = load::points(
        &load::read(&cli.risk_layers)?,
        file_category(&cli.risk_layers),
    )?;
    let groups = match &cli.groups {
        Some(path) => load::groups(&load::read(path)?)?,
        None => Vec::new(),
    };
    let held_out = match &cli.holdout {
        Some(path) => load::points(&load::read(path)?, file_category(path))?,
        None => Vec::new(),
    };

    log::info!(
        "Loaded {} events, {} risk-factor points, {} groups, {} held-out events",
        events.len(),
        risk_layers.len(),
        groups.len(),
        held_out.len()
    );

    let report = risk_map_pipeline::run(
        &config,
        &PipelineInputs {
            boundary: &boundary,
            events: &events,
            risk_layers: &risk_layers,
            groups: &groups,
            held_out: &held_out,
        },
    )?;

    let json = serde_json::to_string_pretty(&report)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Wrote report to {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_falls_back_to_file_stem() {
        assert_eq!(file_category(Path::new("data/burglaries.geojson")), "burglaries");
    }

    #[test]
    fn parses_arguments() {
        let cli = Cli::try_parse_from([
            "risk_map",
            "--boundary",
            "b.geojson",
            "--events",
            "e.geojson",
            "--risk-layers",
            "r.geojson",
            "--holdout",
            "h.geojson",
        ])
        .unwrap();
        assert!(cli.config.is_none());
        assert!(cli.groups.is_none());
        assert_eq!(cli.holdout, Some(PathBuf::from("h.geojson")));
    }
}
