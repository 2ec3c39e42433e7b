//! Source conversion pipeline.
//!
//! Reads each given source in a fixed order and appends its places to one
//! dump file. A source that fails is reported and the run goes on.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use placedump::hierarchy::HierarchyTable;
use placedump::source::{matrikkel, netex, osm, stedsnavn};
use placedump::{Config, DumpWriter};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "convert")]
#[command(about = "Convert Norwegian geodata extracts into a place dump")]
struct Args {
    /// NeTEx stop place registry (.xml or .xml.gz)
    #[arg(long)]
    stopplace: Option<PathBuf>,

    /// Matrikkel address export (.csv or .csv.gz)
    #[arg(long)]
    matrikkel: Option<PathBuf>,

    /// Stedsnavn GML feature collection (.gml or .gml.gz)
    #[arg(long)]
    stedsnavn: Option<PathBuf>,

    /// OSM PBF extract
    #[arg(long)]
    osm: Option<PathBuf>,

    /// Output dump file
    #[arg(short, long, default_value = "places.json")]
    output: PathBuf,

    /// Append to an existing dump instead of overwriting it
    #[arg(long)]
    append: bool,

    /// TOML file with popularity settings (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Placedump converter");

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if args.stopplace.is_none()
        && args.matrikkel.is_none()
        && args.stedsnavn.is_none()
        && args.osm.is_none()
    {
        warn!("No sources given, writing an empty dump");
    }

    let mut writer =
        DumpWriter::create(&args.output, args.append).context("Failed to open output file")?;
    let mut failed = 0;

    // Topographic places from the stop place file name municipalities and
    // counties for the other sources too.
    let hierarchy = match &args.stopplace {
        Some(path) => netex::build_hierarchy(path)
            .with_context(|| format!("Failed to read topographic places from {}", path.display()))
            .unwrap_or_else(|e| {
                error!("{:#}", e);
                HierarchyTable::new()
            }),
        None => HierarchyTable::new(),
    };
    let shared = (!hierarchy.is_empty()).then_some(&hierarchy);

    if let Some(path) = &args.stopplace {
        let result = netex::convert(path, &hierarchy, &config, &mut writer)
            .with_context(|| format!("Stop place conversion failed for {}", path.display()));
        if let Err(e) = result {
            error!("{:#}", e);
            failed += 1;
        }
    }

    if let Some(path) = &args.matrikkel {
        let result = matrikkel::convert(path, shared, &config, &mut writer)
            .with_context(|| format!("Address conversion failed for {}", path.display()));
        if let Err(e) = result {
            error!("{:#}", e);
            failed += 1;
        }
    }

    if let Some(path) = &args.stedsnavn {
        let result = stedsnavn::convert(path, shared, &config, &mut writer)
            .with_context(|| format!("Place name conversion failed for {}", path.display()));
        if let Err(e) = result {
            error!("{:#}", e);
            failed += 1;
        }
    }

    if let Some(path) = &args.osm {
        let result = osm::convert(path, &config, &mut writer)
            .with_context(|| format!("OSM conversion failed for {}", path.display()));
        if let Err(e) = result {
            error!("{:#}", e);
            failed += 1;
        }
    }

    let written = writer.finish().context("Failed to flush output file")?;
    info!(
        "Wrote {} places to {} ({} sources failed)",
        written,
        args.output.display(),
        failed
    );

    if failed > 0 {
        anyhow::bail!("{} source(s) failed", failed);
    }
    Ok(())
}
