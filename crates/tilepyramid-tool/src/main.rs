//! Headless driver for tile pyramids: prefetch a region into the disk cache,
//! tessellate cached elevation, or locate a tile's cache file.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilepyramid::{EngineConfig, Sector};

#[derive(Parser)]
#[command(about = "Tile pyramid prefetch and tessellation tool")]
struct CliArgs {
    /// Engine settings (JSON). Defaults apply to missing fields.
    #[arg(long, global = true)]
    engine: Option<PathBuf>,

    /// Disk cache root, overriding the engine settings.
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    /// Never contact tile servers.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the tiles of a region into the disk cache.
    Prefetch {
        /// Tile source (JSON).
        source: PathBuf,
        /// Region as `min_lat,max_lat,min_lon,max_lon` in degrees.
        #[arg(long, value_parser = parse_sector, allow_hyphen_values = true)]
        sector: Sector,
        /// Level to fetch.
        #[arg(long, default_value_t = 0)]
        level: u32,
    },
    /// Build terrain meshes for a region from an elevation source.
    Tessellate {
        /// Elevation tile source (JSON).
        source: PathBuf,
        /// Region as `min_lat,max_lat,min_lon,max_lon` in degrees.
        #[arg(long, value_parser = parse_sector, allow_hyphen_values = true)]
        sector: Sector,
        /// Level to tessellate.
        #[arg(long, default_value_t = 0)]
        level: u32,
    },
    /// Print the cache path and URL of the tile containing a location.
    Path {
        /// Tile source (JSON).
        source: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 0)]
        level: u32,
    },
}

/// Parse `min_lat,max_lat,min_lon,max_lon`.
fn parse_sector(s: &str) -> Result<Sector, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("invalid number {v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [min_lat, max_lat, min_lon, max_lon] = values[..] else {
        return Err(format!("expected 4 comma-separated values, got {}", values.len()));
    };
    if min_lat >= max_lat || min_lon >= max_lon {
        return Err(format!("empty sector {s:?}"));
    }
    Ok(Sector::new(min_lat, max_lat, min_lon, max_lon))
}

fn engine_config(args: &CliArgs) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.engine {
        Some(path) => EngineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = &args.cache_root {
        config.cache_root.clone_from(root);
    }
    if args.offline {
        config.network_enabled = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = engine_config(&args)?;

    match args.command {
        Command::Prefetch {
            source,
            sector,
            level,
        } => commands::prefetch(config, &source, &sector, level).await?,
        Command::Tessellate {
            source,
            sector,
            level,
        } => commands::tessellate(config, &source, &sector, level).await?,
        Command::Path {
            source,
            lat,
            lon,
            level,
        } => commands::path(config, &source, lat, lon, level)?,
    }
    Ok(())
}
