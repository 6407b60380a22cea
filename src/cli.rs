use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "geomedian")]
#[command(about = "Per-pixel geometric median composite of a stack of single-date rasters")]
#[command(version)]
pub struct Args {
    /// Input GeoTIFF paths, one per time step (same size and band count)
    #[arg(required = true, value_name = "FILE")]
    pub inputs: Vec<PathBuf>,

    /// Output GeoTIFF path (multi-band float32)
    #[arg(short, long, value_name = "FILE")]
    pub output: String,

    /// Band names, comma separated (default: band descriptions)
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    pub bands: Option<Vec<String>>,

    /// Override nodata value (default: read from input)
    #[arg(long, value_name = "VALUE")]
    pub nodata: Option<f64>,

    /// Maximum solver iterations per pixel
    #[arg(long, default_value_t = 1000)]
    pub maxiters: usize,

    /// Convergence tolerance on solution movement
    #[arg(long, default_value_t = 1e-4)]
    pub eps: f64,

    /// Process in spatial blocks of this many pixels, reading each on demand
    #[arg(short, long, value_name = "PIXELS")]
    pub chunk_size: Option<usize>,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
