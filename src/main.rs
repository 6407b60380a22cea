use clap::Parser;
use env_logger::Env;
use log::info;

use geomedian::cli::Args;
use geomedian::{io, mask_invalid_data, xr_geomedian, GeomedianError, GeomedianOptions, Result};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Geomedian Composite ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let options = GeomedianOptions {
        maxiters: args.maxiters,
        eps: args.eps,
        num_threads: None,
    };
    options.validate()?;

    if let Some(size) = args.chunk_size {
        if size == 0 {
            return Err(GeomedianError::InvalidOption {
                name: "chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        info!("Processing in {}x{} pixel blocks", size, size);
    }

    let (collection, metadata) =
        io::load_time_stack(&args.inputs, args.bands.as_deref(), args.chunk_size, args.nodata)?;
    info!("Raster size: {}x{}", metadata.width, metadata.height);

    // Nodata becomes NaN so every band agrees on the missing-value marker
    let collection = mask_invalid_data(&collection);

    info!(
        "Calculating geomedian (maxiters: {}, eps: {})",
        options.maxiters, options.eps
    );
    let composite = xr_geomedian(collection, Some("time"), None, &options)?.into_collection()?;

    info!("Writing output: {}", args.output);
    io::write_collection(&args.output, &composite, &metadata)?;

    info!("=== Done! ===");
    Ok(())
}
