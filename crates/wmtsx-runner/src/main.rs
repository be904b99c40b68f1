use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;
use wmtsx_runner::{inventory_table, Cli, Config, Extractor, FsStore, Result};

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(&cli.config_file)?;
    cli.apply_overrides(&mut config);

    // Everything that can be wrong with the configuration fails here,
    // before the first catalogue query.
    let settings = config.settings(cli.zoom, &cli.out_path)?;
    let selector = config.selector()?;
    let aois = config.load_aois(&cli.aois)?;
    let catalogue = config.catalogue()?;
    let tiles = Arc::new(config.tile_source()?);
    info!(
        aois = aois.len(),
        endpoint = %config.endpoint.name,
        matrix = settings.matrix.name(),
        "Configuration loaded"
    );

    let extractor = Extractor::new(settings, selector, catalogue, tiles.clone(), Arc::new(FsStore))?;

    if cli.info_only {
        print!("{}", inventory_table(&extractor.inventory(&aois)));
        return Ok(());
    }

    let summary = extractor.run(&aois);
    let stats = tiles.download_stats();
    info!(
        tiles = stats.tiles_downloaded,
        bytes = stats.bytes_downloaded,
        failed = stats.tiles_failed,
        "Download statistics"
    );
    println!("{}", summary);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(fatal = e.is_fatal(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
