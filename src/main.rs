//! citydir: historical city directory ingestion
//!
//! Downloads OCR'd directory volumes, parses their entries and resolves the
//! addresses into person/address graph objects.

mod commands;

use anyhow::Result;
use citydir::{
    config::{Config, LogFormat},
    pipeline::Stage,
};
use clap::{Parser, Subcommand};
use commands::{
    download::download_archives, init::init_config, parse::parse_volumes, run::run_pipeline,
    run::stages, transform::transform_lines,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "citydir")]
#[command(about = "Turn OCR'd city directory volumes into person/address graph objects")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "citydir.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the volume archives listed in the manifest
    Download {
        /// Manifest JSON (overrides pipeline.manifest)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Archive base URL (overrides download.base_url)
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Split pages into lines and run them through the entry parser
    Parse {
        /// Skip volumes published before this year
        #[arg(long)]
        min_year: Option<i32>,

        /// Skip volumes published after this year
        #[arg(long)]
        max_year: Option<i32>,
    },

    /// Resolve addresses and write graph objects
    Transform {
        /// Street list, one name per line (overrides resolver.streets)
        #[arg(short, long)]
        streets: Option<PathBuf>,
    },

    /// Run download, parse and transform in sequence
    Run {
        /// Use archives already in the download directory
        #[arg(long)]
        skip_download: bool,

        /// Manifest JSON (overrides pipeline.manifest)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Street list (overrides resolver.streets)
        #[arg(short, long)]
        streets: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init must work even when an existing config is broken
    if let Commands::Init { path } = cli.command {
        init_logging(&Config::default(), cli.verbose)?;
        return init_config(path).await;
    }

    let mut config = Config::load_or_default(&cli.config)?;
    init_logging(&config, cli.verbose)?;

    if let Some(data_dir) = cli.data_dir {
        config.pipeline.data_dir = data_dir;
    }
    info!("Data directory: {}", config.pipeline.data_dir.display());

    match cli.command {
        Commands::Download { manifest, base_url } => {
            if manifest.is_some() {
                config.pipeline.manifest = manifest;
            }
            if base_url.is_some() {
                config.download.base_url = base_url;
            }
            config.validate_for(&[Stage::Download])?;
            download_archives(&config).await?;
        }
        Commands::Parse { min_year, max_year } => {
            if min_year.is_some() {
                config.pipeline.min_year = min_year;
            }
            if max_year.is_some() {
                config.pipeline.max_year = max_year;
            }
            config.validate_for(&[Stage::Parse])?;
            parse_volumes(&config).await?;
        }
        Commands::Transform { streets } => {
            if streets.is_some() {
                config.resolver.streets = streets;
            }
            config.validate_for(&[Stage::Transform])?;
            transform_lines(&config).await?;
        }
        Commands::Run {
            skip_download,
            manifest,
            streets,
        } => {
            if manifest.is_some() {
                config.pipeline.manifest = manifest;
            }
            if streets.is_some() {
                config.resolver.streets = streets;
            }
            let stages = stages(skip_download);
            // Every stage's settings are checked before the first one starts
            config.validate_for(&stages)?;
            run_pipeline(&config, &stages).await?;
        }
        // Handled before the config is loaded
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let log_level = config.logging.level.with_verbosity(verbose);

    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
