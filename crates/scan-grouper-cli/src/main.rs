use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use scan_grouper_core::{
    Config, DuplicateSeriesEngine, GridScorer, Ledger, TemplateGroupEngine,
};

#[derive(Parser)]
#[command(name = "scan-grouper")]
#[command(about = "Group scanned document images into duplicate series or template groups")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold consecutive rescans into per-anchor series folders
    Series {
        /// Directory holding the scanned images
        input_dir: PathBuf,

        /// Where to place anchors and series folders
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,

        /// Path to the ledger database
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbosity level
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Group scans by which reference template they match
    Logos {
        /// Directory holding the scanned images
        input_dir: PathBuf,

        /// Where to create group folders
        output_dir: PathBuf,

        /// Directory holding the template images
        logos_dir: PathBuf,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbosity level
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Path to save configuration file
        #[arg(default_value = "scan-grouper.json")]
        path: PathBuf,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config, anyhow::Error> {
    let config = if let Some(config_path) = path {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    Ok(config)
}

fn apply_verbosity(config: &mut Config, verbose: u8) {
    config.log_level = match verbose {
        0 => scan_grouper_core::config::LogLevel::Info,
        1 => scan_grouper_core::config::LogLevel::Debug,
        _ => scan_grouper_core::config::LogLevel::Trace,
    };
}

fn init_logging(config: &Config) {
    // File logging keeps the console clear for progress bars; fall back to
    // env_logger if the log directory cannot be created
    if scan_grouper_core::logging::init_logger("logs").is_err() {
        env_logger::init();
    }
    log::set_max_level(match config.log_level {
        scan_grouper_core::config::LogLevel::Error => log::LevelFilter::Error,
        scan_grouper_core::config::LogLevel::Warn => log::LevelFilter::Warn,
        scan_grouper_core::config::LogLevel::Info => log::LevelFilter::Info,
        scan_grouper_core::config::LogLevel::Debug => log::LevelFilter::Debug,
        scan_grouper_core::config::LogLevel::Trace => log::LevelFilter::Trace,
    });
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Series {
            input_dir,
            output_dir,
            db_path,
            config,
            verbose,
        } => {
            let mut config = load_config(config)?;
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            apply_verbosity(&mut config, verbose);
            config.validate()?;
            init_logging(&config);

            let scorer = GridScorer::from_config(&config);
            let ledger = Ledger::open(&config.db_path)?;
            let engine =
                DuplicateSeriesEngine::new(&scorer, &ledger, &config, input_dir, output_dir);

            info!("Starting duplicate-series run");
            let report = engine.run()?;
            info!("Duplicate-series run complete");

            println!(
                "Finalized {} images: {} duplicates across {} new series, {} skipped",
                report.finalized, report.duplicates, report.new_series, report.skipped
            );
            Ok(())
        }

        Commands::Logos {
            input_dir,
            output_dir,
            logos_dir,
            config,
            verbose,
        } => {
            let mut config = load_config(config)?;
            apply_verbosity(&mut config, verbose);
            config.validate()?;
            init_logging(&config);

            let scorer = GridScorer::from_config(&config);
            let engine =
                TemplateGroupEngine::new(&scorer, &config, input_dir, output_dir, logos_dir);

            info!("Starting template-grouping run");
            let report = engine.run()?;
            info!("Template-grouping run complete");

            println!(
                "Grouped {} images into {} groups ({} templates): {} dropped, {} skipped",
                report.grouped,
                report.groups_opened,
                report.templates_loaded,
                report.dropped,
                report.skipped
            );
            Ok(())
        }

        Commands::GenerateConfig { path } => {
            let config = Config::default();
            config.save_to_file(&path)?;
            println!("Configuration file generated at: {}", path.display());
            Ok(())
        }
    }
}
