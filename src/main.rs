use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use resale_cache::config::DEFAULT_CONFIG_NAME;
use resale_cache::{run_build, Category, DashboardContext, FilterState, PipelineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resale-cache", about = "Builds and queries the resale summary cache")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_NAME, env = "RESALE_CACHE_CONFIG")]
    config: PathBuf,

    /// Overrides the cache directory from the configuration
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration into a directory if it has none
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Rebuild every cached table from the raw files
    Build,

    /// Print the table the dashboard would show for a selection
    Query {
        /// First month, YYYY-MM
        #[arg(long)]
        start: String,

        /// Last month, YYYY-MM
        #[arg(long)]
        end: String,

        #[arg(long)]
        town: Option<String>,

        #[arg(long, default_value = "All")]
        flat_type: String,

        #[arg(long, default_value = "All")]
        storey_range: String,

        /// Per-town map values instead of a time series
        #[arg(long)]
        map: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "resale_cache=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Init { dir } = &cli.command {
        let config = PipelineConfig::load_or_init(dir)
            .with_context(|| format!("initializing {}", dir.display()))?;
        info!(cache_dir = %config.cache_dir.display(), "configuration ready");
        return Ok(());
    }

    let mut config = PipelineConfig::load_or_default(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Build => {
            let report = run_build(&config)?;
            info!(
                tables = report.tables_written,
                records = report.records,
                "build finished"
            );
        }
        Commands::Query {
            start,
            end,
            town,
            flat_type,
            storey_range,
            map,
        } => {
            let context = DashboardContext::from_config(&config)?;
            let filter = FilterState::from_widgets(
                &start,
                &end,
                &[
                    (Category::FlatType, flat_type.as_str()),
                    (Category::StoreyRange, storey_range.as_str()),
                ],
            );
            info!("{}", filter.date_range.describe());
            let table = if map {
                context.map_view(&filter)
            } else {
                context.query(&filter, town.as_deref())
            };
            table.write_csv(std::io::stdout().lock())?;
        }
    }

    Ok(())
}
