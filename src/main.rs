//! CLI entry point: trip flows, station communities and the supporting
//! merge, weekday/weekend split and synthetic data commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use flowcomm::export::write_pair_weights_to_path;
use flowcomm::flow::{DEFAULT_DESTINATION_COLUMN, DEFAULT_ORIGIN_COLUMN};
use flowcomm::reconcile::{KioskCatalog, NameReconciler};
use flowcomm::split::DaySplit;
use flowcomm::synth::TripGenerator;
use flowcomm::{FlowAggregator, PipelineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowcomm")]
#[command(about = "Station flow volumes and communities from bike-share trips", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Columns {
    /// 0-based column holding the checkout station id
    #[arg(long, default_value_t = DEFAULT_ORIGIN_COLUMN)]
    origin_column: usize,

    /// 0-based column holding the return station id
    #[arg(long, default_value_t = DEFAULT_DESTINATION_COLUMN)]
    destination_column: usize,
}

impl Columns {
    fn aggregator(&self) -> FlowAggregator {
        FlowAggregator::new(self.origin_column, self.destination_column)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate flows, detect station communities and write both result files
    Communities {
        /// Trip table (CSV with header)
        trips: PathBuf,

        /// Pair-weight output file
        #[arg(short, long, default_value = "pair_weights.txt")]
        pairs: PathBuf,

        /// Community membership output file
        #[arg(short, long, default_value = "communities.txt")]
        membership: PathBuf,

        /// Modularity resolution; higher values give smaller communities
        #[arg(short, long, default_value_t = 1.0)]
        resolution: f64,

        #[command(flatten)]
        columns: Columns,
    },
    /// Aggregate flows only and write the pair-weight file
    Flows {
        trips: PathBuf,

        #[arg(short, long, default_value = "pair_weights.txt")]
        output: PathBuf,

        #[command(flatten)]
        columns: Columns,
    },
    /// Join a raw trip export to the kiosk catalog by kiosk name
    Merge {
        /// Raw trip export (CSV with Checkout Kiosk and Return Kiosk columns)
        trips: PathBuf,

        /// Kiosk catalog (CSV with Kiosk ID, Kiosk Name and Number of Docks)
        #[arg(short, long)]
        kiosks: PathBuf,

        /// Extra renames as a two-column CSV (catalog name, trip name)
        #[arg(long)]
        renames: Option<PathBuf>,

        /// Skip the built-in Austin rename table
        #[arg(long)]
        no_builtin_renames: bool,

        #[arg(short, long, default_value = "merged.csv")]
        output: PathBuf,
    },
    /// Split a trip table into weekday and weekend tables
    Split {
        trips: PathBuf,

        #[arg(long, default_value = "weekday.csv")]
        weekday: PathBuf,

        #[arg(long, default_value = "weekend.csv")]
        weekend: PathBuf,

        /// 0-based column holding the checkout date
        #[arg(long, default_value_t = 0)]
        date_column: usize,

        #[command(flatten)]
        columns: Columns,
    },
    /// Write a synthetic trip table
    Generate {
        #[arg(short, long, default_value_t = 60)]
        stations: usize,

        #[arg(short, long, default_value_t = 5000)]
        trips: usize,

        #[arg(short, long, default_value_t = 4)]
        districts: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(short, long, default_value = "trips.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Communities {
            trips,
            pairs,
            membership,
            resolution,
            columns,
        } => {
            let config = PipelineConfig {
                aggregator: columns.aggregator(),
                resolution,
                pairs_output: Some(pairs),
                membership_output: Some(membership),
            };
            let report = config
                .run(&trips)
                .with_context(|| format!("community detection failed for {}", trips.display()))?;

            let communities = report.membership.communities(&report.summary.vertices);
            info!(
                communities = communities.len(),
                modularity = report.modularity,
                "Detected communities"
            );
            for (label, members) in &communities {
                info!(community = label, size = members.len(), stations = ?members, "Community");
            }
        }
        Commands::Flows {
            trips,
            output,
            columns,
        } => {
            let summary = columns
                .aggregator()
                .aggregate_path(&trips)
                .with_context(|| format!("failed to aggregate {}", trips.display()))?;
            write_pair_weights_to_path(&output, &summary.flows)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(
                stations = summary.vertices.len(),
                pairs = summary.flows.len(),
                trips = summary.flows.total_weight(),
                output = %output.display(),
                "Pair weights written"
            );
        }
        Commands::Merge {
            trips,
            kiosks,
            renames,
            no_builtin_renames,
            output,
        } => {
            let mut names = if no_builtin_renames {
                NameReconciler::new()
            } else {
                NameReconciler::austin()
            };
            if let Some(path) = &renames {
                let added = names
                    .extend_from_path(path)
                    .with_context(|| format!("failed to read renames {}", path.display()))?;
                info!(added, path = %path.display(), "Kiosk renames loaded");
            }
            let catalog = KioskCatalog::from_path(&kiosks, &names)
                .with_context(|| format!("failed to read kiosks {}", kiosks.display()))?;
            catalog
                .merge_paths(&trips, &output)
                .with_context(|| format!("failed to merge {}", trips.display()))?;
        }
        Commands::Split {
            trips,
            weekday,
            weekend,
            date_column,
            columns,
        } => {
            let split = DaySplit {
                date_column,
                origin_column: columns.origin_column,
                destination_column: columns.destination_column,
            };
            split
                .split_paths(&trips, &weekday, &weekend)
                .with_context(|| format!("failed to split {}", trips.display()))?;
        }
        Commands::Generate {
            stations,
            trips,
            districts,
            seed,
            output,
        } => {
            TripGenerator::new(stations, trips)
                .with_districts(districts)
                .with_seed(seed)
                .write_csv_to_path(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
    }

    Ok(())
}
