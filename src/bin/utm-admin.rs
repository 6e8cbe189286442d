use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use utm_tracker::config::Config;
use utm_tracker::storage::{
    date_range_filter, AggregateQuery, EventColumn, Filter, SqliteStorage, Storage,
};
use utm_tracker::Tracker;

#[derive(Parser)]
#[command(name = "utm-admin")]
#[command(about = "UTM tracker maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the event database if it does not exist
    Init,
    /// Count recorded events
    Count {
        /// Only count events of this page
        #[arg(long)]
        page: Option<String>,
        /// Only count events of the last N days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Compare the last N days with the N days before
    Stats {
        /// Window length in days (defaults to UTM_STATS_RANGE)
        #[arg(long)]
        days: Option<u32>,
        /// Only include events of this page
        #[arg(long)]
        page: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Init => {
            let storage = SqliteStorage::new(&config.file, 1);
            let created = storage
                .ensure_schema()
                .await
                .with_context(|| format!("Failed to initialize {}", config.file.display()))?;
            if created {
                println!("✓ Created event database at {}", config.file.display());
            } else {
                println!("Event database already exists at {}", config.file.display());
            }
        }
        Commands::Count { page, days } => {
            let tracker = Tracker::from_config(config)?;

            let mut filter: Option<Filter> = None;
            if let Some(page) = page {
                filter = Some(Filter::equals(EventColumn::PageId, page));
            }
            if let Some(days) = days {
                let range = date_range_filter(days, 0, EventColumn::VisitedAt);
                filter = Some(match filter {
                    Some(existing) => existing.and(range),
                    None => range,
                });
            }

            let query = filter
                .as_ref()
                .map(AggregateQuery::count_where)
                .unwrap_or_default();
            let count = tracker.count(&query).await?;
            println!("{}", count);
        }
        Commands::Stats { days, page } => {
            let days = days.unwrap_or(config.stats_range_days).max(1);
            let tracker = Tracker::from_config(config)?;
            let stats = tracker.period_stats(days, page.as_deref()).await?;

            println!("{:<20} {}", "Window (days)", stats.days);
            println!("{:<20} {}", "Recent", stats.recent);
            println!("{:<20} {}", "Previous", stats.previous);
            if stats.previous > 0 {
                println!("{:<20} {:+}%", "Change", stats.percent_change);
            } else {
                println!("{:<20} n/a (no events in previous window)", "Change");
            }
        }
    }

    Ok(())
}
