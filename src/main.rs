use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use rdv_insights::model_cache::{FileModelCache, ModelCache};
use rdv_insights::models::Appointment;
use rdv_insights::{aggregate, db, forecast, ingest, report, Config, ForecastOptions};

#[derive(Parser)]
#[command(name = "rdv-insights")]
#[command(about = "Appointment KPIs and weekly volume forecast", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON configuration file (region map, forecast settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Read appointments from a CSV file instead of Postgres
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Only keep appointments on or after this date
    #[arg(long)]
    since: Option<NaiveDate>,
}

#[derive(Args)]
struct ForecastArgs {
    #[arg(long)]
    training_weeks: Option<usize>,
    #[arg(long)]
    horizon: Option<usize>,
    /// Fit a new model even if one is cached
    #[arg(long)]
    refit: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo dataset
    Seed,
    /// Import appointments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute the KPI bundle
    Kpis {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Forecast weekly appointment volume
    Forecast {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: ForecastArgs,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: ForecastArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        skip_forecast: bool,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Remove cached forecast models
    #[command(group(
        ArgGroup::new("target")
            .args(["key", "all"])
            .required(true)
            .multiple(false)
    ))]
    InvalidateCache {
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect().await?).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&connect().await?, &csv, &config.regions).await?;
            println!("Inserted {inserted} appointments from {}.", csv.display());
        }
        Commands::Kpis { source, json } => {
            let records = load_records(&source, &config).await?;
            let kpis = aggregate::aggregate(&records);

            println!("Total appointments: {}", kpis.total_volume);
            match kpis.mean_delay {
                Some(delay) => println!("Mean booking delay: {delay:.1} days"),
                None => println!("Mean booking delay: no data"),
            }
            for (month, volume) in kpis.monthly_volume.iter() {
                let trend = kpis.trend_ratio.get(month).copied().unwrap_or(0.0);
                println!("- {month}: {volume} ({trend:+.1}%)");
            }
            for warning in kpis.warnings.iter() {
                println!(
                    "Warning: office {} has no region ({} appointments excluded from region totals)",
                    warning.bureau, warning.volume
                );
            }

            if let Some(path) = json {
                report::save_json(&path, Some(&kpis), None)?;
                println!("KPIs written to {}.", path.display());
            }
        }
        Commands::Forecast {
            source,
            options,
            json,
        } => {
            let records = load_records(&source, &config).await?;
            let cache = FileModelCache::new(&config.forecast.cache_dir);
            let result = forecast::forecast(&records, &forecast_options(&config, &options), &cache)?;

            let origin = if result.reused { "cached" } else { "new" };
            println!("Forecast from {origin} model {}:", result.model_key);
            for point in result.forecast.iter() {
                println!("- week ending {}: {:.1}", point.week_end, point.volume);
            }

            if let Some(path) = json {
                report::save_json(&path, None, Some(&result))?;
                println!("Forecast written to {}.", path.display());
            }
        }
        Commands::Report {
            source,
            options,
            out,
            skip_forecast,
            json,
        } => {
            let records = load_records(&source, &config).await?;
            let kpis = aggregate::aggregate(&records);
            let forecast = if skip_forecast {
                None
            } else {
                let cache = FileModelCache::new(&config.forecast.cache_dir);
                Some(forecast::forecast(
                    &records,
                    &forecast_options(&config, &options),
                    &cache,
                ))
            };

            if let Some(path) = json.as_ref() {
                let forecast_ok = forecast.as_ref().and_then(|result| result.as_ref().ok());
                report::save_json(path, Some(&kpis), forecast_ok)?;
                println!("Report data written to {}.", path.display());
            }

            let scope = source
                .since
                .map(|since| format!("appointments since {since}"));
            let built = report::build_report(scope.as_deref(), &kpis, forecast);
            std::fs::write(&out, &built.markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
            if !built.skipped.is_empty() {
                println!("{} section(s) skipped.", built.skipped.len());
            }
        }
        Commands::InvalidateCache { key, all } => {
            let cache = FileModelCache::new(&config.forecast.cache_dir);
            if all {
                let removed = cache.clear()?;
                println!("Removed {removed} cached model(s).");
            } else if let Some(key) = key {
                if cache.invalidate(&key)? {
                    println!("Removed cached model {key}.");
                } else {
                    println!("No cached model {key}.");
                }
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to read appointments from Postgres")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_records(source: &SourceArgs, config: &Config) -> anyhow::Result<Vec<Appointment>> {
    let raw = match source.csv.as_ref() {
        Some(path) => {
            let mut rows = ingest::read_csv(path)?;
            if let Some(since) = source.since {
                // rows without a date stay so that validation reports them
                rows.retain(|row| row.date_rdv.map_or(true, |date| date >= since));
            }
            rows
        }
        None => db::fetch_appointments(&connect().await?, source.since).await?,
    };

    let records = ingest::validate(&raw, &config.regions)?;
    info!(records = records.len(), "appointments ready");
    Ok(records)
}

fn forecast_options(config: &Config, args: &ForecastArgs) -> ForecastOptions {
    let mut options = ForecastOptions::from(&config.forecast);
    if let Some(weeks) = args.training_weeks {
        options.training_weeks = weeks;
    }
    if let Some(weeks) = args.horizon {
        options.horizon_weeks = weeks;
    }
    options.refit = args.refit;
    options
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
