use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use swim_scraper::batch::{run_batch, Manifest};
use swim_scraper::config::Settings;
use swim_scraper::db::Store;
use swim_scraper::params::{all_parameter_sets, athlete_search_url, PoolConfiguration, RawParameters};
use swim_scraper::session::{run_profile, run_rankings, AthleteRef, SessionReport};
use swim_scraper::upsert::{Backend, MemoryBackend, UpsertSink};
use swim_scraper::view::{CancelToken, SnapshotView};

#[derive(Parser)]
#[command(name = "swim_scraper", about = "Swimming rankings and results scraper")]
struct Cli {
    /// Config file (default: ./swim_scraper.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Database path, overrides the config
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// List every valid ranking query
    Params {
        /// Restrict to one pool configuration (SCM or LCM)
        #[arg(short, long)]
        pool: Option<String>,
        /// Print the query URLs too
        #[arg(long)]
        urls: bool,
    },
    /// Replay captured ranking pages for one parameter set
    Rankings {
        #[arg(short, long)]
        gender: String,
        #[arg(short, long)]
        distance: u16,
        #[arg(short, long)]
        stroke: String,
        #[arg(short, long, default_value = "SCM")]
        pool: String,
        /// Year filter (default: all)
        #[arg(long)]
        year: Option<u16>,
        /// One HTML file per "load more" state, in order
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
        /// Extract without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Replay an athlete search page and profile page
    Profile {
        #[arg(long)]
        athlete_id: i64,
        /// Search name (default: the stored athlete name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        search: PathBuf,
        #[arg(long)]
        profile: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run every job in a JSON manifest
    Batch {
        manifest: PathBuf,
        /// Parallel workers, overrides the config
        #[arg(short = 'j', long)]
        workers: Option<usize>,
    },
    /// Show table counts
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Init => {
            let store = Store::open(&settings.db_path)?;
            store.init_schema()?;
            println!("Schema ready at {}", settings.db_path);
            Ok(())
        }
        Commands::Params { pool, urls } => {
            let pools = match pool {
                Some(p) => vec![p.parse::<PoolConfiguration>()?],
                None => vec![PoolConfiguration::Scm, PoolConfiguration::Lcm],
            };
            let sets = all_parameter_sets(&pools);
            for p in &sets {
                if urls {
                    println!("{:<24} {}", p.to_string(), p.rankings_url());
                } else {
                    println!("{}", p);
                }
            }
            println!("\n{} parameter sets", sets.len());
            Ok(())
        }
        Commands::Rankings {
            gender,
            distance,
            stroke,
            pool,
            year,
            snapshots,
            dry_run,
        } => {
            let raw = RawParameters {
                gender,
                distance,
                stroke,
                pool,
                year,
                start_date: None,
                end_date: None,
                times_mode: None,
                region_id: None,
                country_id: None,
            };
            // rejected before anything is read
            let params = raw.validate()?;
            let docs = snapshots
                .iter()
                .map(|p| std::fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display())))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let mut view = SnapshotView::new().route(&params.rankings_url(), docs);
            let config = settings.session();
            let cancel = CancelToken::new();

            let report = if dry_run {
                let mut sink = UpsertSink::new(MemoryBackend::new());
                run_rankings(&mut view, &mut sink, &params, &config, &cancel)?
            } else {
                let mut sink = UpsertSink::new(open_store(&settings)?);
                run_rankings(&mut view, &mut sink, &params, &config, &cancel)?
            };
            print_report(&params.to_string(), &report);
            Ok(())
        }
        Commands::Profile {
            athlete_id,
            name,
            search,
            profile,
            dry_run,
        } => {
            let store = open_store(&settings)?;
            let name = match name {
                Some(n) => n,
                None => match store.find_athlete(athlete_id)?.and_then(|a| a.athlete_name) {
                    Some(n) => n,
                    None => bail!("athlete {} has no stored name; pass --name", athlete_id),
                },
            };
            let read = |p: &PathBuf| std::fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()));
            let mut view = SnapshotView::new()
                .route(&athlete_search_url(&name), vec![read(&search)?])
                .route("", vec![read(&profile)?]);
            let athlete = AthleteRef { athlete_id, name };
            let config = settings.session();
            let cancel = CancelToken::new();

            let report = if dry_run {
                profile_with(UpsertSink::new(MemoryBackend::new()), &mut view, &athlete, &config, &cancel)?
            } else {
                profile_with(UpsertSink::new(store), &mut view, &athlete, &config, &cancel)?
            };
            print_report(&format!("{} {}", athlete.athlete_id, athlete.name), &report);
            Ok(())
        }
        Commands::Batch { manifest, workers } => {
            if let Some(w) = workers {
                settings.workers = w.max(1);
            }
            let manifest = Manifest::load(&manifest)?;
            if manifest.is_empty() {
                println!("Manifest has no jobs.");
                return Ok(());
            }
            println!("Running {} jobs on {} worker(s)...", manifest.len(), settings.workers);
            let summary = run_batch(&manifest, &settings, &CancelToken::new())?;
            for (label, reason) in &summary.failed {
                println!("  FAILED {}: {}", label, reason);
            }
            println!(
                "{}/{} jobs ok in {}",
                summary.succeeded,
                summary.jobs,
                format_duration(summary.elapsed)
            );
            print_report("total", &summary.totals);
            Ok(())
        }
        Commands::Stats => {
            let store = open_store(&settings)?;
            let s = store.table_counts()?;
            println!("Athletes:  {}", s.athletes);
            println!("Enriched:  {}", s.enriched);
            println!("Results:   {}", s.results);
            println!("Rankings:  {}", s.rankings);
            let pending = store.athletes_for_enrichment(None)?.len();
            println!("Pending enrichment: {}", pending);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<Store> {
    let store = Store::open(&settings.db_path)
        .with_context(|| format!("Failed to open {}", settings.db_path))?;
    store.init_schema()?;
    Ok(store)
}

fn profile_with<B: Backend>(
    mut sink: UpsertSink<B>,
    view: &mut SnapshotView,
    athlete: &AthleteRef,
    config: &swim_scraper::session::SessionConfig,
    cancel: &CancelToken,
) -> anyhow::Result<SessionReport> {
    let report = run_profile(view, &mut sink, athlete, config, cancel)?;
    match (&report.hit, report.matched_by_id) {
        (None, _) => println!("No search results."),
        (Some(_), false) => println!("Athlete id not in search results; used the first row."),
        _ => {}
    }
    if let Some(outcome) = report.enrichment {
        info!("athlete {} enrichment: {:?}", athlete.athlete_id, outcome);
    }
    Ok(report.results)
}

fn print_report(label: &str, r: &SessionReport) {
    println!("[{}]", label);
    println!("  Rows:      {}", r.attempted);
    println!("  Extracted: {}", r.extracted);
    println!(
        "  Persisted: {} ({} new, {} updated, {} unchanged)",
        r.persisted, r.inserted, r.updated, r.unchanged
    );
    println!("  Skipped:   {}", r.skipped);
    println!("  Failed:    {}", r.failed);
    if r.rank_mismatches > 0 {
        println!("  Rank mismatches: {}", r.rank_mismatches);
    }
    if let Some(t) = &r.termination {
        println!("  Pagination: {}", t);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
