use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::Store;
use crate::params::{athlete_search_url, RawParameters};
use crate::session::{run_profile, run_rankings, AthleteRef, SessionReport};
use crate::upsert::UpsertSink;
use crate::view::{CancelToken, RateLimiter, SnapshotView, Throttled};

/// A replay manifest. Snapshot paths are relative to the manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub rankings: Vec<RankingJob>,
    #[serde(default)]
    pub profiles: Vec<ProfileJob>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One ranking query, replayed from the documents the table went through
/// as "load more" was clicked.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingJob {
    pub params: RawParameters,
    pub snapshots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileJob {
    pub athlete_id: i64,
    pub name: String,
    pub search: PathBuf,
    pub profile: PathBuf,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.rankings.len() + self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn jobs(&self) -> Vec<Job<'_>> {
        self.rankings
            .iter()
            .map(Job::Rankings)
            .chain(self.profiles.iter().map(Job::Profile))
            .collect()
    }

    fn read(&self, path: &Path) -> Result<String> {
        let full = self.base_dir.join(path);
        std::fs::read_to_string(&full).with_context(|| format!("Failed to read snapshot {}", full.display()))
    }
}

enum Job<'m> {
    Rankings(&'m RankingJob),
    Profile(&'m ProfileJob),
}

impl Job<'_> {
    fn label(&self) -> String {
        match self {
            Job::Rankings(j) => format!("rankings {}", j.params.label()),
            Job::Profile(j) => format!("profile {} {}", j.athlete_id, j.name),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub jobs: usize,
    pub succeeded: usize,
    /// (job label, reason)
    pub failed: Vec<(String, String)>,
    pub totals: SessionReport,
    pub elapsed: Duration,
}

/// Run every job in the manifest. A failing job is recorded and the batch
/// moves on; only setup problems (store, thread pool) abort the batch.
pub fn run_batch(manifest: &Manifest, settings: &Settings, cancel: &CancelToken) -> Result<BatchSummary> {
    let t0 = Instant::now();
    Store::open(&settings.db_path)
        .and_then(|s| s.init_schema())
        .with_context(|| format!("Failed to prepare database {}", settings.db_path))?;

    let jobs = manifest.jobs();
    let limiter = Arc::new(RateLimiter::new(settings.request_interval()));

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let run = |job: &Job<'_>| {
        let label = job.label();
        pb.set_message(label.clone());
        let result = run_job(job, manifest, settings, &limiter, cancel);
        if let Err(e) = &result {
            warn!("{} failed: {:#}", label, e);
        }
        pb.inc(1);
        (label, result)
    };

    let outcomes: Vec<(String, Result<SessionReport>)> = if settings.workers > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .build()
            .context("Failed to build worker pool")?;
        pool.install(|| jobs.par_iter().map(run).collect())
    } else {
        jobs.iter().map(run).collect()
    };
    pb.finish_and_clear();

    let mut summary = BatchSummary {
        jobs: outcomes.len(),
        ..BatchSummary::default()
    };
    for (label, outcome) in outcomes {
        match outcome {
            Ok(report) => {
                summary.succeeded += 1;
                summary.totals.absorb(&report);
            }
            Err(e) => summary.failed.push((label, format!("{:#}", e))),
        }
    }
    summary.elapsed = t0.elapsed();
    info!(
        "batch: {}/{} jobs ok, {}",
        summary.succeeded, summary.jobs, summary.totals
    );
    Ok(summary)
}

/// Each job gets its own store handle and view; only the rate limiter is shared.
fn run_job(
    job: &Job<'_>,
    manifest: &Manifest,
    settings: &Settings,
    limiter: &Arc<RateLimiter>,
    cancel: &CancelToken,
) -> Result<SessionReport> {
    let config = settings.session();
    match job {
        Job::Rankings(j) => {
            let params = j.params.validate()?;
            let snapshots = j
                .snapshots
                .iter()
                .map(|p| manifest.read(p))
                .collect::<Result<Vec<_>>>()?;
            let view = SnapshotView::new().route(&params.rankings_url(), snapshots);
            let mut view = Throttled::new(view, Arc::clone(limiter));
            let mut sink = UpsertSink::new(Store::open(&settings.db_path)?);
            Ok(run_rankings(&mut view, &mut sink, &params, &config, cancel)?)
        }
        Job::Profile(j) => {
            let view = SnapshotView::new()
                .route(&athlete_search_url(&j.name), vec![manifest.read(&j.search)?])
                .route("", vec![manifest.read(&j.profile)?]);
            let mut view = Throttled::new(view, Arc::clone(limiter));
            let mut sink = UpsertSink::new(Store::open(&settings.db_path)?);
            let athlete = AthleteRef {
                athlete_id: j.athlete_id,
                name: j.name.clone(),
            };
            Ok(run_profile(&mut view, &mut sink, &athlete, &config, cancel)?.results)
        }
    }
}
