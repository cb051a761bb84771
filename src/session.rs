use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::extract::descriptors::{TableDescriptor, ATHLETE_SEARCH, BEST_RESULTS_SECTION, PERSONAL_BESTS, RANKINGS};
use crate::extract::normalize::DEFAULT_ORIGIN;
use crate::extract::RowExtractor;
use crate::model::{AthleteRecord, RankingEntry, ResultRecord, SearchHit};
use crate::pagination::{exhaust, PaginationSpec, Termination};
use crate::params::{athlete_search_url, ParameterSet};
use crate::upsert::{Backend, Record, UpsertOutcome, UpsertSink};
use crate::view::{CancelToken, PageView, RowHandle};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub origin: String,
    pub settle: Duration,
    pub max_rounds: usize,
    pub nav_timeout: Duration,
    /// Insert athletes first seen in a ranking table. Known athletes are
    /// never touched.
    pub seed_athletes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            origin: DEFAULT_ORIGIN.to_string(),
            settle: Duration::from_millis(2000),
            max_rounds: 200,
            nav_timeout: Duration::from_secs(60),
            seed_athletes: true,
        }
    }
}

impl SessionConfig {
    fn pagination<'d>(&self, descriptor: &'d TableDescriptor) -> PaginationSpec<'d> {
        PaginationSpec {
            ready_selector: descriptor.ready_selector,
            row_selector: descriptor.row_selector,
            control_selector: descriptor.control_selector,
            max_rounds: self.max_rounds,
            settle: self.settle,
            ready_timeout: self.nav_timeout,
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Rows handed over by pagination.
    pub attempted: usize,
    /// Rows that became a typed record.
    pub extracted: usize,
    pub persisted: usize,
    /// Rows dropped because a key-bearing field did not resolve.
    pub skipped: usize,
    /// Records the store refused.
    pub failed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rank_mismatches: usize,
    pub athletes_seeded: usize,
    pub termination: Option<Termination>,
}

impl SessionReport {
    fn record(&mut self, outcome: UpsertOutcome) {
        self.persisted += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Adds another report's counters. The termination is not carried over.
    pub fn absorb(&mut self, other: &SessionReport) {
        self.attempted += other.attempted;
        self.extracted += other.extracted;
        self.persisted += other.persisted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.rank_mismatches += other.rank_mismatches;
        self.athletes_seeded += other.athletes_seeded;
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows, {} extracted, {} persisted ({} new, {} updated, {} unchanged), {} skipped, {} failed",
            self.attempted,
            self.extracted,
            self.persisted,
            self.inserted,
            self.updated,
            self.unchanged,
            self.skipped,
            self.failed
        )
    }
}

fn navigate<V: PageView + ?Sized>(
    view: &mut V,
    url: &str,
    config: &SessionConfig,
    cancel: &CancelToken,
) -> Result<(), SessionError> {
    cancel.check()?;
    debug!("navigating to {}", url);
    view.navigate(url, config.nav_timeout)?;
    Ok(())
}

fn persist<B: Backend, R: Record>(
    sink: &mut UpsertSink<B>,
    record: &R,
    report: &mut SessionReport,
    label: fmt::Arguments<'_>,
) {
    match sink.apply(record) {
        Ok(outcome) => report.record(outcome),
        Err(e) => {
            warn!("failed to persist {}: {}", label, e);
            report.failed += 1;
        }
    }
}

// ── Rankings ──

/// Load the whole ranking table for one parameter set and persist every
/// usable row.
pub fn run_rankings<V: PageView + ?Sized, B: Backend>(
    view: &mut V,
    sink: &mut UpsertSink<B>,
    params: &ParameterSet,
    config: &SessionConfig,
    cancel: &CancelToken,
) -> Result<SessionReport, SessionError> {
    navigate(view, &params.rankings_url(), config, cancel)?;
    let report = collect_rankings(view, sink, params, config, cancel)?;
    info!("[{}] {}", params, report);
    Ok(report)
}

/// Same as [`run_rankings`] on a view that already shows the table.
pub fn collect_rankings<V: PageView + ?Sized, B: Backend>(
    view: &mut V,
    sink: &mut UpsertSink<B>,
    params: &ParameterSet,
    config: &SessionConfig,
    cancel: &CancelToken,
) -> Result<SessionReport, SessionError> {
    let loaded = exhaust(view, &config.pagination(&RANKINGS), cancel)?;
    let extractor = RowExtractor::new(&RANKINGS, &config.origin);

    let mut report = SessionReport {
        attempted: loaded.rows.len(),
        termination: Some(loaded.termination),
        ..SessionReport::default()
    };

    for handle in &loaded.rows {
        let row = extractor.extract_handle(handle);
        for d in row.diagnostics.iter().filter(|d| !d.required) {
            debug!("[{}] row {}: {} {}", params, row.position, d.field, d.problem);
        }

        let entry = match RankingEntry::from_row(&row, params) {
            Ok(e) => e,
            Err(diag) => {
                warn!("[{}] skipping {}", params, diag);
                report.skipped += 1;
                continue;
            }
        };
        report.extracted += 1;

        if let Some(rank) = row.int("overall_rank") {
            if rank != handle.position as i64 + 1 {
                warn!(
                    "[{}] rank {} at position {} ({})",
                    params,
                    rank,
                    handle.position + 1,
                    entry.time_text
                );
                report.rank_mismatches += 1;
            }
        }

        if config.seed_athletes {
            if let Ok(athlete) = AthleteRecord::from_ranking(&row, params) {
                match sink.insert_if_absent(&athlete) {
                    Ok(UpsertOutcome::Unchanged) => {}
                    Ok(_) => report.athletes_seeded += 1,
                    Err(e) => warn!("failed to seed athlete {}: {}", athlete.athlete_id, e),
                }
            }
        }

        persist(
            sink,
            &entry,
            &mut report,
            format_args!("[{}] ranking row {}", params, handle.position),
        );
    }

    Ok(report)
}

// ── Athlete profile ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AthleteRef {
    pub athlete_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileReport {
    /// The search row that was used, if any.
    pub hit: Option<SearchHit>,
    /// False when the search had no row with the athlete's id and the first
    /// row was used instead.
    pub matched_by_id: bool,
    pub enrichment: Option<UpsertOutcome>,
    pub results: SessionReport,
}

/// Search the athlete by name, fill in missing image/profile URLs, then
/// collect the personal-best table from the profile page.
pub fn run_profile<V: PageView + ?Sized, B: Backend>(
    view: &mut V,
    sink: &mut UpsertSink<B>,
    athlete: &AthleteRef,
    config: &SessionConfig,
    cancel: &CancelToken,
) -> Result<ProfileReport, SessionError> {
    let mut report = ProfileReport::default();

    navigate(view, &athlete_search_url(&athlete.name), config, cancel)?;
    let search = exhaust(view, &config.pagination(&ATHLETE_SEARCH), cancel)?;
    let Some((hit, by_id)) = pick_search_hit(&search.rows, athlete.athlete_id, &config.origin) else {
        warn!("no search results for {} ({})", athlete.name, athlete.athlete_id);
        return Ok(report);
    };
    if !by_id {
        warn!(
            "athlete {} not found by id in search results; using the first row for {}",
            athlete.athlete_id, athlete.name
        );
    }
    report.matched_by_id = by_id;

    let enrichment = AthleteRecord::enrichment(athlete.athlete_id, &hit);
    match sink.apply(&enrichment) {
        Ok(outcome) => report.enrichment = Some(outcome),
        Err(e) => warn!("failed to enrich athlete {}: {}", athlete.athlete_id, e),
    }

    let Some(profile_url) = hit.profile_url.clone() else {
        warn!("no profile URL for {}; skipping personal bests", athlete.name);
        report.hit = Some(hit);
        return Ok(report);
    };
    report.hit = Some(hit);

    navigate(view, &profile_url, config, cancel)?;
    report.results = collect_personal_bests(view, sink, athlete.athlete_id, config, cancel)?;
    info!("[{} {}] {}", athlete.athlete_id, athlete.name, report.results);
    Ok(report)
}

fn pick_search_hit(rows: &[RowHandle], athlete_id: i64, origin: &str) -> Option<(SearchHit, bool)> {
    let extractor = RowExtractor::new(&ATHLETE_SEARCH, origin);
    let hits: Vec<SearchHit> = rows
        .iter()
        .map(|h| SearchHit::from_row(&extractor.extract_handle(h)))
        .collect();
    if let Some(hit) = hits.iter().find(|h| h.athlete_id == Some(athlete_id)) {
        return Some((hit.clone(), true));
    }
    hits.into_iter().next().map(|h| (h, false))
}

/// Personal-best rows on an athlete page. A page without the section yields
/// an empty report.
pub fn collect_personal_bests<V: PageView + ?Sized, B: Backend>(
    view: &mut V,
    sink: &mut UpsertSink<B>,
    athlete_id: i64,
    config: &SessionConfig,
    cancel: &CancelToken,
) -> Result<SessionReport, SessionError> {
    cancel.check()?;
    if view.count(BEST_RESULTS_SECTION)? == 0 {
        warn!("athlete {} has no personal best section", athlete_id);
        return Ok(SessionReport::default());
    }

    let loaded = exhaust(view, &config.pagination(&PERSONAL_BESTS), cancel)?;
    let extractor = RowExtractor::new(&PERSONAL_BESTS, &config.origin);
    let mut report = SessionReport {
        attempted: loaded.rows.len(),
        termination: Some(loaded.termination),
        ..SessionReport::default()
    };

    for handle in &loaded.rows {
        let row = extractor.extract_handle(handle);
        match ResultRecord::from_row(&row, athlete_id) {
            Ok(result) => {
                report.extracted += 1;
                persist(
                    sink,
                    &result,
                    &mut report,
                    format_args!("athlete {} result {}", athlete_id, result.event),
                );
            }
            Err(diag) => {
                warn!("athlete {}: skipping {}", athlete_id, diag);
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::error::ViewError;
    use crate::upsert::MemoryBackend;
    use crate::view::{ControlState, SnapshotView};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            settle: Duration::from_millis(1500),
            ..SessionConfig::default()
        }
    }

    fn params() -> ParameterSet {
        ParameterSet::parse("M", 200, "MEDLEY", "SCM").unwrap()
    }

    fn sqlite_sink() -> UpsertSink<Store> {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
        UpsertSink::new(store)
    }

    fn rankings_view() -> SnapshotView {
        SnapshotView::single(vec![fixture("rankings_page1"), fixture("rankings_page2")])
    }

    #[test]
    fn malformed_row_is_skipped_and_the_rest_persisted() {
        let mut view = rankings_view();
        let mut sink = sqlite_sink();
        let report = collect_rankings(&mut view, &mut sink, &params(), &config(), &CancelToken::new()).unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.extracted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.termination, Some(Termination::Stable(ControlState::Disabled)));
        assert_eq!(view.clicks(), 1);
        assert_eq!(view.settled(), Duration::from_millis(1500));

        let stats = sink.backend().table_counts().unwrap();
        assert_eq!(stats.rankings, 2);
        assert_eq!(stats.athletes, 2);
    }

    #[test]
    fn rerun_converges() {
        let mut sink = sqlite_sink();
        let cancel = CancelToken::new();
        collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &cancel).unwrap();
        let again = collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &cancel).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.unchanged, 2);
        assert_eq!(again.athletes_seeded, 0);
        assert_eq!(sink.backend().table_counts().unwrap().rankings, 2);
    }

    #[test]
    fn rank_gap_is_reported_not_fatal() {
        // the third row carries rank 4 at position 3
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let report =
            collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(report.rank_mismatches, 1);
        assert_eq!(sink.backend().len("rankings"), 2);
    }

    #[test]
    fn ranking_rows_never_touch_known_athletes() {
        let mut sink = sqlite_sink();
        sink.apply(&AthleteRecord {
            athlete_id: 1011981,
            athlete_name: Some("Léon Marchand".into()),
            ..AthleteRecord::default()
        })
        .unwrap();
        let before = sink.backend().find_athlete(1011981).unwrap().unwrap();

        let report =
            collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(report.athletes_seeded, 1);

        let after = sink.backend().find_athlete(1011981).unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.image_url, None);
        let updated_at: Option<String> = sink
            .backend()
            .conn()
            .query_row("SELECT updated_at FROM athletes WHERE athlete_id = 1011981", [], |r| r.get(0))
            .unwrap();
        assert_eq!(updated_at, None);

        // the unknown athlete on the page was seeded in full
        let scott = sink.backend().find_athlete(1002374).unwrap().unwrap();
        assert_eq!(scott.country_code.as_deref(), Some("GBR"));

        // profile enrichment can still fill the URLs afterwards
        let profile = run_profile(&mut profile_view(), &mut sink, &leon(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(profile.enrichment, Some(UpsertOutcome::Updated));
        let enriched = sink.backend().find_athlete(1011981).unwrap().unwrap();
        assert_eq!(enriched.image_url.as_deref(), Some("https://images.example.com/1011981.png"));
        assert_eq!(enriched.athlete_name.as_deref(), Some("Léon Marchand"));
    }

    #[test]
    fn store_refusal_is_counted_and_the_session_continues() {
        let mut sink = sqlite_sink();
        sink.backend()
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_scott BEFORE INSERT ON rankings
                 WHEN NEW.athlete_id = 1002374
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let report =
            collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(report.extracted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.persisted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(sink.backend().table_counts().unwrap().rankings, 1);

        // the refused record left no open transaction behind
        let again =
            collect_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.failed, 1);
    }

    /// Delegates to a snapshot view and raises the cancel flag on the first
    /// click, as an operator interrupt arriving mid-pagination would.
    struct CancelOnClick {
        inner: SnapshotView,
        cancel: CancelToken,
    }

    impl PageView for CancelOnClick {
        fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ViewError> {
            self.inner.navigate(url, timeout)
        }
        fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ViewError> {
            self.inner.wait_for(selector, timeout)
        }
        fn count(&mut self, selector: &str) -> Result<usize, ViewError> {
            self.inner.count(selector)
        }
        fn control_state(&mut self, selector: &str) -> Result<ControlState, ViewError> {
            self.inner.control_state(selector)
        }
        fn click(&mut self, selector: &str) -> Result<(), ViewError> {
            self.inner.click(selector)?;
            self.cancel.cancel();
            Ok(())
        }
        fn settle(&mut self, delay: Duration) -> Result<(), ViewError> {
            self.inner.settle(delay)
        }
        fn row_markup(&mut self, selector: &str) -> Result<Vec<String>, ViewError> {
            self.inner.row_markup(selector)
        }
    }

    #[test]
    fn cancel_after_first_click_ends_the_session() {
        let cancel = CancelToken::new();
        let mut view = CancelOnClick {
            inner: rankings_view(),
            cancel: cancel.clone(),
        };
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let err = collect_rankings(&mut view, &mut sink, &params(), &config(), &cancel).unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(view.inner.clicks(), 1);
        assert_eq!(view.inner.settled(), Duration::ZERO);
        assert_eq!(sink.backend().len("rankings"), 0);
        assert_eq!(sink.backend().len("athletes"), 0);
    }

    #[test]
    fn seeding_can_be_disabled() {
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let config = SessionConfig {
            seed_athletes: false,
            ..config()
        };
        collect_rankings(&mut rankings_view(), &mut sink, &params(), &config, &CancelToken::new()).unwrap();
        assert_eq!(sink.backend().len("athletes"), 0);
        assert_eq!(sink.backend().len("rankings"), 2);
    }

    #[test]
    fn missing_table_fails_the_session() {
        let mut view = SnapshotView::single(vec!["<html><body><p>maintenance</p></body></html>".into()]);
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let err = collect_rankings(&mut view, &mut sink, &params(), &config(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SessionError::Navigation(ViewError::Timeout { .. })));
    }

    #[test]
    fn run_rankings_navigates_to_the_query() {
        let mut view = SnapshotView::new().route(
            "https://www.worldaquatics.com/swimming/rankings?gender=M&distance=200",
            vec![fixture("rankings_page1"), fixture("rankings_page2")],
        );
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let report = run_rankings(&mut view, &mut sink, &params(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(report.persisted, 2);
    }

    #[test]
    fn cancelled_session_stops_before_navigation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let err = run_rankings(&mut rankings_view(), &mut sink, &params(), &config(), &cancel).unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
    }

    fn profile_view() -> SnapshotView {
        SnapshotView::new()
            .route("https://www.worldaquatics.com/athletes?", vec![fixture("athlete_search")])
            .route(
                "https://www.worldaquatics.com/athletes/1011981/",
                vec![fixture("athlete_profile")],
            )
    }

    fn leon() -> AthleteRef {
        AthleteRef {
            athlete_id: 1011981,
            name: "Leon Marchand".into(),
        }
    }

    #[test]
    fn profile_flow_enriches_and_collects_results() {
        let mut sink = sqlite_sink();
        sink.apply(&AthleteRecord {
            athlete_id: 1011981,
            athlete_name: Some("Leon MARCHAND".into()),
            ..AthleteRecord::default()
        })
        .unwrap();

        let report = run_profile(&mut profile_view(), &mut sink, &leon(), &config(), &CancelToken::new()).unwrap();
        assert!(report.matched_by_id);
        assert_eq!(report.enrichment, Some(UpsertOutcome::Updated));
        assert_eq!(report.results.attempted, 3);
        assert_eq!(report.results.persisted, 2);
        assert_eq!(report.results.skipped, 1);

        let athlete = sink.backend().find_athlete(1011981).unwrap().unwrap();
        assert_eq!(
            athlete.athlete_profile_url.as_deref(),
            Some("https://www.worldaquatics.com/athletes/1011981/leon-marchand")
        );
        assert_eq!(athlete.image_url.as_deref(), Some("https://images.example.com/1011981.png"));

        let again = run_profile(&mut profile_view(), &mut sink, &leon(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(again.enrichment, Some(UpsertOutcome::Unchanged));
        assert_eq!(again.results.unchanged, 2);
        assert_eq!(sink.backend().table_counts().unwrap().results, 2);
    }

    #[test]
    fn unknown_id_falls_back_to_first_row() {
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let stranger = AthleteRef {
            athlete_id: 42,
            name: "Leon Marchand".into(),
        };
        let view = SnapshotView::new()
            .route("https://www.worldaquatics.com/athletes?", vec![fixture("athlete_search")])
            .route("https://www.worldaquatics.com/athletes/1000001/", vec![fixture("athlete_profile")]);
        let report = run_profile(&mut { view }, &mut sink, &stranger, &config(), &CancelToken::new()).unwrap();
        assert!(!report.matched_by_id);
        assert_eq!(report.hit.unwrap().athlete_id, Some(1000001));
    }

    #[test]
    fn profile_without_best_results_section() {
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let view = SnapshotView::new()
            .route("https://www.worldaquatics.com/athletes?", vec![fixture("athlete_search")])
            .route("", vec!["<html><body><h1>Leon MARCHAND</h1></body></html>".into()]);
        let report = run_profile(&mut { view }, &mut sink, &leon(), &config(), &CancelToken::new()).unwrap();
        assert_eq!(report.results, SessionReport::default());
        assert_eq!(report.enrichment, Some(UpsertOutcome::Inserted));
    }

    #[test]
    fn empty_search_is_not_an_error() {
        let mut sink = UpsertSink::new(MemoryBackend::new());
        let empty = r#"<html><body><table><tbody class="js-athletes-table-body"></tbody></table></body></html>"#;
        let mut view = SnapshotView::new().route("", vec![empty.into()]);
        let report = run_profile(&mut view, &mut sink, &leon(), &config(), &CancelToken::new()).unwrap();
        assert!(report.hit.is_none());
        assert_eq!(sink.backend().len("athletes"), 0);
    }
}
