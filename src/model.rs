use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rusqlite::types::Value;

use crate::extract::descriptors::RecordKind;
use crate::extract::fields::Problem;
use crate::extract::ExtractedRow;
use crate::params::ParameterSet;
use crate::upsert::{MergePolicy, Record, Table};

static ATHLETE_ID_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/athletes/(\d+)(?:/|$)").unwrap());

/// Why one row could not become a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionDiagnostic {
    pub kind: RecordKind,
    pub position: usize,
    pub field: &'static str,
    pub problem: Problem,
}

impl fmt::Display for ExtractionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {}: {} {}",
            self.kind.as_str(),
            self.position,
            self.field,
            self.problem
        )
    }
}

fn missing(row: &ExtractedRow, field: &'static str) -> ExtractionDiagnostic {
    let problem = row
        .diagnostic(field)
        .map(|d| d.problem.clone())
        .unwrap_or(Problem::Missing);
    ExtractionDiagnostic {
        kind: row.kind,
        position: row.position,
        field,
        problem,
    }
}

/// Fails on the first required field the extractor could not resolve.
fn check_required(row: &ExtractedRow) -> Result<(), ExtractionDiagnostic> {
    match row.missing_required() {
        Some(d) => Err(missing(row, d.field)),
        None => Ok(()),
    }
}

// ── Column values ──

fn text(v: &Option<String>) -> Value {
    v.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn int(v: Option<i64>) -> Value {
    v.map(Value::Integer).unwrap_or(Value::Null)
}

fn date(v: Option<NaiveDate>) -> Value {
    v.map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

// ── Athletes ──

pub static ATHLETES_TABLE: Table = Table {
    name: "athletes",
    key: &["athlete_id"],
    values: &[
        "athlete_name",
        "age",
        "gender",
        "country_code",
        "image_url",
        "athlete_profile_url",
    ],
    policy: MergePolicy::FillIfEmpty,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AthleteRecord {
    pub athlete_id: i64,
    pub athlete_name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub country_code: Option<String>,
    pub image_url: Option<String>,
    pub athlete_profile_url: Option<String>,
}

impl AthleteRecord {
    /// Identity seeded from a ranking row; stored only for athletes not
    /// yet known.
    pub fn from_ranking(row: &ExtractedRow, params: &ParameterSet) -> Result<Self, ExtractionDiagnostic> {
        let athlete_id = row.int("athlete_id").ok_or_else(|| missing(row, "athlete_id"))?;
        Ok(AthleteRecord {
            athlete_id,
            athlete_name: row.string("athlete_name"),
            age: row.int("age"),
            gender: Some(params.gender().code().to_string()),
            country_code: row.string("country_code"),
            image_url: row.string("image_url"),
            athlete_profile_url: row.string("athlete_profile_url"),
        })
    }

    /// Only the enrichment fields; everything else stays as persisted.
    pub fn enrichment(athlete_id: i64, hit: &SearchHit) -> Self {
        AthleteRecord {
            athlete_id,
            image_url: hit.image_url.clone(),
            athlete_profile_url: hit.profile_url.clone(),
            ..AthleteRecord::default()
        }
    }
}

impl Record for AthleteRecord {
    fn table() -> &'static Table {
        &ATHLETES_TABLE
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::Integer(self.athlete_id)]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.athlete_name),
            int(self.age),
            text(&self.gender),
            text(&self.country_code),
            text(&self.image_url),
            text(&self.athlete_profile_url),
        ]
    }
}

// ── Results ──

pub static RESULTS_TABLE: Table = Table {
    name: "results",
    key: &["athlete_id", "event", "time_text", "race_date", "competition"],
    values: &[
        "record_tags",
        "medal",
        "pool_length",
        "age_at_result",
        "comp_country_code",
    ],
    policy: MergePolicy::Overwrite,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub athlete_id: i64,
    pub event: String,
    pub time_text: String,
    pub race_date: Option<NaiveDate>,
    pub competition: Option<String>,
    pub record_tags: Option<String>,
    pub medal: Option<String>,
    pub pool_length: Option<String>,
    pub age_at_result: Option<i64>,
    pub comp_country_code: Option<String>,
}

impl ResultRecord {
    pub fn from_row(row: &ExtractedRow, athlete_id: i64) -> Result<Self, ExtractionDiagnostic> {
        check_required(row)?;
        Ok(ResultRecord {
            athlete_id,
            event: row.string("event").ok_or_else(|| missing(row, "event"))?,
            time_text: row.string("time_text").ok_or_else(|| missing(row, "time_text"))?,
            race_date: row.date("race_date"),
            competition: row.string("competition"),
            record_tags: row.string("record_tags"),
            medal: row.string("medal"),
            pool_length: row.string("pool_length"),
            age_at_result: row.int("age_at_result"),
            comp_country_code: row.string("comp_country_code"),
        })
    }
}

impl Record for ResultRecord {
    fn table() -> &'static Table {
        &RESULTS_TABLE
    }

    fn key(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.athlete_id),
            Value::Text(self.event.clone()),
            Value::Text(self.time_text.clone()),
            date(self.race_date),
            text(&self.competition),
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.record_tags),
            text(&self.medal),
            text(&self.pool_length),
            int(self.age_at_result),
            text(&self.comp_country_code),
        ]
    }
}

// ── Rankings ──

pub static RANKINGS_TABLE: Table = Table {
    name: "rankings",
    key: &[
        "gender",
        "distance",
        "stroke",
        "pool_configuration",
        "athlete_id",
        "race_date",
        "time_text",
    ],
    values: &[
        "overall_rank",
        "country_code",
        "points",
        "tag",
        "record_tag",
        "competition",
        "location_country_code",
        "athlete_name",
        "age",
    ],
    policy: MergePolicy::Overwrite,
};

/// One ranking snapshot row. `athlete_name` and `age` are denormalised at
/// ranking time and never feed back into an existing athlete row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    pub gender: String,
    pub distance: u16,
    pub stroke: String,
    pub pool_configuration: String,
    pub athlete_id: i64,
    pub race_date: Option<NaiveDate>,
    pub time_text: String,
    pub overall_rank: i64,
    pub country_code: Option<String>,
    pub points: Option<i64>,
    pub tag: Option<String>,
    pub record_tag: Option<String>,
    pub competition: Option<String>,
    pub location_country_code: Option<String>,
    pub athlete_name: Option<String>,
    pub age: Option<i64>,
}

impl RankingEntry {
    pub fn from_row(row: &ExtractedRow, params: &ParameterSet) -> Result<Self, ExtractionDiagnostic> {
        check_required(row)?;
        Ok(RankingEntry {
            gender: params.gender().code().to_string(),
            distance: params.distance(),
            stroke: params.stroke().as_str().to_string(),
            pool_configuration: params.pool().as_str().to_string(),
            athlete_id: row.int("athlete_id").ok_or_else(|| missing(row, "athlete_id"))?,
            race_date: row.date("race_date"),
            time_text: row.string("time_text").ok_or_else(|| missing(row, "time_text"))?,
            overall_rank: row.int("overall_rank").unwrap_or(0),
            country_code: row.string("country_code"),
            points: row.int("points"),
            tag: row.string("tag"),
            record_tag: row.string("record_tag"),
            competition: row.string("competition"),
            location_country_code: row.string("location_country_code"),
            athlete_name: row.string("athlete_name"),
            age: row.int("age"),
        })
    }
}

impl Record for RankingEntry {
    fn table() -> &'static Table {
        &RANKINGS_TABLE
    }

    fn key(&self) -> Vec<Value> {
        vec![
            Value::Text(self.gender.clone()),
            Value::Integer(self.distance as i64),
            Value::Text(self.stroke.clone()),
            Value::Text(self.pool_configuration.clone()),
            Value::Integer(self.athlete_id),
            date(self.race_date),
            Value::Text(self.time_text.clone()),
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.overall_rank),
            text(&self.country_code),
            int(self.points),
            text(&self.tag),
            text(&self.record_tag),
            text(&self.competition),
            text(&self.location_country_code),
            text(&self.athlete_name),
            int(self.age),
        ]
    }
}

// ── Athlete search ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub position: usize,
    pub athlete_id: Option<i64>,
    pub image_url: Option<String>,
    pub profile_url: Option<String>,
}

impl SearchHit {
    pub fn from_row(row: &ExtractedRow) -> Self {
        let profile_url = row.string("profile_url");
        let athlete_id = row
            .int("athlete_id")
            .or_else(|| profile_url.as_deref().and_then(athlete_id_from_url));
        SearchHit {
            position: row.position,
            athlete_id,
            image_url: row.string("image_url"),
            profile_url,
        }
    }
}

pub fn athlete_id_from_url(url: &str) -> Option<i64> {
    ATHLETE_ID_IN_URL
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fields::{FieldDiagnostic, Scalar};
    use std::collections::BTreeMap;

    fn row(kind: RecordKind, fields: &[(&'static str, Scalar)]) -> ExtractedRow {
        ExtractedRow {
            kind,
            position: 3,
            fields: fields.iter().cloned().collect::<BTreeMap<_, _>>(),
            diagnostics: Vec::new(),
        }
    }

    fn params() -> ParameterSet {
        ParameterSet::parse("F", 200, "MEDLEY", "LCM").unwrap()
    }

    #[test]
    fn ranking_rank_defaults_to_zero() {
        let r = row(
            RecordKind::Ranking,
            &[
                ("athlete_id", Scalar::Int(7)),
                ("time_text", Scalar::Text("2:06.12".into())),
            ],
        );
        let entry = RankingEntry::from_row(&r, &params()).unwrap();
        assert_eq!(entry.overall_rank, 0);
        assert_eq!(entry.gender, "F");
        assert_eq!(entry.stroke, "MEDLEY");
        assert_eq!(entry.key().len(), RANKINGS_TABLE.key.len());
        assert_eq!(entry.values().len(), RANKINGS_TABLE.values.len());
    }

    #[test]
    fn ranking_without_athlete_is_invalid() {
        let r = row(RecordKind::Ranking, &[("time_text", Scalar::Text("2:06.12".into()))]);
        let diag = RankingEntry::from_row(&r, &params()).unwrap_err();
        assert_eq!(diag.field, "athlete_id");
        assert_eq!(diag.position, 3);
        assert_eq!(diag.problem, Problem::Missing);
    }

    #[test]
    fn result_requires_event() {
        let mut r = row(RecordKind::PersonalBest, &[("time_text", Scalar::Text("58.00".into()))]);
        r.diagnostics.push(FieldDiagnostic {
            field: "event",
            problem: Problem::Empty,
            required: true,
        });
        let diag = ResultRecord::from_row(&r, 1).unwrap_err();
        assert_eq!(diag.field, "event");
        assert_eq!(diag.problem, Problem::Empty);
        assert!(diag.to_string().starts_with("personal_best row 3: event"));
    }

    #[test]
    fn null_key_parts_stay_null() {
        let r = row(
            RecordKind::PersonalBest,
            &[
                ("event", Scalar::Text("50m Freestyle".into())),
                ("time_text", Scalar::Text("21.04".into())),
            ],
        );
        let rec = ResultRecord::from_row(&r, 1).unwrap();
        let key = rec.key();
        assert_eq!(key[3], Value::Null);
        assert_eq!(key[4], Value::Null);
    }

    #[test]
    fn search_hit_id_falls_back_to_url() {
        let r = row(
            RecordKind::AthleteSearch,
            &[(
                "profile_url",
                Scalar::Text("https://www.worldaquatics.com/athletes/1011981/leon-marchand".into()),
            )],
        );
        let hit = SearchHit::from_row(&r);
        assert_eq!(hit.athlete_id, Some(1011981));
        assert_eq!(athlete_id_from_url("https://x/athletes/42"), Some(42));
        assert_eq!(athlete_id_from_url("https://x/athletes/leon"), None);
    }

    #[test]
    fn enrichment_touches_only_urls() {
        let hit = SearchHit {
            position: 0,
            athlete_id: Some(5),
            image_url: Some("https://img/5.png".into()),
            profile_url: None,
        };
        let rec = AthleteRecord::enrichment(5, &hit);
        let values = rec.values();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[4], Value::Text("https://img/5.png".into()));
    }
}
