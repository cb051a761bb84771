use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const BASE_RANKINGS_URL: &str = "https://www.worldaquatics.com/swimming/rankings";
const BASE_ATHLETES_SEARCH_URL: &str = "https://www.worldaquatics.com/athletes";

static RANKINGS_BASE: LazyLock<Url> = LazyLock::new(|| Url::parse(BASE_RANKINGS_URL).unwrap());
static SEARCH_BASE: LazyLock<Url> = LazyLock::new(|| Url::parse(BASE_ATHLETES_SEARCH_URL).unwrap());

pub const DISTANCES: [u16; 6] = [50, 100, 200, 400, 800, 1500];

const SPRINT_STROKES: &[Stroke] = &[
    Stroke::Freestyle,
    Stroke::Backstroke,
    Stroke::Breaststroke,
    Stroke::Butterfly,
];
const MIDDLE_STROKES: &[Stroke] = &[
    Stroke::Freestyle,
    Stroke::Backstroke,
    Stroke::Breaststroke,
    Stroke::Butterfly,
    Stroke::Medley,
];

/// Which strokes are ranked at each distance.
pub const VALID_COMBOS: &[(u16, &[Stroke])] = &[
    (50, SPRINT_STROKES),
    (100, SPRINT_STROKES),
    (200, MIDDLE_STROKES),
    (400, &[Stroke::Freestyle, Stroke::Medley]),
    (800, &[Stroke::Freestyle]),
    (1500, &[Stroke::Freestyle]),
];

pub fn valid_strokes(distance: u16) -> Option<&'static [Stroke]> {
    VALID_COMBOS
        .iter()
        .find(|(d, _)| *d == distance)
        .map(|(_, strokes)| *strokes)
}

// ── Axes ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "M" | "m" => Ok(Gender::Male),
            "F" | "f" => Ok(Gender::Female),
            other => Err(ValidationError::Gender(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stroke {
    Freestyle,
    Backstroke,
    Breaststroke,
    Butterfly,
    Medley,
}

impl Stroke {
    pub fn as_str(self) -> &'static str {
        match self {
            Stroke::Freestyle => "FREESTYLE",
            Stroke::Backstroke => "BACKSTROKE",
            Stroke::Breaststroke => "BREASTSTROKE",
            Stroke::Butterfly => "BUTTERFLY",
            Stroke::Medley => "MEDLEY",
        }
    }
}

impl FromStr for Stroke {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREESTYLE" => Ok(Stroke::Freestyle),
            "BACKSTROKE" => Ok(Stroke::Backstroke),
            "BREASTSTROKE" => Ok(Stroke::Breaststroke),
            "BUTTERFLY" => Ok(Stroke::Butterfly),
            "MEDLEY" => Ok(Stroke::Medley),
            _ => Err(ValidationError::Stroke(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolConfiguration {
    /// Short course, 25m pool.
    Scm,
    /// Long course, 50m pool.
    Lcm,
}

impl PoolConfiguration {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolConfiguration::Scm => "SCM",
            PoolConfiguration::Lcm => "LCM",
        }
    }
}

impl FromStr for PoolConfiguration {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCM" => Ok(PoolConfiguration::Scm),
            "LCM" => Ok(PoolConfiguration::Lcm),
            _ => Err(ValidationError::Pool(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimesMode {
    #[default]
    AllTimes,
    BestTimes,
}

impl TimesMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimesMode::AllTimes => "ALL_TIMES",
            TimesMode::BestTimes => "BEST_TIMES",
        }
    }
}

impl FromStr for TimesMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL_TIMES" => Ok(TimesMode::AllTimes),
            "BEST_TIMES" => Ok(TimesMode::BestTimes),
            _ => Err(ValidationError::TimesMode(s.to_string())),
        }
    }
}

// ── Parameter set ──

/// One validated ranking query. Immutable once built; the `with_*` methods
/// return a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    gender: Gender,
    distance: u16,
    stroke: Stroke,
    pool: PoolConfiguration,
    year: Option<u16>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    times_mode: TimesMode,
    region_id: Option<String>,
    country_id: Option<String>,
}

impl ParameterSet {
    pub fn new(
        gender: Gender,
        distance: u16,
        stroke: Stroke,
        pool: PoolConfiguration,
    ) -> Result<Self, ValidationError> {
        let strokes = valid_strokes(distance).ok_or(ValidationError::Distance(distance))?;
        if !strokes.contains(&stroke) {
            let mut valid: Vec<&str> = strokes.iter().map(|s| s.as_str()).collect();
            valid.sort_unstable();
            return Err(ValidationError::Combination {
                distance,
                stroke: stroke.as_str().to_string(),
                valid: valid.join(", "),
            });
        }
        Ok(ParameterSet {
            gender,
            distance,
            stroke,
            pool,
            year: None,
            start_date: None,
            end_date: None,
            times_mode: TimesMode::default(),
            region_id: None,
            country_id: None,
        })
    }

    /// Parse and validate the four primary axes from their textual codes.
    pub fn parse(
        gender: &str,
        distance: u16,
        stroke: &str,
        pool: &str,
    ) -> Result<Self, ValidationError> {
        ParameterSet::new(gender.parse()?, distance, stroke.parse()?, pool.parse()?)
    }

    pub fn with_year(mut self, year: Option<u16>) -> Self {
        self.year = year;
        self
    }

    pub fn with_window(
        mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, ValidationError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ValidationError::Window {
                    start: s.to_string(),
                    end: e.to_string(),
                });
            }
        }
        self.start_date = start;
        self.end_date = end;
        Ok(self)
    }

    pub fn with_times_mode(mut self, mode: TimesMode) -> Self {
        self.times_mode = mode;
        self
    }

    pub fn with_region(mut self, region_id: Option<String>) -> Self {
        self.region_id = region_id.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_country(mut self, country_id: Option<String>) -> Self {
        self.country_id = country_id.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn distance(&self) -> u16 {
        self.distance
    }

    pub fn stroke(&self) -> Stroke {
        self.stroke
    }

    pub fn pool(&self) -> PoolConfiguration {
        self.pool
    }

    /// Serialise as query parameters against the rankings base path.
    pub fn rankings_url(&self) -> String {
        let date = |d: Option<NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
        let query = [
            ("gender", self.gender.code().to_string()),
            ("distance", self.distance.to_string()),
            ("stroke", self.stroke.as_str().to_string()),
            ("poolConfiguration", self.pool.as_str().to_string()),
            ("year", self.year.map(|y| y.to_string()).unwrap_or_else(|| "all".into())),
            ("startDate", date(self.start_date)),
            ("endDate", date(self.end_date)),
            ("timesMode", self.times_mode.as_str().to_string()),
            ("regionId", self.region_id.clone().unwrap_or_else(|| "all".into())),
            ("countryId", self.country_id.clone().unwrap_or_default()),
        ];
        let mut url = RANKINGS_BASE.clone();
        url.query_pairs_mut().extend_pairs(query.iter());
        url.to_string()
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.gender.code(),
            self.distance,
            self.stroke.as_str(),
            self.pool.as_str()
        )
    }
}

/// Unvalidated parameters as they appear in batch manifests. Validation is
/// deferred so one bad entry fails only its own query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParameters {
    pub gender: String,
    pub distance: u16,
    pub stroke: String,
    pub pool: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub times_mode: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub country_id: Option<String>,
}

impl RawParameters {
    pub fn validate(&self) -> Result<ParameterSet, ValidationError> {
        let times_mode = match &self.times_mode {
            Some(m) => m.parse()?,
            None => TimesMode::default(),
        };
        Ok(
            ParameterSet::parse(&self.gender, self.distance, &self.stroke, &self.pool)?
                .with_year(self.year)
                .with_window(self.start_date, self.end_date)?
                .with_times_mode(times_mode)
                .with_region(self.region_id.clone())
                .with_country(self.country_id.clone()),
        )
    }

    pub fn label(&self) -> String {
        format!("{} {} {} {}", self.gender, self.distance, self.stroke, self.pool)
    }
}

/// Every valid (gender, pool, distance, stroke) combination.
pub fn all_parameter_sets(pools: &[PoolConfiguration]) -> Vec<ParameterSet> {
    let mut sets = Vec::new();
    for gender in Gender::ALL {
        for &pool in pools {
            for (distance, strokes) in VALID_COMBOS {
                for &stroke in strokes.iter() {
                    if let Ok(p) = ParameterSet::new(gender, *distance, stroke, pool) {
                        sets.push(p);
                    }
                }
            }
        }
    }
    sets
}

pub fn athlete_search_url(name: &str) -> String {
    let mut url = SEARCH_BASE.clone();
    url.query_pairs_mut()
        .append_pair("gender", "")
        .append_pair("discipline", "SW")
        .append_pair("nationality", "")
        .append_pair("name", name);
    url.to_string()
}
