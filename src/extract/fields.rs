use std::fmt;

use chrono::NaiveDate;

use super::normalize::{clean_text, parse_int, Normalizer};
use super::row::{CellAccessor, Target};

/// How a located element becomes raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    Text,
    Attr(&'static str),
    /// Every match's trimmed text, empties skipped, joined with `", "`.
    Joined,
}

/// Post-read filter; a value that fails it is treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    MaxLen(usize),
    NotPlaceholder(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub target: Target,
    pub read: Read,
    pub guard: Option<Guard>,
    /// Once the target element exists this locator decides the field, even
    /// when it reads nothing; later fallbacks are not tried.
    pub exclusive: bool,
}

impl Locator {
    pub const fn text(target: Target) -> Self {
        Locator { target, read: Read::Text, guard: None, exclusive: false }
    }

    pub const fn attr(target: Target, name: &'static str) -> Self {
        Locator { target, read: Read::Attr(name), guard: None, exclusive: false }
    }

    pub const fn joined(target: Target) -> Self {
        Locator { target, read: Read::Joined, guard: None, exclusive: false }
    }

    pub const fn guarded(self, guard: Guard) -> Self {
        Locator { guard: Some(guard), ..self }
    }

    pub const fn exclusive(self) -> Self {
        Locator { exclusive: true, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    Text,
    Int,
    Date,
    Url,
}

/// One declared field: a primary locator, fallbacks in order, and the
/// normalisation applied to whichever locator resolves first.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub locators: &'static [Locator],
    pub normalize: Normalize,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// No locator resolved to an element.
    Missing,
    /// The element exists but carries no usable text.
    Empty,
    /// Text was present but did not normalise.
    Unparseable(String),
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Missing => write!(f, "not found"),
            Problem::Empty => write!(f, "empty"),
            Problem::Unparseable(raw) => write!(f, "could not parse {:?}", raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiagnostic {
    pub field: &'static str,
    pub problem: Problem,
    pub required: bool,
}

pub enum FieldOutcome {
    Value(Scalar),
    Absent(Problem),
}

/// `None` means the locator did not resolve and the next one should be tried.
fn read_locator<R: CellAccessor + ?Sized>(row: &R, loc: &Locator) -> Option<Option<String>> {
    let raw = match loc.read {
        Read::Text => {
            if !row.exists(&loc.target) {
                return None;
            }
            row.text(&loc.target).and_then(|t| clean_text(&t))
        }
        Read::Attr(name) => match row.attr(&loc.target, name) {
            Some(v) => clean_text(&v),
            None if loc.exclusive && row.exists(&loc.target) => None,
            None => return None,
        },
        Read::Joined => {
            if !row.exists(&loc.target) {
                return None;
            }
            let parts: Vec<String> = row
                .texts(&loc.target)
                .iter()
                .filter_map(|t| clean_text(t))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
    };

    let raw = match (raw, loc.guard) {
        (Some(v), Some(Guard::MaxLen(n))) if v.chars().count() > n => None,
        (Some(v), Some(Guard::NotPlaceholder(p))) if v == p => None,
        (raw, _) => raw,
    };
    Some(raw)
}

pub fn resolve<R: CellAccessor + ?Sized>(
    row: &R,
    spec: &FieldSpec,
    normalizer: &Normalizer,
) -> FieldOutcome {
    let Some(raw) = spec.locators.iter().find_map(|loc| read_locator(row, loc)) else {
        return FieldOutcome::Absent(Problem::Missing);
    };
    let Some(raw) = raw else {
        return FieldOutcome::Absent(Problem::Empty);
    };

    let value = match spec.normalize {
        Normalize::Text => Some(Scalar::Text(raw.clone())),
        Normalize::Int => parse_int(&raw).map(Scalar::Int),
        Normalize::Date => normalizer.parse_date(&raw).map(Scalar::Date),
        Normalize::Url => normalizer.normalize_url(&raw).map(Scalar::Text),
    };
    match value {
        Some(v) => FieldOutcome::Value(v),
        None => FieldOutcome::Absent(Problem::Unparseable(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::normalize::{DateFormat, DEFAULT_ORIGIN};
    use crate::extract::row::HtmlRow;

    fn normalizer() -> Normalizer {
        Normalizer::new(DateFormat::DayMonthYearSlash, DEFAULT_ORIGIN)
    }

    fn row(cells: &str) -> HtmlRow {
        HtmlRow::parse(&format!("<tr>{}</tr>", cells), "td").unwrap()
    }

    fn value(row: &HtmlRow, spec: &FieldSpec) -> Result<Scalar, Problem> {
        match resolve(row, spec, &normalizer()) {
            FieldOutcome::Value(v) => Ok(v),
            FieldOutcome::Absent(p) => Err(p),
        }
    }

    const TIME: FieldSpec = FieldSpec {
        name: "time_text",
        locators: &[
            Locator::text(Target::within(0, "strong")),
            Locator::text(Target::cell(0)),
        ],
        normalize: Normalize::Text,
        required: true,
    };

    const COUNTRY: FieldSpec = FieldSpec {
        name: "country",
        locators: &[
            Locator::attr(Target::within(0, "img.flag__img"), "alt").exclusive(),
            Locator::text(Target::cell(0)).guarded(Guard::MaxLen(3)),
        ],
        normalize: Normalize::Text,
        required: false,
    };

    const MEDAL: FieldSpec = FieldSpec {
        name: "medal",
        locators: &[
            Locator::text(Target::within(0, ".u-screen-reader")),
            Locator::text(Target::cell(0)).guarded(Guard::NotPlaceholder("-")),
        ],
        normalize: Normalize::Text,
        required: false,
    };

    const TAGS: FieldSpec = FieldSpec {
        name: "tags",
        locators: &[Locator::joined(Target::within(0, ".tag"))],
        normalize: Normalize::Text,
        required: false,
    };

    #[test]
    fn emphasis_preferred_then_cell_text() {
        let r = row("<td><strong>1:52.30</strong> <span>WR</span></td>");
        assert_eq!(value(&r, &TIME), Ok(Scalar::Text("1:52.30".into())));
        let r = row("<td> 1:52.30 </td>");
        assert_eq!(value(&r, &TIME), Ok(Scalar::Text("1:52.30".into())));
        let r = row("");
        assert_eq!(value(&r, &TIME), Err(Problem::Missing));
    }

    #[test]
    fn tags_join_and_skip_empties() {
        let r = row(r#"<td><span class="tag">WR</span><span class="tag"> </span><span class="tag">OC</span></td>"#);
        assert_eq!(value(&r, &TAGS), Ok(Scalar::Text("WR, OC".into())));
        let r = row(r#"<td><span class="tag"> </span></td>"#);
        assert_eq!(value(&r, &TAGS), Err(Problem::Empty));
        let r = row("<td>52.00</td>");
        assert_eq!(value(&r, &TAGS), Err(Problem::Missing));
    }

    #[test]
    fn country_prefers_alt_then_short_text() {
        let r = row(r#"<td><img class="flag__img" alt="FRA"> France</td>"#);
        assert_eq!(value(&r, &COUNTRY), Ok(Scalar::Text("FRA".into())));
        let r = row("<td> USA </td>");
        assert_eq!(value(&r, &COUNTRY), Ok(Scalar::Text("USA".into())));
        let r = row("<td>United States</td>");
        assert_eq!(value(&r, &COUNTRY), Err(Problem::Empty));
    }

    #[test]
    fn flag_without_alt_does_not_fall_back_to_text() {
        let r = row(r#"<td><img class="flag__img" src="/x.svg">ESP</td>"#);
        assert_eq!(value(&r, &COUNTRY), Err(Problem::Empty));
    }

    #[test]
    fn inline_markup_does_not_split_values() {
        let r = row("<td><strong>1:48<small>.30</small></strong></td>");
        assert_eq!(value(&r, &TIME), Ok(Scalar::Text("1:48.30".into())));
        let r = row("<td>  1:48<small>.30</small>\n  <span>WR</span></td>");
        assert_eq!(value(&r, &TIME), Ok(Scalar::Text("1:48.30 WR".into())));
    }

    #[test]
    fn medal_screen_reader_then_visible_text() {
        let r = row(r#"<td><span class="u-screen-reader">Gold</span><i class="medal"></i></td>"#);
        assert_eq!(value(&r, &MEDAL), Ok(Scalar::Text("Gold".into())));
        let r = row("<td>Silver</td>");
        assert_eq!(value(&r, &MEDAL), Ok(Scalar::Text("Silver".into())));
        let r = row("<td> - </td>");
        assert_eq!(value(&r, &MEDAL), Err(Problem::Empty));
    }

    #[test]
    fn unparseable_keeps_raw_text() {
        const AGE: FieldSpec = FieldSpec {
            name: "age",
            locators: &[Locator::text(Target::cell(0))],
            normalize: Normalize::Int,
            required: false,
        };
        let r = row("<td>n/a</td>");
        assert_eq!(value(&r, &AGE), Err(Problem::Unparseable("n/a".into())));
    }
}
