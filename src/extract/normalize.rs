use chrono::NaiveDate;

pub const DEFAULT_ORIGIN: &str = "https://www.worldaquatics.com";

/// The two date layouts the site uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `25/11/2021`
    DayMonthYearSlash,
    /// `18 Dec 2009`
    DayMonthNameYear,
}

impl DateFormat {
    fn pattern(self) -> &'static str {
        match self {
            DateFormat::DayMonthYearSlash => "%d/%m/%Y",
            DateFormat::DayMonthNameYear => "%d %b %Y",
        }
    }
}

/// Turns raw cell text into canonical scalars. Every function is total:
/// anything that does not parse comes back as `None`.
#[derive(Debug, Clone)]
pub struct Normalizer {
    date_format: DateFormat,
    origin: String,
}

impl Normalizer {
    pub fn new(date_format: DateFormat, origin: &str) -> Self {
        Normalizer {
            date_format,
            origin: origin.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let v = text.trim();
        if v.is_empty() {
            return None;
        }
        NaiveDate::parse_from_str(v, self.date_format.pattern()).ok()
    }

    /// `//host/x` gets `https:`, `/x` gets the site origin, anything else
    /// passes through.
    pub fn normalize_url(&self, text: &str) -> Option<String> {
        let url = text.trim();
        if url.is_empty() {
            return None;
        }
        if url.starts_with("//") {
            return Some(format!("https:{}", url));
        }
        if url.starts_with('/') {
            return Some(format!("{}{}", self.origin, url));
        }
        Some(url.to_string())
    }
}

/// Digits only after trimming; signs, separators and units are rejected.
pub fn parse_int(text: &str) -> Option<i64> {
    let v = text.trim();
    if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

/// Trim and collapse inner whitespace runs; empty becomes `None`.
pub fn clean_text(text: &str) -> Option<String> {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
