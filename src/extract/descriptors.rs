use super::fields::{FieldSpec, Guard, Locator, Normalize};
use super::normalize::DateFormat;
use super::row::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Ranking,
    PersonalBest,
    AthleteSearch,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Ranking => "ranking",
            RecordKind::PersonalBest => "personal_best",
            RecordKind::AthleteSearch => "athlete_search",
        }
    }
}

/// The markup contract for one table type.
#[derive(Debug)]
pub struct TableDescriptor {
    pub kind: RecordKind,
    /// Must match before any row is read; the session fails if it never does.
    pub ready_selector: &'static str,
    pub row_selector: &'static str,
    pub cell_selector: &'static str,
    /// "Load more" control, when the table paginates.
    pub control_selector: Option<&'static str>,
    pub date_format: DateFormat,
    pub fields: &'static [FieldSpec],
}

impl TableDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const fn field(
    name: &'static str,
    locators: &'static [Locator],
    normalize: Normalize,
) -> FieldSpec {
    FieldSpec { name, locators, normalize, required: false }
}

const fn required(
    name: &'static str,
    locators: &'static [Locator],
    normalize: Normalize,
) -> FieldSpec {
    FieldSpec { name, locators, normalize, required: true }
}

// ── Rankings ──

pub static RANKINGS: TableDescriptor = TableDescriptor {
    kind: RecordKind::Ranking,
    ready_selector: "tbody.js-rankings-table-body tr.rankings-table__row",
    row_selector: "tbody.js-rankings-table-body tr.rankings-table__row",
    cell_selector: "td",
    control_selector: Some("button.js-show-more-button"),
    date_format: DateFormat::DayMonthNameYear,
    fields: &[
        field("overall_rank", &[Locator::text(Target::cell(0))], Normalize::Int),
        field(
            "country_code",
            &[
                Locator::attr(Target::within(1, "img.flag__img"), "alt").exclusive(),
                Locator::text(Target::cell(1)).guarded(Guard::MaxLen(3)),
            ],
            Normalize::Text,
        ),
        field(
            "athlete_name",
            &[
                Locator::attr(Target::within(2, "a.rankings-table__person-link"), "title"),
                Locator::text(Target::within(2, "a.rankings-table__person-link")),
            ],
            Normalize::Text,
        ),
        field(
            "athlete_profile_url",
            &[Locator::attr(Target::within(2, "a.rankings-table__person-link"), "href")],
            Normalize::Url,
        ),
        field(
            "athlete_id",
            &[Locator::attr(Target::within(2, ".athlete-headshot"), "data-athlete-id")],
            Normalize::Int,
        ),
        field(
            "image_url",
            &[Locator::attr(Target::within(2, ".athlete-headshot img"), "src")],
            Normalize::Url,
        ),
        field("age", &[Locator::text(Target::cell(3))], Normalize::Int),
        required(
            "time_text",
            &[
                Locator::text(Target::within(4, "strong")),
                Locator::text(Target::cell(4)),
            ],
            Normalize::Text,
        ),
        field(
            "record_tag",
            &[Locator::joined(Target::within(
                4,
                ".rankings-table__records .rankings-table__record-tag",
            ))],
            Normalize::Text,
        ),
        field("points", &[Locator::text(Target::cell(5))], Normalize::Int),
        field("tag", &[Locator::text(Target::cell(6))], Normalize::Text),
        field("competition", &[Locator::text(Target::cell(7))], Normalize::Text),
        field(
            "location_country_code",
            &[
                Locator::attr(Target::within(8, "img.flag__img"), "alt").exclusive(),
                Locator::text(Target::cell(8)).guarded(Guard::MaxLen(3)),
            ],
            Normalize::Text,
        ),
        field("race_date", &[Locator::text(Target::cell(9))], Normalize::Date),
    ],
};

// ── Personal bests (athlete profile page) ──

pub const BEST_RESULTS_SECTION: &str = "section[data-widget='best-results']";

pub static PERSONAL_BESTS: TableDescriptor = TableDescriptor {
    kind: RecordKind::PersonalBest,
    ready_selector: BEST_RESULTS_SECTION,
    row_selector: "section[data-widget='best-results'] tbody tr.athlete-table__row",
    cell_selector: "td.athlete-table__cell",
    control_selector: None,
    date_format: DateFormat::DayMonthYearSlash,
    fields: &[
        required("event", &[Locator::text(Target::cell(0))], Normalize::Text),
        required(
            "time_text",
            &[
                Locator::text(Target::within(1, "strong")),
                Locator::text(Target::cell(1)),
            ],
            Normalize::Text,
        ),
        field(
            "record_tags",
            &[Locator::joined(Target::within(
                1,
                ".athlete-table__records .athlete-table__record-tag",
            ))],
            Normalize::Text,
        ),
        field(
            "medal",
            &[
                Locator::text(Target::within(2, ".u-screen-reader")),
                Locator::text(Target::cell(2)).guarded(Guard::NotPlaceholder("-")),
            ],
            Normalize::Text,
        ),
        field("pool_length", &[Locator::text(Target::cell(3))], Normalize::Text),
        field("age_at_result", &[Locator::text(Target::cell(4))], Normalize::Int),
        field("competition", &[Locator::text(Target::cell(5))], Normalize::Text),
        field(
            "comp_country_code",
            &[
                Locator::attr(Target::within(6, "img.flag__img"), "alt").exclusive(),
                Locator::text(Target::cell(6)).guarded(Guard::MaxLen(3)),
            ],
            Normalize::Text,
        ),
        field("race_date", &[Locator::text(Target::cell(7))], Normalize::Date),
    ],
};

// ── Athlete search ──

pub static ATHLETE_SEARCH: TableDescriptor = TableDescriptor {
    kind: RecordKind::AthleteSearch,
    ready_selector: "tbody.js-athletes-table-body",
    row_selector: "tbody.js-athletes-table-body tr.athlete-table__row",
    cell_selector: "td",
    control_selector: None,
    date_format: DateFormat::DayMonthYearSlash,
    fields: &[
        field(
            "athlete_id",
            &[Locator::attr(Target::in_row(".athlete-headshot"), "data-athlete-id")],
            Normalize::Int,
        ),
        field(
            "image_url",
            &[Locator::attr(Target::in_row(".athlete-headshot img"), "src")],
            Normalize::Url,
        ),
        field(
            "profile_url",
            &[
                Locator::attr(Target::row(), "data-link"),
                Locator::attr(Target::in_row("a.athlete-table__cta-link"), "href"),
            ],
            Normalize::Url,
        ),
    ],
};
