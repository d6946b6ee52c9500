// src/extractors/heuristics.rs
//! Lightweight keyword and pattern classification for links found on IR pages.
//! Every function fails closed: anything it cannot read confidently is `None`.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::candidate::{DocumentType, FiscalPeriod};
use crate::utils::urls::path_extension;

const MIN_YEAR: i32 = 2000;

// --- Regex Patterns (Lazy Static) ---
// All patterns run against `prepare()`d text: lowercased, underscores as spaces.
static PERIOD_RE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Q3 2025, Q3-25, Q3 FY25, q3fy2025, Q3'25
        r"\bq(?P<q>[1-4])[\s\-/.']*(?:fy|fiscal(?:\s+year)?)?[\s\-']*(?P<y>\d{4}|\d{2})\b",
        // 3Q25, 3Q 2025, 3QFY25
        r"\b(?P<q>[1-4])q[\s\-']*(?:fy)?[\s\-']*(?P<y>\d{4}|\d{2})\b",
        // FY2025 Q3, FY25-Q3, fy25q3
        r"\bfy[\s\-']*(?P<y>\d{4}|\d{2})[\s\-]*q(?P<q>[1-4])\b",
        // 2025-Q3, 2025Q3
        r"\b(?P<y>20\d{2})[\s\-]*q(?P<q>[1-4])\b",
        // third quarter 2025, third-quarter fiscal 2025, fourth quarter and full year 2025
        r"\b(?P<qw>first|second|third|fourth|1st|2nd|3rd|4th)[\s\-]+quarter[\s,]+(?:and\s+full[\s\-]+year\s+)?(?:of\s+)?(?:fiscal\s+)?(?:year\s+)?(?:fy\s*)?(?P<y>\d{4})\b",
    ]
    .iter()
    .filter_map(|pat| Regex::new(pat).ok())
    .collect()
});

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b20\d{2}\b|\bfy\s*'?\d{2}\b").expect("Failed to compile YEAR_RE"));

static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?P<y>\d{4})[\-/.](?P<m>\d{1,2})[\-/.](?P<d>\d{1,2})\b").expect("Failed to compile ISO_DATE_RE")
});
static US_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?P<m>\d{1,2})/(?P<d>\d{1,2})/(?P<y>\d{4})\b").expect("Failed to compile US_DATE_RE")
});
static MONTH_FIRST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?P<mon>jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(?P<d>\d{1,2})(?:st|nd|rd|th)?,?\s+(?P<y>\d{4})\b")
        .expect("Failed to compile MONTH_FIRST_RE")
});
static DAY_FIRST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?P<d>\d{1,2})(?:st|nd|rd|th)?\s+(?P<mon>jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(?P<y>\d{4})\b")
        .expect("Failed to compile DAY_FIRST_RE")
});

// --- Keyword Tables ---
const SLIDE_KEYWORDS: &[&str] = &["presentation", "slides", "slide deck", "earnings deck", "investor deck"];
const NON_REPORT_KEYWORDS: &[&str] = &["transcript", "replay", "audio", "podcast"];
const SUPPLEMENTAL_KEYWORDS: &[&str] = &[
    "supplement", "financial tables", "financial data", "data sheet", "fact sheet", "statistical",
    "schedules", "reconciliation",
];
const RELEASE_KEYWORDS: &[&str] = &["earnings release", "press release", "news release", "earnings", "results"];

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "zip"];
const DOCUMENT_PATH_MARKERS: &[&str] = &["download", "static-files", "attachment"];
const DOCUMENT_SEGMENTS: &[&str] = &["file", "files", "document", "documents"];

/// Lowercases and turns separators into spaces so `\b` and keyword matching
/// behave the same on titles and URL paths.
fn prepare(text: &str) -> String {
    text.to_lowercase().replace('_', " ")
}

/// Years a report may carry: from 2000 up to the year after the reference date.
/// Anchored to the run so the same input always parses the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearWindow {
    latest: i32,
}

impl YearWindow {
    const UNBOUNDED: YearWindow = YearWindow { latest: i32::MAX };

    pub fn as_of(reference: DateTime<Utc>) -> Self {
        Self {
            latest: reference.year() + 1,
        }
    }

    fn contains(self, year: i32) -> bool {
        (MIN_YEAR..=self.latest).contains(&year)
    }
}

fn normalize_year(raw: &str, years: YearWindow) -> Option<i32> {
    let value: i32 = raw.parse().ok()?;
    let year = if raw.len() == 2 { 2000 + value } else { value };
    years.contains(year).then_some(year)
}

fn quarter_from_word(word: &str) -> Option<u8> {
    match word {
        "first" | "1st" => Some(1),
        "second" | "2nd" => Some(2),
        "third" | "3rd" => Some(3),
        "fourth" | "4th" => Some(4),
        _ => None,
    }
}

/// The latest fiscal period referenced in the text, if any.
pub fn parse_fiscal_period(text: &str, years: YearWindow) -> Option<FiscalPeriod> {
    let text = prepare(text);
    PERIOD_RE
        .iter()
        .flat_map(|re| re.captures_iter(&text).collect::<Vec<_>>())
        .filter_map(|caps| {
            let year = normalize_year(caps.name("y")?.as_str(), years)?;
            let quarter = match (caps.name("q"), caps.name("qw")) {
                (Some(q), _) => q.as_str().parse().ok()?,
                (None, Some(word)) => quarter_from_word(word.as_str())?,
                (None, None) => return None,
            };
            FiscalPeriod::new(year, quarter)
        })
        .max()
}

/// How precisely a title pins down the reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TitleSpecificity {
    NoPeriod,
    YearOnly,
    QuarterAndYear,
}

pub fn title_specificity(title: &str) -> TitleSpecificity {
    if parse_fiscal_period(title, YearWindow::UNBOUNDED).is_some() {
        TitleSpecificity::QuarterAndYear
    } else if YEAR_RE.is_match(&prepare(title)) {
        TitleSpecificity::YearOnly
    } else {
        TitleSpecificity::NoPeriod
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let month = match name {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn to_utc(date: NaiveDate, years: YearWindow) -> Option<DateTime<Utc>> {
    if !years.contains(date.year()) {
        return None;
    }
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// First publication date found in the text. Accepts RFC 3339 timestamps,
/// `2024-10-31`, `10/31/2024`, `October 31, 2024`, `Oct. 31 2024` and `31 October 2024`.
pub fn parse_date(text: &str, years: YearWindow) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc)).filter(|ts| years.contains(ts.year()));
    }

    let text = prepare(trimmed);
    let numeric = |re: &Regex| {
        re.captures_iter(&text).find_map(|caps| {
            let y = caps.name("y")?.as_str().parse().ok()?;
            let m = caps.name("m")?.as_str().parse().ok()?;
            let d = caps.name("d")?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(y, m, d).and_then(|date| to_utc(date, years))
        })
    };
    let named = |re: &Regex| {
        re.captures_iter(&text).find_map(|caps| {
            let y = caps.name("y")?.as_str().parse().ok()?;
            let m = month_from_name(caps.name("mon")?.as_str())?;
            let d = caps.name("d")?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(y, m, d).and_then(|date| to_utc(date, years))
        })
    };

    numeric(&ISO_DATE_RE)
        .or_else(|| named(&MONTH_FIRST_RE))
        .or_else(|| named(&DAY_FIRST_RE))
        .or_else(|| numeric(&US_DATE_RE))
}

/// Document type from keywords in a title or URL. `None` when nothing matches
/// or the text names something that is not a report (call transcripts, audio).
pub fn classify_document_type(text: &str) -> Option<DocumentType> {
    let text = prepare(text).replace(['-', '/', '.'], " ");
    let has = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if has(SLIDE_KEYWORDS) {
        Some(DocumentType::SlideDeck)
    } else if has(NON_REPORT_KEYWORDS) {
        None
    } else if has(SUPPLEMENTAL_KEYWORDS) {
        Some(DocumentType::SupplementalTable)
    } else if has(RELEASE_KEYWORDS) {
        Some(DocumentType::EarningsRelease)
    } else {
        None
    }
}

/// The URL's file extension when it is one of the downloadable document formats.
pub fn document_extension(url: &str) -> Option<String> {
    path_extension(url).filter(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether a URL points at a downloadable document rather than a navigational page.
pub fn is_document_link(url: &str) -> bool {
    if document_extension(url).is_some() {
        return true;
    }
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    path.split('/').any(|segment| {
        DOCUMENT_SEGMENTS.contains(&segment) || DOCUMENT_PATH_MARKERS.iter().any(|m| segment.contains(m))
    })
}
