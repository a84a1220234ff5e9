//! Calendar-date recognition shared by heading detection and query parsing.
//!
//! Two entry points matter:
//!
//! - [`heading_date`] decides whether a whole line of a note is a date heading
//!   such as `## 2025-10-11`, `**11/10/2025:**` or `_11 Oct 2025_`.
//! - [`normalize_date_token`] and [`first_date_in`] find dates embedded in
//!   free text, which is what the query-side date parser needs.
//!
//! Slash dates are read day-first (`11/10/2025` is 11 October), matching the
//! UK-style notes these vaults are written in.
//!
//! ```
//! use chrono::NaiveDate;
//! use vaultrag_context::dates::heading_date;
//!
//! assert_eq!(heading_date("## 2025-10-11"), NaiveDate::from_ymd_opt(2025, 10, 11));
//! assert_eq!(heading_date("**11/10/2025:**"), NaiveDate::from_ymd_opt(2025, 10, 11));
//! // A bracketed label followed by a colon is left to other heading forms.
//! assert_eq!(heading_date("[2025-10-11]:"), None);
//! ```

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static HEADING_MARK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s*").expect("heading pattern is valid"));
static OPEN_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\*\*|__|\*|_)\s*").expect("emphasis pattern is valid"));
static CLOSE_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:\*\*|__|\*|_)$").expect("emphasis pattern is valid"));
static TRAILING_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:：]\s*$").expect("colon pattern is valid"));

static EXACT_YMD_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("date pattern is valid"));
static EXACT_YMD_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})/(\d{1,2})/(\d{1,2})$").expect("date pattern is valid"));
static EXACT_DMY_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("date pattern is valid"));
static EXACT_MON_D_Y: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+)\s+(\d{1,2}),\s+(\d{4})$").expect("date pattern is valid")
});
static EXACT_D_MON_Y: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})$").expect("date pattern is valid")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("date pattern is valid"));
static DMY_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("date pattern is valid"));
static YMD_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})/(\d{1,2})/(\d{1,2})\b").expect("date pattern is valid"));
static MON_D_COMMA_Y: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z]{3,9})\s+(\d{1,2}),\s*(\d{4})\b").expect("date pattern is valid")
});
static D_MON_Y: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\s+([A-Za-z]{3,9})\s+(\d{4})\b").expect("date pattern is valid")
});

/// Month number for an English month name or its common abbreviation.
pub fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.trim().to_ascii_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn numeric_ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let month: u32 = month.parse().ok()?;
    ymd(year, month, day)
}

/// Parses a string that must consist of exactly one date and nothing else.
///
/// Accepted shapes: `2025-10-11`, `2025/10/11`, `11/10/2025`, `Oct 11, 2025`,
/// `October 11, 2025`, `11 Oct 2025` and `11 October 2025`.
pub fn parse_exact_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Some(c) = EXACT_YMD_DASH.captures(s) {
        return numeric_ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = EXACT_YMD_SLASH.captures(s) {
        return numeric_ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = EXACT_DMY_SLASH.captures(s) {
        return numeric_ymd(&c[3], &c[2], &c[1]);
    }
    if let Some(c) = EXACT_MON_D_Y.captures(s) {
        return ymd(&c[3], month_from_name(&c[1])?, &c[2]);
    }
    if let Some(c) = EXACT_D_MON_Y.captures(s) {
        return ymd(&c[3], month_from_name(&c[2])?, &c[1]);
    }
    None
}

/// Returns the date announced by a heading line, if the line is one.
///
/// Up to three leading spaces and a markdown `#` run are removed, then one
/// layer of `**`, `__`, `*` or `_` emphasis at each end, then any square
/// brackets at the ends, then a single trailing ASCII or full-width colon.
/// Whatever remains must be a date on its own. Because the brackets are
/// stripped before the colon, `[2025-10-11]:` keeps its closing bracket and is
/// not treated as a heading.
pub fn heading_date(line: &str) -> Option<NaiveDate> {
    let s = line.trim_end_matches(['\r', '\n']);
    let s = HEADING_MARK.replace(s, "");
    let s = OPEN_EMPHASIS.replace(s.trim(), "");
    let s = CLOSE_EMPHASIS.replace(&s, "");
    let s = s.trim().trim_matches(['[', ']']).trim();
    let s = TRAILING_COLON.replace(s, "");
    parse_exact_date(s.trim())
}

/// Normalizes a token that contains a date somewhere inside it.
///
/// Unlike [`parse_exact_date`] the date may be surrounded by other words. A
/// bare `Month YYYY` token resolves to the first day of that month.
pub fn normalize_date_token(token: &str) -> Option<NaiveDate> {
    let token = token.trim();
    if let Some(m) = ISO_DATE.find(token) {
        if let Some(date) = parse_exact_date(m.as_str()) {
            return Some(date);
        }
    }
    if let Some(c) = DMY_SLASH.captures(token) {
        return numeric_ymd(&c[3], &c[2], &c[1]);
    }
    if let Some(c) = YMD_SLASH.captures(token) {
        return numeric_ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = MON_D_COMMA_Y.captures(token) {
        if let Some(month) = month_from_name(&c[1]) {
            return ymd(&c[3], month, &c[2]);
        }
    }
    if let Some(c) = D_MON_Y.captures(token) {
        if let Some(month) = month_from_name(&c[2]) {
            return ymd(&c[3], month, &c[1]);
        }
    }

    let parts: Vec<&str> = token.split_whitespace().collect();
    if let [name, year] = parts.as_slice() {
        if year.chars().all(|c| c.is_ascii_digit()) {
            return ymd(year, month_from_name(name)?, "1");
        }
    }
    None
}

/// The first valid explicit date mentioned anywhere in `text`.
///
/// Matches of every date shape are ordered by where they start in the text;
/// candidates that look like dates but are not real calendar days (such as
/// `32/01/2025`) are skipped.
pub fn first_date_in(text: &str) -> Option<NaiveDate> {
    let mut candidates: Vec<(usize, &str)> = Vec::new();
    for pattern in [&*ISO_DATE, &*DMY_SLASH, &*YMD_SLASH, &*MON_D_COMMA_Y, &*D_MON_Y] {
        candidates.extend(pattern.find_iter(text).map(|m| (m.start(), m.as_str())));
    }
    candidates.sort_by_key(|(start, _)| *start);
    candidates
        .into_iter()
        .find_map(|(_, token)| normalize_date_token(token))
}

/// Seconds since the Unix epoch at midnight UTC on `date`.
pub fn date_to_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, day)
    }

    #[test]
    fn test_heading_date_surface_forms() {
        assert_eq!(heading_date("## 2025-10-11"), d(2025, 10, 11));
        assert_eq!(heading_date("   # 2025/10/11\n"), d(2025, 10, 11));
        assert_eq!(heading_date("**11/10/2025:**"), d(2025, 10, 11));
        assert_eq!(heading_date("__11/10/2025:__"), d(2025, 10, 11));
        assert_eq!(heading_date("*11 Oct 2025:*"), d(2025, 10, 11));
        assert_eq!(heading_date("2025-10-11"), d(2025, 10, 11));
        assert_eq!(heading_date("# [2025-10-11]"), d(2025, 10, 11));
        assert_eq!(heading_date("October 11, 2025："), d(2025, 10, 11));
        assert_eq!(heading_date("11 October 2025"), d(2025, 10, 11));
    }

    #[test]
    fn test_heading_date_rejects_non_headings() {
        // Bracket-then-colon labels are a deliberate format boundary.
        assert_eq!(heading_date("[2025-10-11]:"), None);
        assert_eq!(heading_date("Met Alice on 2025-10-11 for coffee"), None);
        assert_eq!(heading_date("## Meeting notes"), None);
        assert_eq!(heading_date("    ## 2025-10-11"), None);
        assert_eq!(heading_date("31/02/2025"), None);
        assert_eq!(heading_date(""), None);
    }

    #[test]
    fn test_normalize_date_token() {
        assert_eq!(normalize_date_token("2025-01-15"), d(2025, 1, 15));
        assert_eq!(normalize_date_token("15/01/2025"), d(2025, 1, 15));
        assert_eq!(normalize_date_token("2025/1/15"), d(2025, 1, 15));
        assert_eq!(normalize_date_token("Jan 15, 2025"), d(2025, 1, 15));
        assert_eq!(normalize_date_token("15 Jan 2025"), d(2025, 1, 15));
        assert_eq!(normalize_date_token("Oct 2025"), d(2025, 10, 1));
        assert_eq!(normalize_date_token("not a date"), None);
        assert_eq!(normalize_date_token("32/01/2025"), None);
        assert_eq!(normalize_date_token("2025"), None);
    }

    #[test]
    fn test_first_date_in_prefers_earliest_position() {
        assert_eq!(
            first_date_in("notes between 2025-01-10 and 2025-01-01"),
            d(2025, 1, 10)
        );
        assert_eq!(first_date_in("notes from January 10, 2025"), d(2025, 1, 10));
        assert_eq!(first_date_in("on 32/01/2025 or 2025-02-01"), d(2025, 2, 1));
        assert_eq!(first_date_in("nothing here"), None);
    }

    #[test]
    fn test_month_from_name() {
        assert_eq!(month_from_name("Sept"), Some(9));
        assert_eq!(month_from_name("DECEMBER"), Some(12));
        assert_eq!(month_from_name("Monday"), None);
    }

    #[test]
    fn test_date_to_timestamp() {
        let ts = date_to_timestamp(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(ts, 1_704_067_200);
    }
}
