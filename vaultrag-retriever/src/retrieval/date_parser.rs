//! Query-side date range extraction.
//!
//! A [`DateParser`] holds an ordered list of [`DateStrategy`] values and
//! returns the first range any of them produces:
//!
//! 1. relative phrases (`today`, `last week`, `recently`, ...)
//! 2. `last|past|previous N days/weeks/months/years` with digits
//! 3. the same with number words up to twenty
//! 4. `fortnight`
//! 5. explicit ranges (`between A and B`, `from A to B`, `since A`, `after A`, `before A`)
//! 6. the first explicit date in the text, as a single day
//! 7. optionally, a generation-service fallback for vaguer phrasing
//!
//! The explicit-range pattern captures lazily up to the next word boundary,
//! so `before 2025-01-10` captures only `2025` and yields nothing. The
//! standalone-date strategy then picks up the full date as a single day.
//! Existing behaviour depends on this, so it is kept.

use crate::storage::RangeFilter;
use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use vaultrag_context::dates::{date_to_timestamp, first_date_in, heading_date, normalize_date_token};
use vaultrag_models::GenerationService;

const UNITS: &str = r"(?P<u>day|days|week|weeks|month|months|year|years)";
const NUMBER_WORDS: [(&str, u64); 20] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
];

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(today|yesterday|this week|last week|this month|last month|this year|last year|recent|recently|lately|just)\b",
    )
    .expect("relative phrase pattern is valid")
});
static LAST_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:last|past|previous)\s+(?P<n>\d{{1,3}})\s+{UNITS}\b"))
        .expect("last-n pattern is valid")
});
static IN_THE_LAST_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bin\s+the\s+last\s+(?P<n>\d{{1,3}})\s+{UNITS}\b"))
        .expect("in-the-last-n pattern is valid")
});
static LAST_WORD_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:last|past|previous)\s+(?P<nw>{})\s+{UNITS}\b",
        number_word_alternation()
    ))
    .expect("last-word-n pattern is valid")
});
static IN_THE_LAST_WORD_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bin\s+the\s+last\s+(?P<nw>{})\s+{UNITS}\b",
        number_word_alternation()
    ))
    .expect("in-the-last-word-n pattern is valid")
});
static FORTNIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:last|past|previous)?\s*fortnight\b").expect("fortnight pattern is valid")
});
static EXPLICIT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:between\s+(?P<between_a>.+?)\s+and\s+(?P<between_b>.+?)|from\s+(?P<from_a>.+?)\s+(?:to|until)\s+(?P<from_b>.+?)|since\s+(?P<since>.+?)|after\s+(?P<after>.+?)|before\s+(?P<before>.+?))\b",
    )
    .expect("explicit range pattern is valid")
});
static TEMPORAL_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?|monday|tuesday|wednesday|thursday|friday|saturday|sunday|weekend|spring|summer|autumn|fall|winter|christmas|xmas|easter|thanksgiving|holidays?|new year|q[1-4]|quarter|ago|earlier|week|weeks|month|months|year|years|days|tonight|tomorrow|morning|evening|(?:19|20)\d{2})\b",
    )
    .expect("temporal hint pattern is valid")
});

fn number_word_alternation() -> String {
    NUMBER_WORDS
        .iter()
        .map(|(word, _)| *word)
        .collect::<Vec<_>>()
        .join("|")
}

/// Inclusive calendar range. `start == end` is a single day; either side may
/// be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Builds a range, swapping the ends when they are out of order.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) if s > e => Self {
                start: Some(e),
                end: Some(s),
            },
            _ => Self { start, end },
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(Some(date), Some(date))
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }

    /// Store filter on `entry_date_ts` covering the same days.
    pub fn to_filter(&self) -> RangeFilter {
        RangeFilter::new(
            "entry_date_ts",
            self.start.map(date_to_timestamp),
            self.end.map(date_to_timestamp),
        )
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "..".to_string());
        write!(f, "{} to {}", side(self.start), side(self.end))
    }
}

/// One way of reading a date range out of text.
#[async_trait]
pub trait DateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange>;
}

fn days_back(today: NaiveDate, days: u64) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(days))
}

fn window(today: NaiveDate, days: u64) -> Option<DateRange> {
    Some(DateRange::between(days_back(today, days)?, today))
}

fn unit_days(n: u64, unit: &str) -> u64 {
    let unit = unit.to_ascii_lowercase();
    if unit.starts_with("week") {
        n * 7
    } else if unit.starts_with("month") {
        n * 30
    } else if unit.starts_with("year") {
        n * 365
    } else {
        n
    }
}

fn week_bounds(day: NaiveDate) -> Option<DateRange> {
    let start = days_back(day, u64::from(day.weekday().num_days_from_monday()))?;
    let end = start.checked_add_days(Days::new(6))?;
    Some(DateRange::between(start, end))
}

fn month_bounds(day: NaiveDate) -> Option<DateRange> {
    let start = day.with_day(1)?;
    let next_first = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)?
    };
    Some(DateRange::between(start, next_first.pred_opt()?))
}

fn year_bounds(year: i32) -> Option<DateRange> {
    Some(DateRange::between(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// `today`, `yesterday`, `this/last week|month|year`, `recent(ly)`, `lately`
/// and `just`. The first phrase in the text decides.
pub struct RelativePhrases;

#[async_trait]
impl DateStrategy for RelativePhrases {
    fn name(&self) -> &'static str {
        "relative-phrase"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        let phrase = RELATIVE.find(text)?.as_str().to_ascii_lowercase();
        match phrase.as_str() {
            "today" | "just" => Some(DateRange::single(today)),
            "yesterday" => Some(DateRange::single(today.pred_opt()?)),
            "recent" | "recently" | "lately" => window(today, 30),
            "this week" => week_bounds(today),
            "last week" => week_bounds(days_back(today, 7)?),
            "this month" => month_bounds(today),
            "last month" => month_bounds(today.with_day(1)?.pred_opt()?),
            "this year" => year_bounds(today.year()),
            "last year" => year_bounds(today.year() - 1),
            _ => None,
        }
    }
}

/// `last 3 days`, `past 2 weeks`, `in the last 6 months`.
pub struct LastNDigits;

#[async_trait]
impl DateStrategy for LastNDigits {
    fn name(&self) -> &'static str {
        "last-n"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        [&*LAST_N, &*IN_THE_LAST_N].iter().find_map(|pattern| {
            let caps = pattern.captures(text)?;
            let n: u64 = caps["n"].parse().ok()?;
            window(today, unit_days(n, &caps["u"]))
        })
    }
}

/// `last three days`, `in the last twelve months`.
pub struct LastNWords;

#[async_trait]
impl DateStrategy for LastNWords {
    fn name(&self) -> &'static str {
        "last-n-words"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        [&*LAST_WORD_N, &*IN_THE_LAST_WORD_N].iter().find_map(|pattern| {
            let caps = pattern.captures(text)?;
            let word = caps["nw"].to_ascii_lowercase();
            let n = NUMBER_WORDS
                .iter()
                .find(|(w, _)| *w == word)
                .map(|(_, n)| *n)?;
            window(today, unit_days(n, &caps["u"]))
        })
    }
}

pub struct Fortnight;

#[async_trait]
impl DateStrategy for Fortnight {
    fn name(&self) -> &'static str {
        "fortnight"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        if FORTNIGHT.is_match(text) {
            window(today, 14)
        } else {
            None
        }
    }
}

/// `between A and B`, `from A to B`, `since A`, `after A`, `before A`.
pub struct ExplicitRange;

impl ExplicitRange {
    fn token(caps: &Captures, name: &str) -> Option<NaiveDate> {
        caps.name(name).and_then(|m| normalize_date_token(m.as_str()))
    }
}

#[async_trait]
impl DateStrategy for ExplicitRange {
    fn name(&self) -> &'static str {
        "explicit-range"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        let caps = EXPLICIT_RANGE.captures(text)?;
        let mut start = None;
        let mut end = None;

        for (a, b) in [("between_a", "between_b"), ("from_a", "from_b")] {
            if let (Some(a), Some(b)) = (Self::token(&caps, a), Self::token(&caps, b)) {
                start = Some(a);
                end = Some(b);
            }
        }
        if let Some(since) = Self::token(&caps, "since") {
            start = Some(since);
            end = end.or(Some(today));
        }
        if let Some(after) = Self::token(&caps, "after") {
            start = Some(after);
        }
        if let Some(before) = Self::token(&caps, "before") {
            end = Some(before);
        }

        let range = DateRange::new(start, end);
        (!range.is_unbounded()).then_some(range)
    }
}

/// The first explicit date anywhere in the text, as a single day.
pub struct StandaloneDate;

#[async_trait]
impl DateStrategy for StandaloneDate {
    fn name(&self) -> &'static str {
        "standalone-date"
    }

    async fn extract(&self, text: &str, _today: NaiveDate) -> Option<DateRange> {
        first_date_in(text).map(DateRange::single)
    }
}

#[derive(Debug, Deserialize)]
struct FallbackAnswer {
    start: Option<String>,
    end: Option<String>,
}

/// Asks a generation service for a range when the text hints at time but no
/// pattern matched. Any failure yields `None`.
pub struct GenerationFallback {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
    retries: u32,
}

impl GenerationFallback {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            timeout: Duration::from_secs(20),
            retries: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts after a transient failure. Timeouts are never retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn prompt(text: &str, today: NaiveDate) -> String {
        format!(
            "You are a date range extractor. Given the current date and a user query, \
             return a JSON object with keys start, end. Use ISO YYYY-MM-DD dates or null.\n\
             Rules: start <= end when both present; interpret relative phrases relative to the current date.\n\
             Output ONLY JSON. No extra text.\n\n\
             Current date: {today}\n\
             Query: {text}\n"
        )
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        let mut attempt = 0;
        loop {
            let call = self.service.complete(prompt, self.timeout);
            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(answer)) => return Some(answer),
                Ok(Err(e)) if e.is_transient() && !e.is_timeout() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!("Date fallback attempt {attempt} failed, retrying: {e}");
                }
                Ok(Err(e)) => {
                    tracing::warn!("Date fallback via {} failed: {e}", self.service.service_name());
                    return None;
                }
                Err(_) => {
                    tracing::warn!(
                        "Date fallback via {} timed out after {:?}",
                        self.service.service_name(),
                        self.timeout
                    );
                    return None;
                }
            }
        }
    }
}

/// Reads `{"start": ..., "end": ...}` out of a model answer, tolerating code
/// fences and surrounding prose. Invalid dates count as missing.
pub fn parse_fallback_answer(answer: &str) -> Option<DateRange> {
    let open = answer.find('{')?;
    let close = answer.rfind('}')?;
    if close < open {
        return None;
    }
    let parsed: FallbackAnswer = match serde_json::from_str(&answer[open..=close]) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("Unparseable date fallback answer: {e}");
            return None;
        }
    };

    let iso = |value: Option<String>| {
        value.and_then(|v| {
            let v = v.trim();
            v.get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .filter(|_| v.len() == 10 || v[10..].starts_with(['T', ' ']))
        })
    };
    let range = DateRange::new(iso(parsed.start), iso(parsed.end));
    (!range.is_unbounded()).then_some(range)
}

#[async_trait]
impl DateStrategy for GenerationFallback {
    fn name(&self) -> &'static str {
        "generation-fallback"
    }

    async fn extract(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        if !has_temporal_hint(text) {
            return None;
        }
        let answer = self.ask(&Self::prompt(text, today)).await?;
        parse_fallback_answer(&answer)
    }
}

/// True when the text mentions something calendar-like that the patterns
/// might have missed.
pub fn has_temporal_hint(text: &str) -> bool {
    TEMPORAL_HINT.is_match(text)
}

/// Ordered strategy list; the first range found wins.
pub struct DateParser {
    strategies: Vec<Box<dyn DateStrategy>>,
}

impl Default for DateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DateParser {
    /// All pattern strategies, without a generation fallback.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(RelativePhrases),
                Box::new(LastNDigits),
                Box::new(LastNWords),
                Box::new(Fortnight),
                Box::new(ExplicitRange),
                Box::new(StandaloneDate),
            ],
        }
    }

    /// Appends a strategy after the existing ones.
    pub fn with_strategy(mut self, strategy: Box<dyn DateStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_fallback(self, fallback: GenerationFallback) -> Self {
        self.with_strategy(Box::new(fallback))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Range for `text` relative to `today`, or `None` when nothing temporal
    /// was recognised.
    pub async fn parse(&self, text: &str, today: NaiveDate) -> Option<DateRange> {
        for strategy in &self.strategies {
            if let Some(range) = strategy.extract(text, today).await {
                let range = DateRange::new(range.start, range.end);
                tracing::debug!(strategy = strategy.name(), %range, "Parsed date range");
                return Some(range);
            }
        }
        None
    }

    /// Single-day range for a date-heading line.
    pub fn parse_heading(&self, line: &str) -> Option<DateRange> {
        heading_date(line).map(DateRange::single)
    }
}
