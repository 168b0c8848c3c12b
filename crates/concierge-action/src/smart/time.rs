//! Relative time expressions the fast path can resolve on its own.
//!
//! Only two shapes are accepted: a day word with "at <time>" ("tomorrow at
//! 2pm", "tonight at 8", optionally "for 2 hours") and a clock range ("3pm
//! to 4pm", optionally with a day word). Anything vaguer is left to the
//! model.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use regex::{Captures, Regex};

use concierge_core::RequestContext;

static DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tomorrow|tonight)\b").expect("Invalid day word regex")
});

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:from\s+|at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\s*(?:to|until|till|-)\s*(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b",
    )
    .expect("Invalid time range regex")
});

static AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("Invalid time regex")
});

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(\d{1,4}|an?|one)\s*(hours?|hrs?|minutes?|mins?)\b")
        .expect("Invalid duration regex")
});

/// Length words that are left over once the parsed expression is cut out.
static DURATION_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:hours?|hrs?|minutes?|mins?|half|quarter|all[- ]day|overnight)\b")
        .expect("Invalid duration word regex")
});

const MAX_DURATION_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayWord {
    Today,
    Tomorrow,
    Tonight,
}

impl DayWord {
    fn offset_days(self) -> i64 {
        match self {
            DayWord::Today | DayWord::Tonight => 0,
            DayWord::Tomorrow => 1,
        }
    }
}

/// A time expression located in the request text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeExpr {
    pub day: Option<DayWord>,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    /// Explicit length ("for 90 minutes"). Only set when `end` is not.
    pub duration_minutes: Option<i64>,
    /// Byte ranges of the matched words, so callers can cut them out.
    pub spans: Vec<(usize, usize)>,
}

/// Find a resolvable time expression in `text`.
pub fn find(text: &str) -> Option<TimeExpr> {
    let day_match = DAY_RE.find(text);
    let day = day_match.map(|m| match m.as_str().to_ascii_lowercase().as_str() {
        "tomorrow" => DayWord::Tomorrow,
        "tonight" => DayWord::Tonight,
        _ => DayWord::Today,
    });
    let evening = day == Some(DayWord::Tonight);

    let mut spans: Vec<(usize, usize)> = day_match.iter().map(|m| (m.start(), m.end())).collect();

    if let Some(caps) = RANGE_RE.captures(text) {
        let end_meridiem = caps.get(6).map(|m| m.as_str().to_ascii_lowercase());
        let end = clock(&caps, 4, 5, end_meridiem.as_deref(), false)?;
        let start = match caps.get(3) {
            Some(m) => clock(&caps, 1, 2, Some(&m.as_str().to_ascii_lowercase()), false)?,
            None => {
                // "3 to 4pm": the start borrows the end's meridiem unless
                // that would put it after the end ("11 to 1pm").
                let borrowed = clock(&caps, 1, 2, end_meridiem.as_deref(), false)?;
                if borrowed < end {
                    borrowed
                } else {
                    clock(&caps, 1, 2, Some("am"), false)?
                }
            }
        };
        let whole = caps.get(0)?;
        spans.push((whole.start(), whole.end()));
        return Some(TimeExpr {
            day,
            start,
            end: Some(end),
            duration_minutes: None,
            spans,
        });
    }

    // A lone "at 3pm" needs a day word to be unambiguous.
    day?;
    let caps = AT_RE.captures(text)?;
    let meridiem = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());
    let start = clock(&caps, 1, 2, meridiem.as_deref(), evening)?;
    let whole = caps.get(0)?;
    spans.push((whole.start(), whole.end()));

    let mut duration_minutes = None;
    if let Some(caps) = DURATION_RE.captures(text) {
        if let Some(minutes) = duration(&caps) {
            let whole = caps.get(0)?;
            spans.push((whole.start(), whole.end()));
            duration_minutes = Some(minutes);
        }
    }
    Some(TimeExpr {
        day,
        start,
        end: None,
        duration_minutes,
        spans,
    })
}

fn duration(caps: &Captures<'_>) -> Option<i64> {
    let count: i64 = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        digits => digits.parse().ok()?,
    };
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    let minutes = if unit.starts_with('h') { count * 60 } else { count };
    (1..=MAX_DURATION_MINUTES).contains(&minutes).then_some(minutes)
}

/// `text` with the given byte ranges replaced by spaces.
pub fn cut_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = text.to_string();
    let mut spans = spans.to_vec();
    spans.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    for (start, end) in spans {
        if end <= out.len() && out.is_char_boundary(start) && out.is_char_boundary(end) {
            out.replace_range(start..end, " ");
        }
    }
    out
}

/// Whether length words remain outside `spans` ("for 1.5 hours", "half an
/// hour", "all day"). Such a request cannot be fully resolved here.
pub fn has_unparsed_duration(text: &str, spans: &[(usize, usize)]) -> bool {
    DURATION_WORD_RE.is_match(&cut_spans(text, spans))
}

fn clock(caps: &Captures<'_>, hour: usize, minute: usize, meridiem: Option<&str>, evening: bool) -> Option<NaiveTime> {
    let h: u32 = caps.get(hour)?.as_str().parse().ok()?;
    let m: u32 = match caps.get(minute) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let h = match meridiem {
        Some("am") if (1..=12).contains(&h) => h % 12,
        Some("pm") if (1..=12).contains(&h) => h % 12 + 12,
        Some(_) => return None,
        // Bare hours are only trusted in the evening ("tonight at 8").
        None if evening && (1..=11).contains(&h) => h + 12,
        None => return None,
    };
    NaiveTime::from_hms_opt(h, m, 0)
}

/// Why an expression could not be turned into absolute times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// The local time does not exist or is ambiguous (DST change).
    LocalTime,
    EndNotAfterStart,
}

/// Resolve an expression to UTC start and end in the caller's timezone.
/// A missing end gets `default_minutes`.
pub fn resolve(
    expr: &TimeExpr,
    ctx: &RequestContext,
    default_minutes: i64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Unresolved> {
    let offset = expr.day.map_or(0, DayWord::offset_days);
    let date = ctx.local_now().date_naive() + Duration::days(offset);
    let at = |t: NaiveTime| {
        ctx.timezone
            .from_local_datetime(&date.and_time(t))
            .single()
            .map(|d| d.with_timezone(&Utc))
            .ok_or(Unresolved::LocalTime)
    };
    let start = at(expr.start)?;
    let end = match expr.end {
        Some(end) => at(end)?,
        None => start + Duration::minutes(expr.duration_minutes.unwrap_or(default_minutes)),
    };
    if end <= start {
        return Err(Unresolved::EndNotAfterStart);
    }
    Ok((start, end))
}
