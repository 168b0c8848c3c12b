//! Temporal guard.
//!
//! Validates and repairs the date arguments of an [`Intent`] before any
//! storage call. Pure: "now" and the timezone come from the
//! [`RequestContext`].

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use tracing::{debug, info};

use concierge_core::{DateRange, RequestContext};

use crate::error::OperationError;
use crate::intent::{CalendarOp, EventCriteria, Intent, Operation};

/// Seconds of grace before a proposed start counts as in the past.
pub const PAST_EVENT_GRACE_SECS: i64 = 60;

const THIS_WEEK: &str = "this week";

/// Check or correct the intent's temporal arguments in place.
///
/// Calendar creates starting before `now - 1 minute` are rejected. Calendar
/// searches get the current week when the raw text says "this week", or
/// when the supplied range is clearly stale.
pub fn apply(intent: &mut Intent, ctx: &RequestContext) -> Result<(), OperationError> {
    let says_this_week = intent.raw_text.to_lowercase().contains(THIS_WEEK);
    match &mut intent.operation {
        Operation::Calendar(CalendarOp::Create(draft)) => {
            check_not_past(draft.start_time, ctx)?;
        }
        Operation::Calendar(CalendarOp::Search(criteria))
        | Operation::Calendar(CalendarOp::Read(criteria)) => {
            repair_search_range(criteria, says_this_week, ctx);
        }
        _ => {}
    }
    Ok(())
}

fn check_not_past(start: DateTime<Utc>, ctx: &RequestContext) -> Result<(), OperationError> {
    if start < ctx.now - Duration::seconds(PAST_EVENT_GRACE_SECS) {
        let local_start = start.with_timezone(&ctx.timezone);
        let local_now = ctx.local_now();
        info!(
            user_id = %ctx.user_id,
            start = %start,
            "Rejected calendar create in the past"
        );
        return Err(OperationError::PastEventRejected(format!(
            "That start time ({}) is already in the past; it is now {}. \
             Did you mean a later time today, or the same time on another day?",
            local_start.format("%A %B %-d, %Y at %-I:%M %p"),
            local_now.format("%A %B %-d, %Y at %-I:%M %p %Z"),
        )));
    }
    Ok(())
}

fn repair_search_range(criteria: &mut EventCriteria, says_this_week: bool, ctx: &RequestContext) {
    if says_this_week {
        let week = current_week(ctx);
        if criteria.range != Some(week) {
            debug!(user_id = %ctx.user_id, "Search range overwritten with the current week");
        }
        criteria.range = Some(week);
        return;
    }
    if let Some(range) = criteria.range {
        let floor = ctx.local_now().year() - 1;
        let start_year = range.start.with_timezone(&ctx.timezone).year();
        let end_year = range.end.with_timezone(&ctx.timezone).year();
        if start_year < floor || end_year < floor {
            debug!(
                user_id = %ctx.user_id,
                start_year,
                "Stale search range replaced with the current week"
            );
            criteria.range = Some(current_week(ctx));
        }
    }
}

/// The local week containing `ctx.now`: Sunday 00:00:00 through Saturday
/// 23:59:59.999, returned in UTC.
pub fn current_week(ctx: &RequestContext) -> DateRange {
    let today = ctx.local_now().date_naive();
    let sunday = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    let saturday = sunday + Duration::days(6);
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    DateRange {
        start: local_to_utc(sunday.and_time(NaiveTime::MIN), ctx.timezone),
        end: local_to_utc(saturday.and_time(end_of_day), ctx.timezone),
    }
}

/// Resolve a local wall-clock time, stepping past a DST gap when needed.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an RFC 3339 timestamp, a naive local timestamp, or a bare date
/// (local midnight).
pub fn parse_datetime(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(local_to_utc(naive, tz));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| local_to_utc(d.and_time(NaiveTime::MIN), tz))
}

/// Parse the end of a range. A bare date covers that whole day, so it
/// resolves to the following local midnight.
pub fn parse_range_end(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let next = d.succ_opt()?;
        return Some(local_to_utc(next.and_time(NaiveTime::MIN), tz));
    }
    parse_datetime(trimmed, tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::{EventDraft, UserId};

    // Wednesday 2026-10-14 15:00 UTC.
    fn ctx(tz: Option<&str>) -> RequestContext {
        RequestContext::at(
            UserId::from("u1"),
            tz,
            Utc.with_ymd_and_hms(2026, 10, 14, 15, 0, 0).unwrap(),
        )
    }

    fn create_at(start: DateTime<Utc>) -> Intent {
        Intent::new(
            Operation::Calendar(CalendarOp::Create(EventDraft {
                title: "Sync".to_string(),
                description: None,
                location: None,
                start_time: start,
                end_time: None,
                attendees: vec![],
            })),
            "schedule sync",
        )
    }

    fn search(range: Option<DateRange>, text: &str) -> Intent {
        Intent::new(
            Operation::Calendar(CalendarOp::Search(EventCriteria {
                range,
                ..EventCriteria::default()
            })),
            text,
        )
    }

    fn range_of(intent: &Intent) -> Option<DateRange> {
        match &intent.operation {
            Operation::Calendar(CalendarOp::Search(c)) => c.range,
            _ => None,
        }
    }

    #[test]
    fn test_create_in_past_rejected() {
        let ctx = ctx(None);
        let mut intent = create_at(ctx.now - Duration::seconds(61));
        let err = apply(&mut intent, &ctx).unwrap_err();
        assert!(matches!(err, OperationError::PastEventRejected(_)));
    }

    #[test]
    fn test_create_within_grace_allowed() {
        let ctx = ctx(None);
        let mut intent = create_at(ctx.now - Duration::seconds(30));
        assert!(apply(&mut intent, &ctx).is_ok());
        let mut intent = create_at(ctx.now + Duration::hours(2));
        assert!(apply(&mut intent, &ctx).is_ok());
    }

    #[test]
    fn test_current_week_bounds_utc() {
        let week = current_week(&ctx(None));
        assert_eq!(week.start, Utc.with_ymd_and_hms(2026, 10, 11, 0, 0, 0).unwrap());
        assert_eq!(
            week.end,
            Utc.with_ymd_and_hms(2026, 10, 17, 23, 59, 59).unwrap() + Duration::milliseconds(999)
        );
    }

    #[test]
    fn test_current_week_bounds_local() {
        let ctx = ctx(Some("America/Los_Angeles"));
        let week = current_week(&ctx);
        // Sunday 2026-10-11 00:00 PDT is 07:00 UTC.
        assert_eq!(week.start, Utc.with_ymd_and_hms(2026, 10, 11, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_current_week_on_sunday_starts_today() {
        let ctx = RequestContext::at(
            UserId::from("u1"),
            None,
            Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
        );
        let week = current_week(&ctx);
        assert_eq!(week.start, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_this_week_overwrites_supplied_range() {
        let ctx = ctx(None);
        let stale = DateRange {
            start: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2022, 1, 2, 0, 0, 0).unwrap(),
        };
        let mut intent = search(Some(stale), "What's on my calendar this week?");
        apply(&mut intent, &ctx).unwrap();
        assert_eq!(range_of(&intent), Some(current_week(&ctx)));
    }

    #[test]
    fn test_this_week_overwrites_plausible_range_too() {
        let ctx = ctx(None);
        let wrong_week = DateRange {
            start: Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
        };
        let mut intent = search(Some(wrong_week), "meetings THIS WEEK");
        apply(&mut intent, &ctx).unwrap();
        assert_eq!(range_of(&intent), Some(current_week(&ctx)));
    }

    #[test]
    fn test_stale_year_replaced() {
        let ctx = ctx(None);
        let stale = DateRange {
            start: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2023, 5, 8, 0, 0, 0).unwrap(),
        };
        let mut intent = search(Some(stale), "meetings in may");
        apply(&mut intent, &ctx).unwrap();
        assert_eq!(range_of(&intent), Some(current_week(&ctx)));
    }

    #[test]
    fn test_last_year_range_kept() {
        let ctx = ctx(None);
        let last_year = DateRange {
            start: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 5, 8, 0, 0, 0).unwrap(),
        };
        let mut intent = search(Some(last_year), "meetings last may");
        apply(&mut intent, &ctx).unwrap();
        assert_eq!(range_of(&intent), Some(last_year));
    }

    #[test]
    fn test_search_without_range_untouched() {
        let ctx = ctx(None);
        let mut intent = search(None, "find the design review");
        apply(&mut intent, &ctx).unwrap();
        assert_eq!(range_of(&intent), None);
    }

    #[test]
    fn test_parse_datetime_forms() {
        let tz = chrono_tz::Europe::Berlin;
        assert_eq!(
            parse_datetime("2026-10-20T10:00:00Z", tz),
            Some(Utc.with_ymd_and_hms(2026, 10, 20, 10, 0, 0).unwrap())
        );
        assert_eq!(
            parse_datetime("2026-10-20T10:00", tz),
            Some(Utc.with_ymd_and_hms(2026, 10, 20, 8, 0, 0).unwrap())
        );
        assert_eq!(
            parse_datetime("2026-10-20", Tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 10, 20, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("next tuesday", tz), None);
    }

    #[test]
    fn test_parse_range_end_date_only() {
        assert_eq!(
            parse_range_end("2026-10-20", Tz::UTC),
            Some(Utc.with_ymd_and_hms(2026, 10, 21, 0, 0, 0).unwrap())
        );
    }
}
