use chrono::{Duration, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Slot Enumeration Algorithm ────────────────────────────────────

/// Candidate slot granularity, in minutes. This is policy, not tuning:
/// changing it changes which start times exist at all.
pub const SLOT_STEP_MINUTES: i64 = 15;

/// Windows active on a calendar date: recurring windows whose weekday
/// matches, plus one-off windows pinned to that exact date. Overlapping
/// windows are all returned; nothing is merged or deduplicated.
pub fn windows_on(windows: &[AvailabilityWindow], date: NaiveDate) -> Vec<&AvailabilityWindow> {
    windows.iter().filter(|w| w.applies_on(date)).collect()
}

/// Occupied intervals of live appointments intersecting `query`, computed
/// from current service durations and sorted by start.
///
/// `duration_of` returning None for a stored appointment is a hard error:
/// skipping the record would silently free its time.
pub fn occupied_spans(
    appointments: &[Appointment],
    query: &Span,
    duration_of: impl Fn(&Ulid) -> Option<u32>,
) -> Result<Vec<Span>, EngineError> {
    let mut busy = Vec::new();
    for appt in appointments {
        if !appt.status.occupies_time() {
            continue;
        }
        if appt.scheduled_at >= query.end {
            continue;
        }
        let duration = duration_of(&appt.service_id)
            .ok_or(EngineError::NotFound(appt.service_id))?;
        let span = appt.occupied_span(duration);
        if span.end > query.start {
            busy.push(span);
        }
    }
    busy.sort_by_key(|s| s.start);
    Ok(busy)
}

/// Walk a materialized window at the fixed step, emitting every start whose
/// full span fits inside the window and misses all `busy` intervals.
/// Steps are aligned to the window start, not to the clock.
pub fn slot_starts_in(
    window: &Span,
    duration: Duration,
    busy: &[Span],
    out: &mut Vec<NaiveDateTime>,
) {
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let mut candidate = window.start;
    while candidate + duration <= window.end {
        let span = Span::new(candidate, candidate + duration);
        if !busy.iter().any(|b| b.overlaps(&span)) {
            out.push(candidate);
        }
        candidate = candidate + step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn dt(date: &str, h: u32, m: u32) -> NaiveDateTime {
        d(date).and_time(t(h, m))
    }

    fn weekly(weekday: Weekday, start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Ulid::new(),
            recurrence: Recurrence::Weekly { weekday },
            start_time: start,
            end_time: end,
            created_at: dt("2025-01-01", 0, 0),
        }
    }

    fn once(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Ulid::new(),
            recurrence: Recurrence::Once { date },
            start_time: start,
            end_time: end,
            created_at: dt("2025-01-01", 0, 0),
        }
    }

    fn appt(at: NaiveDateTime, service_id: Ulid, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: Ulid::new(),
            service_id,
            scheduled_at: at,
            status,
            created_at: dt("2025-01-01", 0, 0),
        }
    }

    // ── windows_on ────────────────────────────────────────

    #[test]
    fn windows_on_matches_recurring_weekday() {
        let windows = vec![
            weekly(Weekday::Mon, t(9, 0), t(11, 0)),
            weekly(Weekday::Tue, t(9, 0), t(11, 0)),
        ];
        // 2025-06-16 is a Monday
        let hits = windows_on(&windows, d("2025-06-16"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, windows[0].id);
    }

    #[test]
    fn windows_on_matches_specific_date() {
        let windows = vec![once(d("2025-06-19"), t(13, 0), t(15, 0))];
        assert_eq!(windows_on(&windows, d("2025-06-19")).len(), 1);
        assert!(windows_on(&windows, d("2025-06-20")).is_empty());
        // same weekday one week later does not match a one-off window
        assert!(windows_on(&windows, d("2025-06-26")).is_empty());
    }

    #[test]
    fn windows_on_includes_both_kinds() {
        // a one-off extension on a day that already has a recurring window
        let windows = vec![
            weekly(Weekday::Thu, t(9, 0), t(11, 0)),
            once(d("2025-06-19"), t(13, 0), t(15, 0)),
        ];
        let hits = windows_on(&windows, d("2025-06-19")); // a Thursday
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn windows_on_empty_for_no_match() {
        let windows = vec![weekly(Weekday::Mon, t(9, 0), t(11, 0))];
        assert!(windows_on(&windows, d("2025-06-17")).is_empty());
        assert!(windows_on(&[], d("2025-06-17")).is_empty());
    }

    // ── occupied_spans ────────────────────────────────────

    #[test]
    fn occupied_spans_skips_cancelled() {
        let svc = Ulid::new();
        let appointments = vec![
            appt(dt("2025-06-16", 9, 30), svc, AppointmentStatus::Confirmed),
            appt(dt("2025-06-16", 10, 0), svc, AppointmentStatus::Cancelled),
            appt(dt("2025-06-16", 10, 30), svc, AppointmentStatus::Pending),
        ];
        let query = Span::new(dt("2025-06-16", 0, 0), dt("2025-06-17", 0, 0));
        let busy = occupied_spans(&appointments, &query, |_| Some(30)).unwrap();
        assert_eq!(
            busy,
            vec![
                Span::new(dt("2025-06-16", 9, 30), dt("2025-06-16", 10, 0)),
                Span::new(dt("2025-06-16", 10, 30), dt("2025-06-16", 11, 0)),
            ]
        );
    }

    #[test]
    fn occupied_spans_excludes_outside_query() {
        let svc = Ulid::new();
        let appointments = vec![
            appt(dt("2025-06-15", 9, 0), svc, AppointmentStatus::Confirmed),
            appt(dt("2025-06-16", 9, 0), svc, AppointmentStatus::Confirmed),
            appt(dt("2025-06-18", 9, 0), svc, AppointmentStatus::Confirmed),
        ];
        let query = Span::new(dt("2025-06-16", 0, 0), dt("2025-06-17", 0, 0));
        let busy = occupied_spans(&appointments, &query, |_| Some(30)).unwrap();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].start, dt("2025-06-16", 9, 0));
    }

    #[test]
    fn occupied_spans_straddling_query_edge_included() {
        let svc = Ulid::new();
        // ends one minute into the query range
        let appointments = vec![appt(dt("2025-06-15", 23, 31), svc, AppointmentStatus::Confirmed)];
        let query = Span::new(dt("2025-06-16", 0, 0), dt("2025-06-17", 0, 0));
        let busy = occupied_spans(&appointments, &query, |_| Some(30)).unwrap();
        assert_eq!(busy.len(), 1);
    }

    #[test]
    fn occupied_spans_unknown_service_is_error() {
        let appointments = vec![appt(
            dt("2025-06-16", 9, 0),
            Ulid::new(),
            AppointmentStatus::Confirmed,
        )];
        let query = Span::new(dt("2025-06-16", 0, 0), dt("2025-06-17", 0, 0));
        let result = occupied_spans(&appointments, &query, |_| None);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    // ── slot_starts_in ────────────────────────────────────

    #[test]
    fn slots_step_through_open_window() {
        // Monday 09:00-11:00, 30 minute service, no appointments:
        // 09:00 through 10:30, seven slots at 15 minute steps.
        let window = Span::new(dt("2025-06-16", 9, 0), dt("2025-06-16", 11, 0));
        let mut out = Vec::new();
        slot_starts_in(&window, Duration::minutes(30), &[], &mut out);
        let expected: Vec<NaiveDateTime> = [
            (9, 0), (9, 15), (9, 30), (9, 45), (10, 0), (10, 15), (10, 30),
        ]
        .iter()
        .map(|&(h, m)| dt("2025-06-16", h, m))
        .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn slots_avoid_busy_interval() {
        // Same window with 09:30-10:00 taken: 09:15 dies because its span
        // reaches 09:45; availability resumes at 10:00.
        let window = Span::new(dt("2025-06-16", 9, 0), dt("2025-06-16", 11, 0));
        let busy = vec![Span::new(dt("2025-06-16", 9, 30), dt("2025-06-16", 10, 0))];
        let mut out = Vec::new();
        slot_starts_in(&window, Duration::minutes(30), &busy, &mut out);
        let expected: Vec<NaiveDateTime> = [(9, 0), (10, 0), (10, 15), (10, 30)]
            .iter()
            .map(|&(h, m)| dt("2025-06-16", h, m))
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn slots_never_exceed_window_end() {
        let window = Span::new(dt("2025-06-16", 9, 0), dt("2025-06-16", 10, 0));
        let mut out = Vec::new();
        slot_starts_in(&window, Duration::minutes(45), &[], &mut out);
        // 09:00 fits (ends 09:45); 09:15 would end 10:00, exactly at the
        // window end, which still fits half-open; 09:30 would not.
        assert_eq!(out, vec![dt("2025-06-16", 9, 0), dt("2025-06-16", 9, 15)]);
    }

    #[test]
    fn slots_empty_when_service_outlasts_window() {
        let window = Span::new(dt("2025-06-16", 9, 0), dt("2025-06-16", 9, 30));
        let mut out = Vec::new();
        slot_starts_in(&window, Duration::minutes(45), &[], &mut out);
        assert!(out.is_empty());
    }
}
