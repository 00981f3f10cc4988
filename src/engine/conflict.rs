use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn validate_window_times(start: NaiveTime, end: NaiveTime) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::Validation(
            "window start must be before window end",
        ));
    }
    Ok(())
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

pub(crate) fn validate_duration_minutes(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 {
        return Err(EngineError::Validation("duration must be positive"));
    }
    if minutes > MAX_SERVICE_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

/// Build a recurrence from the flat legacy shape (`day_of_week` is
/// Sunday-first). A non-recurring window without a date and a day index
/// past Saturday are both rejected here, before anything reaches the store.
pub fn recurrence_from_parts(
    recurring: bool,
    day_of_week: Option<u8>,
    specific_date: Option<NaiveDate>,
) -> Result<Recurrence, EngineError> {
    if recurring {
        let idx = day_of_week.ok_or(EngineError::Validation(
            "recurring window requires a day of week",
        ))?;
        let weekday = weekday_from_index(idx)
            .ok_or(EngineError::Validation("day of week out of range"))?;
        Ok(Recurrence::Weekly { weekday })
    } else {
        // day_of_week may still be present on old rows; it is ignored.
        let date = specific_date.ok_or(EngineError::Validation(
            "non-recurring window requires a date",
        ))?;
        validate_date(date)?;
        Ok(Recurrence::Once { date })
    }
}

/// The requested occupied span for a booking, after input validation.
pub(crate) fn booking_span(
    start: NaiveDateTime,
    duration_minutes: u32,
) -> Result<Span, EngineError> {
    validate_duration_minutes(duration_minutes)?;
    validate_date(start.date())?;
    Ok(Span::new(
        start,
        start + Duration::minutes(duration_minutes as i64),
    ))
}

/// A booking must fit entirely inside one window active on its start date:
/// containment, not mere overlap. A span crossing midnight can never be
/// covered, since windows do not cross midnight.
pub(crate) fn covering_window<'a>(
    rs: &'a StaffState,
    span: &Span,
) -> Option<&'a AvailabilityWindow> {
    let date = span.start.date();
    rs.windows
        .iter()
        .filter(|w| w.applies_on(date))
        .find(|w| w.span_on(date).contains_span(span))
}

/// Scan live appointments for overlap with `span`. `exclude` skips one
/// appointment id (the update-in-place case). Occupied intervals come from
/// current service durations via `duration_of`.
pub(crate) fn check_no_conflict(
    rs: &StaffState,
    span: &Span,
    exclude: Option<Ulid>,
    duration_of: impl Fn(&Ulid) -> Option<u32>,
) -> Result<(), EngineError> {
    for appt in rs.appointments_starting_before(span.end) {
        if !appt.status.occupies_time() {
            continue;
        }
        if exclude == Some(appt.id) {
            continue;
        }
        let duration = duration_of(&appt.service_id)
            .ok_or(EngineError::NotFound(appt.service_id))?;
        if appt.occupied_span(duration).overlaps(span) {
            return Err(EngineError::Conflict(appt.id));
        }
    }
    Ok(())
}
