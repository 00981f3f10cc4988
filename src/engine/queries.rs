use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::SLOT_QUERIES_TOTAL;

use super::availability::{occupied_spans, slot_starts_in, windows_on};
use super::conflict::{booking_span, check_no_conflict, covering_window, validate_date};
use super::{Engine, EngineError, SharedStaffState};

impl Engine {
    /// Windows active for a staff member on a calendar date: recurring
    /// windows on that weekday plus one-off windows pinned to the date.
    /// Unknown staff or nothing active resolves to an empty set, not an
    /// error.
    pub async fn resolve_windows(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<WindowInfo>, EngineError> {
        validate_date(date)?;
        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(windows_on(&guard.windows, date)
            .into_iter()
            .map(|w| WindowInfo::project(staff_id, w))
            .collect())
    }

    /// Enumerate bookable start times for a service over an inclusive date
    /// range, ascending. Stored appointments are read once for the whole
    /// range, not per candidate.
    pub async fn available_slots(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDateTime>, EngineError> {
        validate_date(from)?;
        validate_date(to)?;
        if to < from {
            return Err(EngineError::Validation("date range is reversed"));
        }
        if (to - from).num_days() + 1 > MAX_SLOT_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        metrics::counter!(SLOT_QUERIES_TOTAL).increment(1);
        // An unknown service fails the whole enumeration; silently dropping
        // the staff member would read as "fully booked".
        let duration = Duration::minutes(self.service_duration(&service_id)? as i64);

        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;

        let range_end = match to.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN),
            None => return Err(EngineError::LimitExceeded("date out of range")),
        };
        let range = Span::new(from.and_time(NaiveTime::MIN), range_end);
        let busy = occupied_spans(
            guard.appointments_starting_before(range.end),
            &range,
            self.duration_lookup(),
        )?;

        let mut out = Vec::new();
        let mut day = from;
        while day <= to {
            for w in windows_on(&guard.windows, day) {
                slot_starts_in(&w.span_on(day), duration, &busy, &mut out);
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        out.sort();
        Ok(out)
    }

    /// The availability predicate: true iff the requested span fits entirely
    /// inside one window on its start date and overlaps no live appointment.
    /// `Ok(false)` is a normal outcome, not an error. `exclude` skips one
    /// appointment id, for checking an update-in-place.
    pub async fn is_available(
        &self,
        staff_id: Ulid,
        start: NaiveDateTime,
        duration_minutes: u32,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = booking_span(start, duration_minutes)?;
        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(false),
        };
        let guard = rs.read().await;
        if covering_window(&guard, &span).is_none() {
            // outside all windows; no appointment scan needed
            return Ok(false);
        }
        match check_no_conflict(&guard, &span, exclude, self.duration_lookup()) {
            Ok(()) => Ok(true),
            Err(EngineError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list_staff(&self) -> Vec<StaffInfo> {
        let staff: Vec<SharedStaffState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(staff.len());
        for rs in staff {
            let guard = rs.read().await;
            out.push(StaffInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        out
    }

    pub async fn get_windows(&self, staff_id: Ulid) -> Result<Vec<WindowInfo>, EngineError> {
        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard
            .windows
            .iter()
            .map(|w| WindowInfo::project(staff_id, w))
            .collect())
    }

    pub async fn get_appointments(
        &self,
        staff_id: Ulid,
    ) -> Result<Vec<AppointmentInfo>, EngineError> {
        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard
            .appointments
            .iter()
            .map(|a| AppointmentInfo {
                id: a.id,
                staff_id,
                client_id: a.client_id,
                service_id: a.service_id,
                scheduled_at: a.scheduled_at,
                status: a.status,
            })
            .collect())
    }

    /// Appointments whose occupied interval overlaps `[from, to)`, filtered
    /// to the given statuses. Occupied intervals come from current service
    /// durations, so an unknown service id on a stored row is an error.
    pub async fn appointments_between(
        &self,
        staff_id: Ulid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<AppointmentInfo>, EngineError> {
        if from >= to {
            return Err(EngineError::Validation("date range is reversed"));
        }
        let rs = match self.get_staff(&staff_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        let mut out = Vec::new();
        for a in guard.appointments_starting_before(to) {
            if !statuses.contains(&a.status) {
                continue;
            }
            let duration = self
                .services
                .get(&a.service_id)
                .map(|s| s.duration_minutes)
                .ok_or(EngineError::NotFound(a.service_id))?;
            if a.occupied_span(duration).end > from {
                out.push(AppointmentInfo {
                    id: a.id,
                    staff_id,
                    client_id: a.client_id,
                    service_id: a.service_id,
                    scheduled_at: a.scheduled_at,
                    status: a.status,
                });
            }
        }
        Ok(out)
    }

    pub fn list_services(&self) -> Vec<ServiceInfo> {
        self.services
            .iter()
            .map(|s| ServiceInfo {
                id: s.id,
                name: s.name.clone(),
                duration_minutes: s.duration_minutes,
            })
            .collect()
    }
}
