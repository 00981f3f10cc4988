use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)` over naive local wall-clock time.
/// The engine never converts time zones; day-of-week and time-of-day
/// matching is done in local terms throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Sunday-first day index (Sunday = 0), the stored day-of-week convention.
pub fn weekday_from_index(idx: u8) -> Option<Weekday> {
    Some(match idx {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        _ => return None,
    })
}

pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

/// WAL encoding of `Weekday` as the Sunday-first index. Keeps the record
/// format self-contained and bincode-friendly.
mod weekday_repr {
    use chrono::Weekday;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(super::weekday_index(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let idx = u8::deserialize(d)?;
        super::weekday_from_index(idx)
            .ok_or_else(|| D::Error::custom(format!("day index out of range: {idx}")))
    }
}

/// When an availability window applies. The recurring/one-off split is a
/// tagged variant so a "non-recurring window without a date" cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    /// Every week on the given weekday.
    Weekly {
        #[serde(with = "weekday_repr")]
        weekday: Weekday,
    },
    /// A single calendar date.
    Once { date: NaiveDate },
}

impl Recurrence {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self {
            Recurrence::Weekly { weekday } => date.weekday() == *weekday,
            Recurrence::Once { date: d } => *d == date,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Recurrence::Weekly { .. })
    }

    /// Sunday-first index for the flat query projection.
    pub fn day_of_week(&self) -> Option<u8> {
        match self {
            Recurrence::Weekly { weekday } => Some(weekday_index(*weekday)),
            Recurrence::Once { .. } => None,
        }
    }

    pub fn specific_date(&self) -> Option<NaiveDate> {
        match self {
            Recurrence::Weekly { .. } => None,
            Recurrence::Once { date } => Some(*date),
        }
    }
}

/// A window of time during which a staff member may be booked.
/// Invariant: `start_time < end_time`, strictly. Windows never cross
/// midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub recurrence: Recurrence,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: NaiveDateTime,
}

impl AvailabilityWindow {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.recurrence.applies_on(date)
    }

    /// Materialize the window's concrete span on a calendar date.
    pub fn span_on(&self, date: NaiveDate) -> Span {
        Span::new(date.and_time(self.start_time), date.and_time(self.end_time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    /// Only pending and confirmed appointments block the calendar.
    pub fn occupies_time(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    /// Legal transitions: pending -> confirmed, pending -> cancelled,
    /// confirmed -> cancelled. Nothing leaves cancelled.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A booked appointment. The occupied interval is derived at read time from
/// the referenced service's current duration; it is not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    pub fn occupied_span(&self, duration_minutes: u32) -> Span {
        Span::new(
            self.scheduled_at,
            self.scheduled_at + Duration::minutes(duration_minutes as i64),
        )
    }
}

/// A bookable service. Duration drives both slot stepping bounds and
/// conflict math, so services are never removed, only updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: Option<String>,
    pub duration_minutes: u32,
}

/// Per-staff record: availability windows plus the appointment book.
#[derive(Debug, Clone)]
pub struct StaffState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Sorted by `start_time` for deterministic resolution order.
    pub windows: Vec<AvailabilityWindow>,
    /// Sorted by `scheduled_at`.
    pub appointments: Vec<Appointment>,
}

impl StaffState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            windows: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Insert window maintaining sort order by start_time.
    pub fn insert_window(&mut self, window: AvailabilityWindow) {
        let pos = self
            .windows
            .binary_search_by_key(&window.start_time, |w| w.start_time)
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        if let Some(pos) = self.windows.iter().position(|w| w.id == id) {
            Some(self.windows.remove(pos))
        } else {
            None
        }
    }

    pub fn window(&self, id: &Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == *id)
    }

    /// Full replace of the mutable fields; `created_at` is immutable.
    pub fn update_window(
        &mut self,
        id: Ulid,
        recurrence: Recurrence,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> bool {
        if let Some(old) = self.remove_window(id) {
            self.insert_window(AvailabilityWindow {
                id,
                recurrence,
                start_time,
                end_time,
                created_at: old.created_at,
            });
            true
        } else {
            false
        }
    }

    /// Insert appointment maintaining sort order by scheduled_at.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.scheduled_at, |a| a.scheduled_at)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn set_status(&mut self, id: Ulid, status: AppointmentStatus) -> bool {
        if let Some(a) = self.appointments.iter_mut().find(|a| a.id == id) {
            a.status = status;
            true
        } else {
            false
        }
    }

    pub fn reschedule_appointment(&mut self, id: Ulid, scheduled_at: NaiveDateTime) -> bool {
        if let Some(pos) = self.appointments.iter().position(|a| a.id == id) {
            let mut appt = self.appointments.remove(pos);
            appt.scheduled_at = scheduled_at;
            self.insert_appointment(appt);
            true
        } else {
            false
        }
    }

    /// Appointments starting before `end`, in scheduled order. The left edge
    /// cannot be pruned here: an appointment's occupied end depends on its
    /// service duration, which only the engine can resolve.
    pub fn appointments_starting_before(&self, end: NaiveDateTime) -> &[Appointment] {
        let bound = self.appointments.partition_point(|a| a.scheduled_at < end);
        &self.appointments[..bound]
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffCreated {
        id: Ulid,
        name: Option<String>,
    },
    StaffUpdated {
        id: Ulid,
        name: Option<String>,
    },
    StaffDeleted {
        id: Ulid,
    },
    ServiceRegistered {
        id: Ulid,
        name: Option<String>,
        duration_minutes: u32,
    },
    ServiceUpdated {
        id: Ulid,
        name: Option<String>,
        duration_minutes: u32,
    },
    WindowAdded {
        id: Ulid,
        staff_id: Ulid,
        recurrence: Recurrence,
        start_time: NaiveTime,
        end_time: NaiveTime,
        created_at: NaiveDateTime,
    },
    WindowUpdated {
        id: Ulid,
        staff_id: Ulid,
        recurrence: Recurrence,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    WindowRemoved {
        id: Ulid,
        staff_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        staff_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        scheduled_at: NaiveDateTime,
        created_at: NaiveDateTime,
    },
    AppointmentRescheduled {
        id: Ulid,
        staff_id: Ulid,
        scheduled_at: NaiveDateTime,
    },
    AppointmentConfirmed {
        id: Ulid,
        staff_id: Ulid,
    },
    AppointmentCancelled {
        id: Ulid,
        staff_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

/// Flat projection of a window for callers: the tagged recurrence is
/// spread back into the legacy optional-field shape (`day_of_week` is
/// Sunday-first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub recurring: bool,
    pub day_of_week: Option<u8>,
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WindowInfo {
    pub fn project(staff_id: Ulid, w: &AvailabilityWindow) -> Self {
        Self {
            id: w.id,
            staff_id,
            recurring: w.recurrence.is_recurring(),
            day_of_week: w.recurrence.day_of_week(),
            specific_date: w.recurrence.specific_date(),
            start_time: w.start_time,
            end_time: w.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub duration_minutes: u32,
}
