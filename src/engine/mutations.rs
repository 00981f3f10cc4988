use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, BOOKING_CONFLICTS_TOTAL};

use super::conflict::{
    booking_span, check_no_conflict, covering_window, now_local, validate_date,
    validate_duration_minutes, validate_window_times,
};
use super::{Engine, EngineError, SharedStaffState, WalCommand};

impl Engine {
    pub async fn create_staff(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("staff name too long"));
            }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        let rs = StaffState::new(id, name);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_staff(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("staff name too long"));
            }
        let rs = self.get_staff(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::StaffUpdated { id, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Removes the staff record and everything on it, windows and
    /// appointments included.
    pub async fn delete_staff(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::StaffDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn register_service(
        &self,
        id: Ulid,
        name: Option<String>,
        duration_minutes: u32,
    ) -> Result<(), EngineError> {
        validate_duration_minutes(duration_minutes)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("service name too long"));
            }
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceRegistered {
            id,
            name: name.clone(),
            duration_minutes,
        };
        self.wal_append(&event).await?;
        self.services.insert(id, Service { id, name, duration_minutes });
        Ok(())
    }

    /// Services are updated in place, never removed: a stored appointment's
    /// occupied interval must always be computable. Note that editing the
    /// duration moves the occupied interval of every appointment referencing
    /// this service, past ones included.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: Option<String>,
        duration_minutes: u32,
    ) -> Result<(), EngineError> {
        validate_duration_minutes(duration_minutes)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("service name too long"));
            }
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ServiceUpdated {
            id,
            name: name.clone(),
            duration_minutes,
        };
        self.wal_append(&event).await?;
        self.services.insert(id, Service { id, name, duration_minutes });
        Ok(())
    }

    pub async fn add_window(
        &self,
        id: Ulid,
        staff_id: Ulid,
        recurrence: Recurrence,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<(), EngineError> {
        validate_window_times(start_time, end_time)?;
        if let Recurrence::Once { date } = recurrence {
            validate_date(date)?;
        }
        let rs = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = rs.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many windows on staff member"));
        }

        let event = Event::WindowAdded {
            id,
            staff_id,
            recurrence,
            start_time,
            end_time,
            created_at: now_local(),
        };
        self.persist_and_apply(staff_id, &mut guard, &event).await
    }

    /// Full replace of the window's mutable fields.
    pub async fn update_window(
        &self,
        id: Ulid,
        recurrence: Recurrence,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Ulid, EngineError> {
        validate_window_times(start_time, end_time)?;
        if let Recurrence::Once { date } = recurrence {
            validate_date(date)?;
        }
        let (staff_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.window(&id).is_none() {
            // the id resolved to an appointment, not a window
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WindowUpdated {
            id,
            staff_id,
            recurrence,
            start_time,
            end_time,
        };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        Ok(staff_id)
    }

    /// Deleting a window does not touch appointments already booked inside
    /// it; they keep occupying their interval.
    pub async fn remove_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (staff_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.window(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WindowRemoved { id, staff_id };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        Ok(staff_id)
    }

    /// Check-and-insert under the staff write lock. Two concurrent calls for
    /// overlapping spans serialize here; the second re-validates against the
    /// committed state and fails with `Conflict`. The appointment is created
    /// `Pending`, which already occupies its slot.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        staff_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        scheduled_at: NaiveDateTime,
    ) -> Result<(), EngineError> {
        let duration = self.service_duration(&service_id)?;
        let span = booking_span(scheduled_at, duration)?;
        let rs = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = rs.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many appointments on staff member"));
        }

        if covering_window(&guard, &span).is_none() {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::OutsideAvailability(span));
        }
        if let Err(e) = check_no_conflict(&guard, &span, None, self.duration_lookup()) {
            if matches!(e, EngineError::Conflict(_)) {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let event = Event::AppointmentBooked {
            id,
            staff_id,
            client_id,
            service_id,
            scheduled_at,
            created_at: now_local(),
        };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        metrics::counter!(BOOKINGS_TOTAL).increment(1);
        Ok(())
    }

    /// Move an appointment, re-running the full availability check but
    /// excluding the appointment's own occupied interval.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        scheduled_at: NaiveDateTime,
    ) -> Result<Ulid, EngineError> {
        let (staff_id, mut guard) = self.resolve_entity_write(&id).await?;
        let (status, service_id) = match guard.appointment(&id) {
            Some(a) => (a.status, a.service_id),
            None => return Err(EngineError::NotFound(id)),
        };
        if !status.occupies_time() {
            return Err(EngineError::Validation(
                "cancelled appointments cannot be rescheduled",
            ));
        }
        let duration = self.service_duration(&service_id)?;
        let span = booking_span(scheduled_at, duration)?;

        if covering_window(&guard, &span).is_none() {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::OutsideAvailability(span));
        }
        if let Err(e) = check_no_conflict(&guard, &span, Some(id), self.duration_lookup()) {
            if matches!(e, EngineError::Conflict(_)) {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let event = Event::AppointmentRescheduled { id, staff_id, scheduled_at };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        Ok(staff_id)
    }

    pub async fn confirm_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition_appointment(id, AppointmentStatus::Confirmed).await
    }

    /// Cancelling frees the slot immediately; the record is retained until
    /// the next WAL compaction prunes it.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition_appointment(id, AppointmentStatus::Cancelled).await
    }

    async fn transition_appointment(
        &self,
        id: Ulid,
        to: AppointmentStatus,
    ) -> Result<Ulid, EngineError> {
        let (staff_id, mut guard) = self.resolve_entity_write(&id).await?;
        let from = match guard.appointment(&id) {
            Some(a) => a.status,
            None => return Err(EngineError::NotFound(id)),
        };
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }
        let event = match to {
            AppointmentStatus::Confirmed => Event::AppointmentConfirmed { id, staff_id },
            AppointmentStatus::Cancelled => Event::AppointmentCancelled { id, staff_id },
            AppointmentStatus::Pending => unreachable!("nothing transitions back to pending"),
        };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        Ok(staff_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Cancelled appointments are dropped here.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for svc in self.services.iter() {
            events.push(Event::ServiceRegistered {
                id: svc.id,
                name: svc.name.clone(),
                duration_minutes: svc.duration_minutes,
            });
        }

        // Snapshot the Arcs first; awaiting a read lock while iterating the
        // map would hold a shard lock across the await.
        let staff: Vec<SharedStaffState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for rs in staff {
            let guard = rs.read().await;
            events.push(Event::StaffCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for w in &guard.windows {
                events.push(Event::WindowAdded {
                    id: w.id,
                    staff_id: guard.id,
                    recurrence: w.recurrence,
                    start_time: w.start_time,
                    end_time: w.end_time,
                    created_at: w.created_at,
                });
            }
            for a in &guard.appointments {
                if a.status == AppointmentStatus::Cancelled {
                    continue;
                }
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    staff_id: guard.id,
                    client_id: a.client_id,
                    service_id: a.service_id,
                    scheduled_at: a.scheduled_at,
                    created_at: a.created_at,
                });
                if a.status == AppointmentStatus::Confirmed {
                    events.push(Event::AppointmentConfirmed {
                        id: a.id,
                        staff_id: guard.id,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
