mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{SLOT_STEP_MINUTES, occupied_spans, slot_starts_in, windows_on};
pub use conflict::recurrence_from_parts;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedStaffState = Arc<RwLock<StaffState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's booking engine: staff records, the service registry, and
/// the WAL that makes them durable. All conflict checking happens under the
/// per-staff write lock, which is what makes check-then-insert atomic.
pub struct Engine {
    pub state: DashMap<Ulid, SharedStaffState>,
    pub services: DashMap<Ulid, Service>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: window or appointment id to staff id.
    pub(super) entity_to_staff: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a StaffState (no locking, caller holds the lock).
fn apply_to_staff(rs: &mut StaffState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowAdded {
            id,
            staff_id,
            recurrence,
            start_time,
            end_time,
            created_at,
        } => {
            rs.insert_window(AvailabilityWindow {
                id: *id,
                recurrence: *recurrence,
                start_time: *start_time,
                end_time: *end_time,
                created_at: *created_at,
            });
            entity_map.insert(*id, *staff_id);
        }
        Event::WindowUpdated {
            id,
            staff_id,
            recurrence,
            start_time,
            end_time,
        } => {
            rs.update_window(*id, *recurrence, *start_time, *end_time);
            entity_map.insert(*id, *staff_id);
        }
        Event::WindowRemoved { id, .. } => {
            rs.remove_window(*id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            staff_id,
            client_id,
            service_id,
            scheduled_at,
            created_at,
        } => {
            rs.insert_appointment(Appointment {
                id: *id,
                client_id: *client_id,
                service_id: *service_id,
                scheduled_at: *scheduled_at,
                status: AppointmentStatus::Pending,
                created_at: *created_at,
            });
            entity_map.insert(*id, *staff_id);
        }
        Event::AppointmentRescheduled { id, scheduled_at, .. } => {
            rs.reschedule_appointment(*id, *scheduled_at);
        }
        Event::AppointmentConfirmed { id, .. } => {
            rs.set_status(*id, AppointmentStatus::Confirmed);
        }
        // The record stays (it no longer occupies time); compaction prunes it.
        Event::AppointmentCancelled { id, .. } => {
            rs.set_status(*id, AppointmentStatus::Cancelled);
        }
        Event::StaffUpdated { name, .. } => {
            rs.name = name.clone();
        }
        // StaffCreated/Deleted and Service* are handled at the engine level
        Event::StaffCreated { .. }
        | Event::StaffDeleted { .. }
        | Event::ServiceRegistered { .. }
        | Event::ServiceUpdated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            services: DashMap::new(),
            wal_tx,
            notify,
            entity_to_staff: DashMap::new(),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because
        // this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::StaffCreated { id, name } => {
                    let rs = StaffState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::StaffDeleted { id } => {
                    engine.state.remove(id);
                }
                Event::ServiceRegistered {
                    id,
                    name,
                    duration_minutes,
                }
                | Event::ServiceUpdated {
                    id,
                    name,
                    duration_minutes,
                } => {
                    engine.services.insert(
                        *id,
                        Service {
                            id: *id,
                            name: name.clone(),
                            duration_minutes: *duration_minutes,
                        },
                    );
                }
                other => {
                    if let Some(staff_id) = event_staff_id(other)
                        && let Some(entry) = engine.state.get(&staff_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_staff(&mut guard, other, &engine.entity_to_staff);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<SharedStaffState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_staff_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_staff.get(entity_id).map(|e| *e.value())
    }

    /// Minutes a service takes, or `NotFound` for an unknown id.
    pub fn service_duration(&self, id: &Ulid) -> Result<u32, EngineError> {
        self.services
            .get(id)
            .map(|s| s.duration_minutes)
            .ok_or(EngineError::NotFound(*id))
    }

    /// Current duration of a service, for computing occupied intervals of
    /// stored appointments. Durations are live, not snapshotted.
    pub(super) fn duration_lookup(&self) -> impl Fn(&Ulid) -> Option<u32> + '_ {
        |id| self.services.get(id).map(|s| s.duration_minutes)
    }

    /// WAL-append + apply + notify in one call: the only commit path for
    /// staff-scoped mutations.
    pub(super) async fn persist_and_apply(
        &self,
        staff_id: Ulid,
        rs: &mut StaffState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_staff(rs, event, &self.entity_to_staff);
        self.notify.send(staff_id, event);
        Ok(())
    }

    /// Lookup entity -> staff, get staff, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<StaffState>), EngineError> {
        let staff_id = self
            .get_staff_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let guard = rs.write_owned().await;
        Ok((staff_id, guard))
    }
}

/// Extract the staff_id from a staff-scoped event.
fn event_staff_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WindowAdded { staff_id, .. }
        | Event::WindowUpdated { staff_id, .. }
        | Event::WindowRemoved { staff_id, .. }
        | Event::AppointmentBooked { staff_id, .. }
        | Event::AppointmentRescheduled { staff_id, .. }
        | Event::AppointmentConfirmed { staff_id, .. }
        | Event::AppointmentCancelled { staff_id, .. } => Some(*staff_id),
        Event::StaffUpdated { id, .. } => Some(*id),
        Event::StaffCreated { .. }
        | Event::StaffDeleted { .. }
        | Event::ServiceRegistered { .. }
        | Event::ServiceUpdated { .. } => None,
    }
}
