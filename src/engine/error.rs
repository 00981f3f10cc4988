use ulid::Ulid;

use crate::model::{AppointmentStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested span overlaps a live appointment.
    Conflict(Ulid),
    /// No availability window contains the requested span.
    OutsideAvailability(Span),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::OutsideAvailability(span) => {
                write!(
                    f,
                    "no availability window covers [{}, {})",
                    span.start, span.end
                )
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "appointment cannot go from {from} to {to}")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
