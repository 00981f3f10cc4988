//! Hard caps on stored state and query shapes. Exceeding any of these is a
//! caller error (`EngineError::LimitExceeded`), not a capacity to grow into.

/// Max engines (= open WAL files) one process will host.
pub const MAX_TENANTS: usize = 256;

/// Max tenant name length before sanitization.
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Max staff members per tenant.
pub const MAX_STAFF_PER_TENANT: usize = 10_000;

/// Max services per tenant.
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;

/// Max availability windows on one staff member.
pub const MAX_WINDOWS_PER_STAFF: usize = 1_000;

/// Max stored appointments on one staff member, cancelled included
/// (compaction prunes cancelled records).
pub const MAX_APPOINTMENTS_PER_STAFF: usize = 100_000;

/// Max staff/service name length in bytes.
pub const MAX_NAME_LEN: usize = 512;

/// Widest slot-enumeration range, in calendar days. Bounds the occupied
/// intervals held in memory for one query.
pub const MAX_SLOT_QUERY_DAYS: i64 = 92;

/// A single service may not run longer than a day.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 24 * 60;

/// Accepted year range for any scheduled timestamp or window date.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;
