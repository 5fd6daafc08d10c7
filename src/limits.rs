use crate::model::{Ms, DAY_MS, MINUTE_MS};

/// Fixed lifetime of a hold.
pub const HOLD_TTL_MS: Ms = 15 * MINUTE_MS;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 64;
pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;
pub const MAX_INTERVALS_PER_RESOURCE: usize = 200_000;
pub const MAX_RULES_PER_RESOURCE: usize = 512;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_IDENTITY_LEN: usize = 256;

/// Availability queries wider than this are rejected.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;

/// 2000-01-01T00:00:00Z .. 2200-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
