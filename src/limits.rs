//! Hard input limits. Anything past these is rejected before any write.

pub const MAX_DURATION_MINUTES: u32 = 12 * 60;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_CONSULTANT_ID_LEN: usize = 64;
pub const MAX_UNAVAILABLE_SLOTS: usize = 1_000;

pub const MAX_BUSINESS_NAME_LEN: usize = 64;
pub const MAX_BUSINESSES: usize = 256;
pub const MAX_PREFIX_LEN: usize = 16;

/// Tries of the counter transaction before `issue` gives up.
pub const COUNTER_TX_ATTEMPTS: u32 = 5;
