//! Roll trigger evaluation.
//!
//! Time policies fire on calendar boundaries, not elapsed intervals: an
//! "every 3 hours" policy rolls whenever the UTC hour is a multiple of 3,
//! no matter when the process started. Two consecutive rolls can therefore be
//! a single unit apart right after startup.
//!
//! Size policies never fire from the clock. They are checked with
//! [`has_room`] against the store.

use log::debug;
use time::{OffsetDateTime, UtcOffset};

use crate::error::Result;
use crate::policy::{RollUnit, RotationPolicy};
use crate::store::IndexStore;

/// Whether a clock tick at `instant` should be forwarded to the policies.
pub fn is_clock_boundary(instant: OffsetDateTime) -> bool {
    instant.to_offset(UtcOffset::UTC).second() == 0
}

/// Whether a time policy is due at `instant`.
pub fn should_roll(policy: &RotationPolicy, instant: OffsetDateTime) -> bool {
    let t = instant.to_offset(UtcOffset::UTC);
    let k = policy.roll_increment.max(1) as i64;
    let aligned = |field: i64| field % k == 0;

    match policy.roll_unit {
        RollUnit::Bytes => false,
        RollUnit::Minutes => t.second() == 0 && aligned(t.minute() as i64),
        RollUnit::Hours => t.second() == 0 && t.minute() == 0 && aligned(t.hour() as i64),
        unit => {
            let midnight = t.second() == 0 && t.minute() == 0 && t.hour() == 0;
            midnight
                && match unit {
                    RollUnit::Days => aligned(t.ordinal() as i64),
                    RollUnit::Months => aligned(t.month() as u8 as i64),
                    _ => aligned(t.year() as i64),
                }
        }
    }
}

/// Whether a size policy's current partition still has room.
///
/// Returns `false` (roll needed) when the write alias does not exist yet or
/// when its partition has reached the threshold. The size query must resolve
/// to exactly one partition.
pub async fn has_room<S>(policy: &RotationPolicy, store: &S) -> Result<bool>
where
    S: IndexStore + ?Sized,
{
    let target = policy.write_alias();
    if !store.exists(target).await? {
        debug!("{}: write alias {} missing, rolling", policy.id, target);
        return Ok(false);
    }

    let threshold = policy.roll_size_threshold.unwrap_or(u64::MAX);
    let size = store.primary_size(target).await?;
    debug!(
        "{}: primary size {} of {} bytes",
        policy.id, size, threshold
    );
    Ok(size < threshold)
}
