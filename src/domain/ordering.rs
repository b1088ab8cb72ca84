//! Pure priority arithmetic for the dense ordering of active goods.
//!
//! Priorities of the active goods in one group always form `1..=N`. Moving a
//! good from `from` to `to` shifts only the goods between the two positions,
//! and removing a good closes the gap it leaves. The SQL in the Postgres store
//! expresses the same rules as set-based updates.

/// Clamps a requested priority into `1..=active_count`.
///
/// Asking for a position past the end appends the good without leaving a gap.
#[must_use]
pub fn clamp_target(requested: i32, active_count: usize) -> i32 {
    let upper = i32::try_from(active_count).unwrap_or(i32::MAX).max(1);
    requested.clamp(1, upper)
}

/// Priority of a bystander after a good moves from `from` to `to`.
#[must_use]
pub const fn shifted_priority(current: i32, from: i32, to: i32) -> i32 {
    if to < from && current >= to && current < from {
        current + 1
    } else if to > from && current > from && current <= to {
        current - 1
    } else {
        current
    }
}

/// Priority of an active good after the good at `removed` leaves the ordering.
#[must_use]
pub const fn compacted_priority(current: i32, removed: i32) -> i32 {
    if current > removed {
        current - 1
    } else {
        current
    }
}

/// First position whose occupant may have changed during a move.
#[must_use]
pub fn window_start(from: i32, to: i32) -> i32 {
    from.min(to)
}
