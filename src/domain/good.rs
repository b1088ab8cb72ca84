//! Good domain model.
//!
//! A `Good` is the single mutable resource managed by this crate. Its
//! identity and creation timestamp are assigned by the relational store;
//! everything else is mutated in place. Goods are never physically deleted,
//! only flagged `removed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Value Objects - Newtypes
// =============================================================================

/// Store-assigned identifier of a good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoodId(i64);

impl GoodId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GoodId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Logical partition of goods (a project). Priorities are ordered per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Largest page a single `list` call may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Caller input that violates a precondition. Raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("priority must be at least 1, got {0}")]
    NonPositivePriority(i32),

    #[error("limit must be between 1 and {max}, got {0}", max = MAX_PAGE_SIZE)]
    InvalidLimit(u32),
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

/// Validates a requested target priority.
///
/// # Errors
///
/// Returns `ValidationError::NonPositivePriority` when `priority < 1`.
pub const fn validate_priority(priority: i32) -> Result<i32, ValidationError> {
    if priority < 1 {
        return Err(ValidationError::NonPositivePriority(priority));
    }
    Ok(priority)
}

// =============================================================================
// Good
// =============================================================================

/// A good as persisted by the relational store.
///
/// This is also the JSON payload of change events and the cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Good {
    pub id: GoodId,
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Dense rank among active goods of the same group, starting at 1.
    pub priority: i32,
    pub removed: bool,
    pub created_at: DateTime<Utc>,
}

impl Good {
    /// Returns `true` when the good takes part in priority ordering.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.removed
    }
}

/// Input for creating a good. Id, priority and timestamp are store-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGood {
    pub group_id: GroupId,
    pub name: String,
    pub description: Option<String>,
}

impl NewGood {
    #[must_use]
    pub fn new(group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            name: name.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// # Errors
    ///
    /// Returns `ValidationError::EmptyName` when the name is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)
    }
}

/// In-place update of a good's descriptive fields.
///
/// `group_id` scopes the update: a good owned by another group is reported
/// as not found. A `None` description keeps the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodChanges {
    pub id: GoodId,
    pub group_id: GroupId,
    pub name: String,
    pub description: Option<String>,
}

impl GoodChanges {
    #[must_use]
    pub fn new(id: GoodId, group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// # Errors
    ///
    /// Returns `ValidationError::EmptyName` when the name is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Limit/offset window for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    limit: u32,
    offset: u64,
}

impl Pagination {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidLimit` unless `1 <= limit <= MAX_PAGE_SIZE`.
    pub const fn new(limit: u32, offset: u64) -> Result<Self, ValidationError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidLimit(limit));
        }
        Ok(Self { limit, offset })
    }

    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

// =============================================================================
// Reordering results
// =============================================================================

/// New priority of a good touched by a reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityChange {
    pub id: GoodId,
    pub priority: i32,
}

impl PriorityChange {
    #[must_use]
    pub const fn new(id: GoodId, priority: i32) -> Self {
        Self { id, priority }
    }
}

/// Outcome of moving a good to a new priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reordering {
    /// The moved good.
    pub id: GoodId,
    /// The priority it ended up with (requested value clamped to the group size).
    pub priority: i32,
    /// Every other active good of the group at or after the lowest touched
    /// position, with its final priority, ordered by priority.
    pub shifted: Vec<PriorityChange>,
}

/// Outcome of a soft delete: the removed good and the goods compacted above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub good: Good,
    pub shifted: Vec<PriorityChange>,
}
