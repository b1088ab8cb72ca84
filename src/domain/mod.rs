//! Domain models for the goods catalogue.

pub mod good;
pub mod ordering;

pub use good::{
    Good, GoodChanges, GoodId, GroupId, MAX_PAGE_SIZE, NewGood, Pagination, PriorityChange,
    Removal, Reordering, ValidationError, validate_priority,
};
