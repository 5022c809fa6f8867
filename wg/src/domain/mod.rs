//! Domain types shared by the scheduler and its callers

mod priority;

pub use priority::{ParsePriorityError, Priority};
