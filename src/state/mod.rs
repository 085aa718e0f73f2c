//! State module for work items and their outcomes
//!
//! # Components
//!
//! - `ItemId` / `WorkItem`: an immutable unit of scrape work and its derived locator
//! - `Schema` / `Record`: the fixed column layout and one extracted row
//! - `Outcome` / `FailureReason`: the result of processing one item

mod outcome;
mod work_item;

// Re-export main types
pub use outcome::{FailureReason, Outcome, Record, Schema};
pub use work_item::{IdKind, ItemId, LocatorTemplate, WorkItem};
