//! Work queues shared between the coordinator and its workers
//!
//! The same [`WorkQueue`] type serves both the initial queue and the retry
//! queue. Completion is tracked per item: a queue is drained once every item
//! pushed so far has been popped and acknowledged.

mod work_queue;

pub use work_queue::{Lease, WorkQueue};
