//! Console reporting of run results and ledger statistics

pub mod stats;

pub use stats::{load_statistics, print_run_report, print_statistics, HarvestStatistics};
