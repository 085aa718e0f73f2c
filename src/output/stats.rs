//! Statistics read back from the ledger
//!
//! This module provides functionality for extracting and displaying run
//! statistics from the success and failure stores.

use crate::crawler::RunReport;
use crate::ledger::{Ledger, LedgerStats};
use crate::HarvestError;

/// Ledger statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestStatistics {
    /// Distinct ids in each store
    pub ledger: LedgerStats,

    /// Unresolved ids, in failure store order
    pub unresolved: Vec<String>,
}

impl HarvestStatistics {
    /// Ids known to the ledger, counting each id once
    pub fn attempted(&self) -> usize {
        self.ledger.succeeded + self.ledger.failed - self.ledger.double_booked
    }

    /// Share of attempted ids with a saved record, in percent
    pub fn success_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            return 0.0;
        }
        self.ledger.succeeded as f64 / attempted as f64 * 100.0
    }
}

/// Loads statistics from the ledger
///
/// # Arguments
///
/// * `ledger` - The ledger to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - A store could not be read
pub async fn load_statistics(ledger: &dyn Ledger) -> Result<HarvestStatistics, HarvestError> {
    let ledger_stats = ledger.stats().await?;
    let unresolved = ledger
        .load_failures()
        .await?
        .into_iter()
        .map(|id| id.to_string())
        .collect();

    Ok(HarvestStatistics {
        ledger: ledger_stats,
        unresolved,
    })
}

/// Maximum number of unresolved ids listed by [`print_statistics`]
const UNRESOLVED_SHOWN: usize = 20;

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Ids attempted: {}", stats.attempted());
    println!("  Records saved: {}", stats.ledger.succeeded);
    println!("  Unresolved failures: {}", stats.ledger.failed);
    if stats.ledger.double_booked > 0 {
        println!(
            "  In both stores: {} (removed on the next run)",
            stats.ledger.double_booked
        );
    }
    println!();

    if !stats.unresolved.is_empty() {
        println!("Unresolved Ids ({}):", stats.unresolved.len());
        for id in stats.unresolved.iter().take(UNRESOLVED_SHOWN) {
            println!("  - {}", id);
        }
        if stats.unresolved.len() > UNRESOLVED_SHOWN {
            println!("  ... and {} more", stats.unresolved.len() - UNRESOLVED_SHOWN);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} ids)",
        stats.success_rate(),
        stats.ledger.succeeded,
        stats.attempted()
    );
}

/// Prints the summary of a finished run
pub fn print_run_report(report: &RunReport) {
    println!("=== Run Summary ===\n");
    println!("  Started: {}", report.started_at.to_rfc3339());
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!();

    println!("Queued:");
    println!("  New ids: {}", report.seeded);
    println!("  Skipped (already attempted): {}", report.already_attempted);
    println!("  Earlier failures retried: {}", report.preloaded);
    if report.reconciled > 0 {
        println!("  Stale failure rows removed: {}", report.reconciled);
    }
    println!();

    println!("Phases:");
    println!("  Initial: {}", report.initial_phase);
    println!("  Retry: {}", report.retry_phase);
    println!();

    println!("Ledger:");
    println!("  Records saved: {}", report.ledger.succeeded);
    println!("  Unresolved failures: {}", report.ledger.failed);
}
