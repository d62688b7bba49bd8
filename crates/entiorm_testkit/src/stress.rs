//! Stress tests for EntiORM.
//!
//! These run many units of work against one shared database, each on its
//! own thread with its own store.

use crate::fixtures::shop_registry;
use entiorm_core::{Config, CoreResult, SchemaRegistry, Store};
use entiorm_storage::Database;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Commits attempted.
    pub total_commits: usize,
    /// Commits that succeeded.
    pub successful_commits: usize,
    /// Commits that failed.
    pub failed_commits: usize,
    /// Entities inserted by successful commits.
    pub inserted: usize,
    /// Total duration.
    pub duration: Duration,
    /// Commits per second.
    pub commits_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(successful: usize, failed: usize, inserted: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_commits: total,
            successful_commits: successful,
            failed_commits: failed,
            inserted,
            duration,
            commits_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_commits,
            successful = self.successful_commits,
            failed = self.failed_commits,
            inserted = self.inserted,
            duration_ms = self.duration.as_millis() as u64,
            throughput = self.commits_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads, one store each.
    pub threads: usize,
    /// Commits per thread.
    pub commits_per_thread: usize,
    /// Orders created per commit, each with its own new customer.
    pub orders_per_commit: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            commits_per_thread: 25,
            orders_per_commit: 4,
        }
    }
}

/// Commits one customer with `orders` orders through `store`.
fn commit_order_graph(store: &Store, round: usize, orders: usize) -> CoreResult<usize> {
    let customer = store.create("Customer")?;
    customer.set("name", format!("customer {round}"))?;
    for _ in 0..orders {
        let order = store.create("Order")?;
        order.set_reference("customer", Some(&customer))?;
        order.list("tags")?.push("stress")?;
    }
    Ok(store.commit()?.inserted)
}

/// Runs commits from one store sequentially.
pub fn stress_sequential_commits(db: Arc<dyn Database>, config: &StressConfig) -> StressTestResult {
    let store = Store::with_database(shop_registry(), db, Config::default());
    let start = Instant::now();
    let (mut successful, mut failed, mut inserted) = (0, 0, 0);
    for round in 0..config.commits_per_thread * config.threads {
        match commit_order_graph(&store, round, config.orders_per_commit) {
            Ok(count) => {
                successful += 1;
                inserted += count;
            }
            Err(_) => failed += 1,
        }
    }
    StressTestResult::new(successful, failed, inserted, start.elapsed())
}

/// Runs commits from several threads, each with its own forked store.
pub fn stress_concurrent_commits(db: Arc<dyn Database>, config: &StressConfig) -> StressTestResult {
    let registry: Arc<SchemaRegistry> = Arc::new(shop_registry());
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let inserted = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let registry = Arc::clone(&registry);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let inserted = Arc::clone(&inserted);
            let config = config.clone();

            thread::spawn(move || {
                let store = Store::with_database(registry, db, Config::default());
                for i in 0..config.commits_per_thread {
                    let round = t * config.commits_per_thread + i;
                    match commit_order_graph(&store, round, config.orders_per_commit) {
                        Ok(count) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                            inserted.fetch_add(count, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        inserted.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use entiorm_storage::InMemoryDatabase;

    fn small() -> StressConfig {
        StressConfig {
            threads: 3,
            commits_per_thread: 5,
            orders_per_commit: 3,
        }
    }

    #[test]
    fn test_sequential_commits() {
        let db = Arc::new(InMemoryDatabase::new());
        let result = stress_sequential_commits(db.clone(), &small());
        assert_eq!(result.failed_commits, 0);
        assert_eq!(result.inserted, 15 * 4);
        assert_eq!(db.len("orders"), 45);
    }

    #[test]
    fn test_concurrent_commits() {
        let db = Arc::new(InMemoryDatabase::new());
        let result = stress_concurrent_commits(db.clone(), &small());
        result.log_summary("concurrent");
        assert_eq!(result.successful_commits, 15);
        assert_eq!(db.len("customers"), 15);
        assert_eq!(db.len("orders"), 45);
        assert_eq!(db.commit_count(), 15);
    }
}
