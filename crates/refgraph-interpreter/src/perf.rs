//! Per-node performance counters.
//!
//! Counters are only updated while enabled on the executable. Each node
//! keeps running totals, so memory stays constant across calls; a
//! [`PerformanceReport`] aggregates them by operator type.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Accumulated timing of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceCounter {
    /// Node name
    pub node: String,
    /// Versioned operator type, e.g. `v1::Add`
    pub op_type: String,
    /// Total time spent in the node's handler
    pub total_microseconds: u64,
    /// Number of executions
    pub call_count: u64,
}

impl PerformanceCounter {
    /// Average time per call.
    pub fn average_microseconds(&self) -> u64 {
        if self.call_count > 0 {
            self.total_microseconds / self.call_count
        } else {
            0
        }
    }
}

/// Running statistics for one node.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NodeTimer {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    sum_sq_us: f64,
}

impl NodeTimer {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.min_us = if self.count == 0 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.count += 1;
        self.total_us += us;
        self.sum_sq_us += (us as f64) * (us as f64);
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn total_us(&self) -> u64 {
        self.total_us
    }

    fn merge(&mut self, other: &NodeTimer) {
        if other.count == 0 {
            return;
        }
        self.min_us = if self.count == 0 {
            other.min_us
        } else {
            self.min_us.min(other.min_us)
        };
        self.max_us = self.max_us.max(other.max_us);
        self.count += other.count;
        self.total_us += other.total_us;
        self.sum_sq_us += other.sum_sq_us;
    }
}

/// Statistics for one operator type
#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    /// Number of nodes of this type that ran
    pub node_count: usize,
    /// Number of calls
    pub count: u64,
    /// Total time
    pub total_us: u64,
    /// Average time
    pub avg_us: u64,
    /// Minimum time
    pub min_us: u64,
    /// Maximum time
    pub max_us: u64,
    /// Standard deviation
    pub std_dev_us: f64,
    /// Percentage of total time
    pub percentage: f64,
}

/// Counters aggregated by operator type.
#[derive(Debug, Clone)]
pub struct PerformanceReport {
    /// Time spent in all handlers
    pub total_duration: Duration,
    /// Statistics per versioned operator type
    pub by_op_type: HashMap<String, OperationStats>,
    /// Per-node counters the report was built from
    pub counters: Vec<PerformanceCounter>,
}

impl PerformanceReport {
    pub(crate) fn from_timers<'a>(
        timers: impl IntoIterator<Item = (&'a str, &'a str, &'a NodeTimer)>,
    ) -> Self {
        let mut grouped: HashMap<String, (usize, NodeTimer)> = HashMap::new();
        let mut counters = Vec::new();
        for (node, op_type, timer) in timers {
            if timer.count() == 0 {
                continue;
            }
            let entry = grouped.entry(op_type.to_string()).or_default();
            entry.0 += 1;
            entry.1.merge(timer);
            counters.push(PerformanceCounter {
                node: node.to_string(),
                op_type: op_type.to_string(),
                total_microseconds: timer.total_us(),
                call_count: timer.count(),
            });
        }

        let total_us: u64 = grouped.values().map(|(_, t)| t.total_us).sum();
        let by_op_type = grouped
            .into_iter()
            .map(|(op_type, (node_count, t))| {
                let avg = if t.count > 0 { t.total_us / t.count } else { 0 };

                // Sample variance from the running sums
                let variance = if t.count > 1 {
                    let n = t.count as f64;
                    let mean = t.total_us as f64 / n;
                    ((t.sum_sq_us - n * mean * mean) / (n - 1.0)).max(0.0)
                } else {
                    0.0
                };
                let percentage = if total_us > 0 {
                    (t.total_us as f64 / total_us as f64) * 100.0
                } else {
                    0.0
                };

                (
                    op_type,
                    OperationStats {
                        node_count,
                        count: t.count,
                        total_us: t.total_us,
                        avg_us: avg,
                        min_us: t.min_us,
                        max_us: t.max_us,
                        std_dev_us: variance.sqrt(),
                        percentage,
                    },
                )
            })
            .collect();

        Self {
            total_duration: Duration::from_micros(total_us),
            by_op_type,
            counters,
        }
    }

    /// Export report as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total_duration_ms": self.total_duration.as_secs_f64() * 1000.0,
            "by_op_type": self.by_op_type,
            "by_node": self.counters,
            "node_count": self.counters.len(),
        })
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Performance Report ===")?;
        writeln!(
            f,
            "Total Duration: {:.2}ms",
            self.total_duration.as_secs_f64() * 1000.0
        )?;
        let mut ops: Vec<_> = self.by_op_type.iter().collect();
        ops.sort_by(|a, b| b.1.total_us.cmp(&a.1.total_us));
        for (op_type, stats) in ops {
            writeln!(
                f,
                "  {}: {:.2}ms ({:.1}%) - {} calls, avg {}µs ± {:.2}µs",
                op_type,
                stats.total_us as f64 / 1000.0,
                stats.percentage,
                stats.count,
                stats.avg_us,
                stats.std_dev_us
            )?;
        }
        Ok(())
    }
}
