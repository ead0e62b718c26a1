//! Operation metrics for the graph database.

use std::time::Instant;

/// Records a counter and a latency histogram for one storage operation.
///
/// - `graph_operations_total{operation, status}`
/// - `graph_operation_duration_ms{operation, status}`
pub fn record_operation_metrics(operation: &'static str, start: Instant, success: bool) {
    let status = if success { "success" } else { "error" };
    metrics::counter!(
        "graph_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "graph_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation_metrics_without_recorder() {
        // No recorder is installed; recording must be a no-op.
        record_operation_metrics("get_entity", Instant::now(), true);
        record_operation_metrics("get_entity", Instant::now(), false);
    }
}
