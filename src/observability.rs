use std::net::SocketAddr;

// ── Benchmark metrics ───────────────────────────────────────────

/// Counter: benchmark queries executed. Labels: query.
pub const QUERIES_TOTAL: &str = "availbench_queries_total";

/// Histogram: timed `find` latency in seconds. Labels: query.
pub const QUERY_DURATION_SECONDS: &str = "availbench_query_duration_seconds";

/// Counter: documents accepted by the store. Labels: collection.
pub const DOCUMENTS_INSERTED_TOTAL: &str = "availbench_documents_inserted_total";

/// Counter: documents rejected inside an unordered batch. Labels: collection.
pub const INSERT_FAILURES_TOTAL: &str = "availbench_insert_failures_total";

/// Counter: size statistics replaced by the per-document heuristic. Labels: collection.
pub const STATS_FALLBACKS_TOTAL: &str = "availbench_stats_fallbacks_total";

// ── Embedded store ──────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "availbench_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "availbench_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

