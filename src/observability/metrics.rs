use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_outcomes_total: IntCounterVec,
    pub reassignments_total: IntCounterVec,
    pub orders_failed_total: IntCounter,
    pub collaborator_errors_total: IntCounterVec,
    pub pending_offers: IntGauge,
    pub expiries_in_queue: IntGauge,
    pub candidate_search_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_outcomes_total = IntCounterVec::new(
            Opts::new("dispatch_outcomes_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_outcomes_total metric");

        let reassignments_total = IntCounterVec::new(
            Opts::new("reassignments_total", "Reassignments by trigger"),
            &["trigger"],
        )
        .expect("valid reassignments_total metric");

        let orders_failed_total = IntCounter::new(
            "orders_failed_total",
            "Orders that exhausted their dispatch attempts",
        )
        .expect("valid orders_failed_total metric");

        let collaborator_errors_total = IntCounterVec::new(
            Opts::new(
                "collaborator_errors_total",
                "Failed or timed out collaborator calls",
            ),
            &["collaborator"],
        )
        .expect("valid collaborator_errors_total metric");

        let pending_offers = IntGauge::new("pending_offers", "Offers waiting on a driver answer")
            .expect("valid pending_offers metric");

        let expiries_in_queue = IntGauge::new(
            "expiries_in_queue",
            "Acceptance deadlines waiting for the supervisor",
        )
        .expect("valid expiries_in_queue metric");

        let candidate_search_seconds = Histogram::with_opts(HistogramOpts::new(
            "candidate_search_seconds",
            "Latency of candidate search in seconds",
        ))
        .expect("valid candidate_search_seconds metric");

        registry
            .register(Box::new(dispatch_outcomes_total.clone()))
            .expect("register dispatch_outcomes_total");
        registry
            .register(Box::new(reassignments_total.clone()))
            .expect("register reassignments_total");
        registry
            .register(Box::new(orders_failed_total.clone()))
            .expect("register orders_failed_total");
        registry
            .register(Box::new(collaborator_errors_total.clone()))
            .expect("register collaborator_errors_total");
        registry
            .register(Box::new(pending_offers.clone()))
            .expect("register pending_offers");
        registry
            .register(Box::new(expiries_in_queue.clone()))
            .expect("register expiries_in_queue");
        registry
            .register(Box::new(candidate_search_seconds.clone()))
            .expect("register candidate_search_seconds");

        Self {
            registry,
            dispatch_outcomes_total,
            reassignments_total,
            orders_failed_total,
            collaborator_errors_total,
            pending_offers,
            expiries_in_queue,
            candidate_search_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
