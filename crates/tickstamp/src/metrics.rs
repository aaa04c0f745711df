//! Prometheus metrics for acquisition controllers
//!
//! Collectors are process-wide and labelled by controller name.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::diagnostics::TransitionReason;
use crate::refresher::Strategy;

const LABEL_NAME: &str = "name";
const LABEL_REASON: &str = "reason";
const LABEL_STRATEGY: &str = "strategy";

/// State transitions by reason
static TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstamp_transitions_total",
        "Controller state transitions by reason",
        &[LABEL_NAME, LABEL_REASON]
    )
    .expect("Failed to register transitions_total metric")
});

/// Worker-to-cooperative fallbacks
static FALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickstamp_fallbacks_total",
        "Times a worker refresher was replaced by the cooperative strategy",
        &[LABEL_NAME]
    )
    .expect("Failed to register fallbacks_total metric")
});

/// Active refresher per strategy (1 = active, 0 = inactive)
static PROMOTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickstamp_promoted",
        "Whether the controller is promoted on a strategy (1=active, 0=inactive)",
        &[LABEL_NAME, LABEL_STRATEGY]
    )
    .expect("Failed to register promoted metric")
});

/// Handle for recording metrics for one controller
#[derive(Clone)]
pub struct ControllerMetrics {
    name: String,
}

impl ControllerMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn inc_transition(&self, reason: TransitionReason) {
        TRANSITIONS_TOTAL
            .with_label_values(&[self.name.as_str(), reason.as_str()])
            .inc();
    }

    pub fn inc_fallback(&self) {
        FALLBACKS_TOTAL.with_label_values(&[self.name.as_str()]).inc();
    }

    /// Mark `active` (if any) as the only promoted strategy
    pub fn set_promoted(&self, active: Option<Strategy>) {
        for strategy in [Strategy::CooperativeLoop, Strategy::WorkerThread] {
            PROMOTED
                .with_label_values(&[self.name.as_str(), strategy.as_str()])
                .set(i64::from(active == Some(strategy)));
        }
    }

    pub fn transitions(&self, reason: TransitionReason) -> u64 {
        TRANSITIONS_TOTAL
            .with_label_values(&[self.name.as_str(), reason.as_str()])
            .get()
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
