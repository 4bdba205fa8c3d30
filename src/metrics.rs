/// Prometheus metrics for the storefront service
use crate::cart::{CartObserver, CartOperation, CartSnapshot};
use crate::error::ErrorCode;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Cart operation ("add_item", "remove_item", "set_quantity", "clear")
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    /// Failure classification ("empty_cart", "validation", "rejected", ...)
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub code: String,
    pub category: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Cart mutations by operation
    pub cart_mutations_total: Family<OperationLabels, Counter>,

    /// Orders acknowledged by the order sink
    pub orders_placed_total: Counter,

    /// Failed checkouts by reason
    pub checkout_failures_total: Family<ReasonLabels, Counter>,

    /// Time spent handing orders to the sink, retries included
    pub checkout_duration_seconds: Histogram,

    /// Sessions with a live cart
    pub sessions_open: Gauge,

    /// Errors returned by the HTTP API
    pub api_errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let cart_mutations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "storefront_cart_mutations",
            "Total number of cart mutations",
            cart_mutations_total.clone(),
        );

        let orders_placed_total = Counter::default();
        registry.register(
            "storefront_orders_placed",
            "Total number of orders accepted by the order sink",
            orders_placed_total.clone(),
        );

        let checkout_failures_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "storefront_checkout_failures",
            "Total number of failed checkouts",
            checkout_failures_total.clone(),
        );

        // Buckets: 5ms .. ~10s
        let checkout_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.5, 9));
        registry.register(
            "storefront_checkout_duration_seconds",
            "Order hand-off latency in seconds",
            checkout_duration_seconds.clone(),
        );

        let sessions_open = Gauge::default();
        registry.register(
            "storefront_sessions_open",
            "Number of sessions with a live cart",
            sessions_open.clone(),
        );

        let api_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "storefront_api_errors",
            "Total number of API errors by code",
            api_errors_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            cart_mutations_total,
            orders_placed_total,
            checkout_failures_total,
            checkout_duration_seconds,
            sessions_open,
            api_errors_total,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(%error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_cart_mutation(&self, operation: CartOperation) {
        self.cart_mutations_total
            .get_or_create(&OperationLabels {
                operation: operation.as_ref().to_string(),
            })
            .inc();
    }

    pub fn record_order_placed(&self, duration: Duration) {
        self.orders_placed_total.inc();
        self.checkout_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_checkout_failure(&self, reason: &str) {
        self.checkout_failures_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn set_sessions_open(&self, count: usize) {
        self.sessions_open.set(count as i64);
    }

    pub fn record_api_error(&self, code: ErrorCode) {
        self.api_errors_total
            .get_or_create(&ErrorLabels {
                code: format!("{:?}", code),
                category: code.category().to_string(),
            })
            .inc();
    }
}

/// Counts cart mutations. Attached as an observer, so only mutations that
/// changed the lines are counted.
impl CartObserver for MetricsCollector {
    fn cart_changed(
        &self,
        operation: CartOperation,
        _snapshot: &CartSnapshot,
    ) -> anyhow::Result<()> {
        self.record_cart_mutation(operation);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
