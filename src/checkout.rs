//! Turning a cart into a placed order.
//!
//! The flow reads the cart once, packages its lines and total with the
//! customer's contact fields into an [`OrderRecord`], and hands that record
//! to the [`OrderSink`]. The cart is cleared only after the sink
//! acknowledged the order; on any failure it is left exactly as it was so
//! the customer can retry without re-adding items.

use crate::cart::CartStore;
use crate::error::ValidationErrors;
use crate::metrics::METRICS;
use crate::order::{
    CheckoutForm, OrderId, OrderLine, OrderReceipt, OrderRecord, OrderSink, OrderStatus,
    SinkError,
};
use crate::retry::{ExponentialBackoff, RetryConfig, retry_async_with_policy};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutConfig {
    /// Upper bound for a single hand-off attempt
    pub submit_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandOffError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("order sink did not answer within {0:?}")]
    Timeout(Duration),
}

impl HandOffError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HandOffError::Sink(error) => error.is_retryable(),
            HandOffError::Timeout(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("cannot check out an empty cart")]
    EmptyCart,
    #[error("invalid checkout details: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("order hand-off failed: {0}")]
    HandOff(#[from] HandOffError),
}

impl CheckoutError {
    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::Validation(_) => "validation",
            CheckoutError::HandOff(HandOffError::Sink(SinkError::Rejected(_))) => "rejected",
            CheckoutError::HandOff(HandOffError::Sink(SinkError::Unavailable(_))) => "unavailable",
            CheckoutError::HandOff(HandOffError::Timeout(_)) => "timeout",
        }
    }
}

/// A placed order together with the sink's acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order: OrderRecord,
    pub receipt: OrderReceipt,
}

#[derive(Clone)]
pub struct Checkout {
    sink: Arc<dyn OrderSink>,
    config: CheckoutConfig,
}

impl Checkout {
    pub fn new(sink: Arc<dyn OrderSink>, config: CheckoutConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Builds the order record from the cart's current lines and total.
    pub fn prepare(
        &self,
        cart: &CartStore,
        form: &CheckoutForm,
    ) -> Result<OrderRecord, CheckoutError> {
        if cart.is_empty() {
            return Err(self.fail(CheckoutError::EmptyCart));
        }
        let checked = form.validate().map_err(|e| self.fail(e.into()))?;

        let lines = cart.lines().map(OrderLine::from).collect::<Vec<_>>();
        let total = cart.cart_total();

        Ok(OrderRecord {
            id: OrderId::generate(),
            contact: checked.contact,
            shipping_address: checked.shipping_address,
            transaction_id: checked.transaction_id,
            lines,
            total,
            placed_at: Utc::now(),
            status: OrderStatus::Processing,
        })
    }

    /// Hands `order` to the sink, retrying transient failures.
    pub async fn submit(&self, order: &OrderRecord) -> Result<OrderReceipt, CheckoutError> {
        let started = Instant::now();
        let timeout = self.config.submit_timeout;
        let policy = ExponentialBackoff::new(self.config.retry.clone(), HandOffError::is_retryable);

        let result = retry_async_with_policy(
            |_| async move {
                match tokio::time::timeout(timeout, self.sink.submit(order)).await {
                    Ok(result) => result.map_err(HandOffError::from),
                    Err(_) => Err(HandOffError::Timeout(timeout)),
                }
            },
            &policy,
            "order_hand_off",
        )
        .await;

        match result {
            Ok(receipt) => {
                METRICS.record_order_placed(started.elapsed());
                info!(
                    order_id = %order.id,
                    total = %order.total,
                    items = order.item_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "order placed"
                );
                Ok(receipt)
            }
            Err(error) => {
                warn!(order_id = %order.id, error = %error, "order hand-off failed");
                Err(self.fail(error.into()))
            }
        }
    }

    /// Prepares and submits an order, then clears the cart once the sink
    /// acknowledged it. The cart is untouched on every error path.
    pub async fn place_order(
        &self,
        cart: &mut CartStore,
        form: &CheckoutForm,
    ) -> Result<PlacedOrder, CheckoutError> {
        let order = self.prepare(cart, form)?;
        let receipt = self.submit(&order).await?;
        cart.clear();
        Ok(PlacedOrder { order, receipt })
    }

    fn fail(&self, error: CheckoutError) -> CheckoutError {
        METRICS.record_checkout_failure(error.reason());
        error
    }
}
