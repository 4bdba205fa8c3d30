//! Order records, the checkout form, and the order sink that durably
//! records finalized orders.

use crate::catalog::{ProductId, min_chars};
use crate::cart::CartLine;
use crate::error::{ValidationError, ValidationErrors};
use crate::money::Money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

// ============================================================================
// Identity and contact data
// ============================================================================

/// What the identity provider knows about the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Contact and shipping fields entered at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutForm {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    /// Reference of the payment the customer made out of band
    #[serde(default)]
    pub transaction_id: String,
}

impl CheckoutForm {
    /// Empty form with name and email taken from the signed-in user.
    pub fn prefilled(identity: &Identity) -> Self {
        Self {
            customer_name: identity.display_name.clone().unwrap_or_default(),
            email: identity.email.clone().unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Fills blank name/email fields from `identity`, keeping typed values.
    pub fn with_identity(mut self, identity: &Identity) -> Self {
        if self.customer_name.trim().is_empty() {
            if let Some(name) = &identity.display_name {
                self.customer_name = name.clone();
            }
        }
        if self.email.trim().is_empty() {
            if let Some(email) = &identity.email {
                self.email = email.clone();
            }
        }
        self
    }

    /// Validates every field and returns the normalized contact data.
    pub fn validate(&self) -> Result<ValidatedCheckout, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(min_chars("customer_name", &self.customer_name, 2));
        errors.check(validate_email(&self.email));
        errors.check(min_chars("phone", &self.phone, 10));
        errors.check(min_chars("address", &self.address, 10));
        errors.check(min_chars("transaction_id", &self.transaction_id, 4));
        errors.into_result()?;

        Ok(ValidatedCheckout {
            contact: ContactInfo {
                name: self.customer_name.trim().to_string(),
                email: self.email.trim().to_string(),
                phone: self.phone.trim().to_string(),
            },
            shipping_address: self.address.trim().to_string(),
            transaction_id: self.transaction_id.trim().to_string(),
        })
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Empty("email"));
    }
    if !EMAIL.is_match(email) {
        return Err(ValidationError::Invalid {
            field: "email",
            reason: "not a valid email address",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCheckout {
    pub contact: ContactInfo,
    pub shipping_address: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

// ============================================================================
// Order record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn generate() -> Self {
        Self(format!("ord_{}", Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::Empty("order_id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OrderStatus {
    #[default]
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Processing → Shipped → Delivered, and Processing/Shipped → Cancelled.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Processing, Shipped)
                | (Shipped, Delivered)
                | (Processing, Cancelled)
                | (Shipped, Cancelled)
        )
    }
}

/// One purchased product, priced as it was when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl From<&CartLine> for OrderLine {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product.id.clone(),
            product_name: line.product.name.clone(),
            quantity: line.quantity,
            unit_price: line.product.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub contact: ContactInfo,
    pub shipping_address: String,
    pub transaction_id: String,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl OrderRecord {
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }
}

// ============================================================================
// Order sink
// ============================================================================

/// Acknowledgement returned by a sink that accepted an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink refused the order; retrying will not help.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// The sink could not be reached or is temporarily unable to accept.
    #[error("order sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

/// Accepts finalized orders for durable storage.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn submit(&self, order: &OrderRecord) -> Result<OrderReceipt, SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusChangeError {
    #[error("order '{0}' not found")]
    NotFound(OrderId),
    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

/// Order book kept in memory, newest last. Backs the admin order views.
#[derive(Debug, Default)]
pub struct InMemoryOrderSink {
    orders: RwLock<IndexMap<OrderId, OrderRecord>>,
}

impl InMemoryOrderSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<OrderRecord> {
        self.orders.read().values().cloned().collect()
    }

    pub fn get(&self, id: &OrderId) -> Option<OrderRecord> {
        self.orders.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    pub fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<OrderRecord, StatusChangeError> {
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(id)
            .ok_or_else(|| StatusChangeError::NotFound(id.clone()))?;
        if !order.status.can_transition_to(status) {
            return Err(StatusChangeError::InvalidTransition {
                from: order.status,
                to: status,
            });
        }
        info!(order_id = %id, from = %order.status, to = %status, "order status changed");
        order.status = status;
        Ok(order.clone())
    }
}

#[async_trait]
impl OrderSink for InMemoryOrderSink {
    async fn submit(&self, order: &OrderRecord) -> Result<OrderReceipt, SinkError> {
        let mut orders = self.orders.write();
        match orders.get(&order.id) {
            // resubmission after a lost acknowledgement
            Some(existing) if existing == order => {}
            Some(_) => {
                return Err(SinkError::Rejected(format!(
                    "order '{}' already recorded",
                    order.id
                )));
            }
            None => {
                orders.insert(order.id.clone(), order.clone());
            }
        }
        Ok(OrderReceipt {
            order_id: order.id.clone(),
            accepted_at: Utc::now(),
        })
    }
}
