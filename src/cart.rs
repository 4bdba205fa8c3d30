//! Per-session shopping cart.
//!
//! A [`CartStore`] is an ordered set of [`CartLine`]s, at most one per
//! product id, kept in the order products were first added. Item count and
//! cart total are recomputed from the lines on every call and never cached.
//!
//! The store is owned by exactly one session and mutated by one actor at a
//! time, so it takes `&mut self` and does no locking of its own. Observers
//! (see [`CartObserver`]) are told about every mutation that changed the
//! lines; their failures are logged and never undo the mutation.

use crate::catalog::{Product, ProductId};
use crate::money::Money;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

/// One (product, quantity) pair. `quantity` is always at least 1 while the
/// line is part of a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: Product,
    pub quantity: u32,
}

impl CartLine {
    pub fn product_id(&self) -> &ProductId {
        &self.product.id
    }

    pub fn line_total(&self) -> Money {
        self.product.price.times(self.quantity)
    }
}

/// The two externally meaningful states of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartState {
    Empty,
    NonEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CartOperation {
    AddItem,
    RemoveItem,
    SetQuantity,
    Clear,
}

/// Serializable copy of a cart's lines, handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn item_count(&self) -> u64 {
        item_count(&self.lines)
    }

    pub fn total(&self) -> Money {
        cart_total(&self.lines)
    }
}

/// Side channel notified after each mutation that changed a cart.
pub trait CartObserver: Send + Sync {
    fn cart_changed(&self, operation: CartOperation, snapshot: &CartSnapshot)
    -> anyhow::Result<()>;
}

/// Sum of quantities over `lines`.
pub fn item_count<'a>(lines: impl IntoIterator<Item = &'a CartLine>) -> u64 {
    lines.into_iter().map(|line| u64::from(line.quantity)).sum()
}

/// Exact sum of price × quantity over `lines`.
pub fn cart_total<'a>(lines: impl IntoIterator<Item = &'a CartLine>) -> Money {
    lines.into_iter().map(CartLine::line_total).sum()
}

#[derive(Default)]
pub struct CartStore {
    lines: IndexMap<ProductId, CartLine>,
    observers: Vec<Arc<dyn CartObserver>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a cart from a snapshot. Duplicate product ids are merged and
    /// zero-quantity lines dropped, so the usual invariants hold for any
    /// input.
    pub fn from_snapshot(snapshot: CartSnapshot) -> Self {
        let mut lines: IndexMap<ProductId, CartLine> = IndexMap::new();
        for line in snapshot.lines.into_iter().filter(|line| line.quantity > 0) {
            match lines.get_mut(line.product_id()) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity);
                }
                None => {
                    lines.insert(line.product.id.clone(), line);
                }
            }
        }
        Self {
            lines,
            observers: Vec::new(),
        }
    }

    pub fn attach(&mut self, observer: Arc<dyn CartObserver>) {
        self.observers.push(observer);
    }

    pub fn with_observer(mut self, observer: Arc<dyn CartObserver>) -> Self {
        self.attach(observer);
        self
    }

    /// Adds one unit of `product`: bumps the existing line or appends a new
    /// one with quantity 1. The stored product record of an existing line is
    /// kept as is.
    pub fn add_item(&mut self, product: Product) {
        let quantity = match self.lines.get_mut(&product.id) {
            Some(line) => {
                line.quantity = line.quantity.saturating_add(1);
                line.quantity
            }
            None => {
                let id = product.id.clone();
                self.lines.insert(id, CartLine {
                    product,
                    quantity: 1,
                });
                1
            }
        };
        debug!(quantity, lines = self.lines.len(), "cart add_item");
        self.notify(CartOperation::AddItem);
    }

    /// Deletes the line for `id`. Unknown ids are ignored.
    pub fn remove_item(&mut self, id: &ProductId) {
        if self.lines.shift_remove(id).is_some() {
            debug!(product_id = %id, lines = self.lines.len(), "cart remove_item");
            self.notify(CartOperation::RemoveItem);
        }
    }

    /// Sets the quantity of an existing line. Zero or negative quantities
    /// remove the line; unknown ids are ignored.
    pub fn set_quantity(&mut self, id: &ProductId, quantity: i64) {
        if quantity <= 0 {
            if self.lines.shift_remove(id).is_some() {
                debug!(product_id = %id, quantity, "cart set_quantity removed line");
                self.notify(CartOperation::SetQuantity);
            }
            return;
        }

        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        let Some(line) = self.lines.get_mut(id) else {
            return;
        };
        if line.quantity == quantity {
            return;
        }
        line.quantity = quantity;
        debug!(product_id = %id, quantity, "cart set_quantity");
        self.notify(CartOperation::SetQuantity);
    }

    /// Removes every line.
    pub fn clear(&mut self) {
        if self.lines.is_empty() {
            return;
        }
        self.lines.clear();
        debug!("cart cleared");
        self.notify(CartOperation::Clear);
    }

    /// Snapshot of the lines in first-added order.
    pub fn items(&self) -> Vec<CartLine> {
        self.lines.values().cloned().collect()
    }

    pub fn lines(&self) -> impl ExactSizeIterator<Item = &CartLine> {
        self.lines.values()
    }

    pub fn get(&self, id: &ProductId) -> Option<&CartLine> {
        self.lines.get(id)
    }

    pub fn item_count(&self) -> u64 {
        item_count(self.lines.values())
    }

    pub fn cart_total(&self) -> Money {
        cart_total(self.lines.values())
    }

    pub fn state(&self) -> CartState {
        if self.lines.is_empty() {
            CartState::Empty
        } else {
            CartState::NonEmpty
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            lines: self.items(),
        }
    }

    fn notify(&self, operation: CartOperation) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in &self.observers {
            if let Err(error) = observer.cart_changed(operation, &snapshot) {
                warn!(%operation, error = %error, "cart observer failed");
            }
        }
    }
}

impl fmt::Debug for CartStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartStore")
            .field("lines", &self.lines.values().collect::<Vec<_>>())
            .field("observers", &self.observers.len())
            .finish()
    }
}
