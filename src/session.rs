//! One cart per session.
//!
//! Each session owns its own [`CartStore`]; nothing is shared between
//! sessions. The registry only hands out the per-session store and, when a
//! mirror directory is configured, wires up and restores the on-disk mirror.

use crate::cart::{CartSnapshot, CartStore};
use crate::error::ValidationError;
use crate::metrics::METRICS;
use crate::mirror::FileMirror;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::Invalid {
                field: "session_id",
                reason: "not a UUID",
            })
    }
}

/// A session's cart. The async mutex lets checkout hold the cart across the
/// order hand-off, so concurrent requests on one session queue behind it.
pub type SharedCart = Arc<Mutex<CartStore>>;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    carts: RwLock<HashMap<SessionId, SharedCart>>,
    mirror_dir: Option<PathBuf>,
}

impl SessionRegistry {
    pub fn new(mirror_dir: Option<PathBuf>) -> Self {
        Self {
            carts: RwLock::new(HashMap::new()),
            mirror_dir,
        }
    }

    /// Starts a session with an empty cart. With a mirror directory the
    /// empty cart is mirrored right away, so the session survives a restart
    /// even if it is never changed.
    pub fn open(&self) -> SessionId {
        let id = SessionId::generate();
        if let Some(mirror) = self.mirror_for(&id) {
            if let Err(error) = mirror.write(&CartSnapshot::default()) {
                warn!(session = %id, error = %error, "failed to mirror new cart");
            }
        }
        let cart = self.attach_observers(&id, CartStore::new());
        self.insert(id, cart);
        info!(session = %id, "session opened");
        id
    }

    /// Cart of a live session, falling back to [`Self::open_existing`].
    pub fn get(&self, id: &SessionId) -> Option<SharedCart> {
        if let Some(cart) = self.carts.read().get(id) {
            return Some(cart.clone());
        }
        self.open_existing(id)
    }

    /// Restores a session unknown to this process from its mirror file.
    /// `None` without a mirror directory or when nothing was mirrored.
    pub fn open_existing(&self, id: &SessionId) -> Option<SharedCart> {
        let restored = self.restore(id)?;

        // another request may have restored it concurrently
        let mut carts = self.carts.write();
        let cart = carts
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(restored)))
            .clone();
        METRICS.set_sessions_open(carts.len());
        Some(cart)
    }

    /// Ends a session and discards its cart. Returns `false` for unknown ids.
    pub fn end(&self, id: &SessionId) -> bool {
        let removed = {
            let mut carts = self.carts.write();
            let removed = carts.remove(id).is_some();
            METRICS.set_sessions_open(carts.len());
            removed
        };

        let mut mirrored = false;
        if let Some(mirror) = self.mirror_for(id) {
            mirrored = mirror.path().exists();
            if let Err(error) = mirror.discard() {
                warn!(session = %id, error = %error, "failed to discard cart mirror");
            }
        }

        if removed || mirrored {
            info!(session = %id, "session ended");
        }
        removed || mirrored
    }

    /// Rewrites every live cart's mirror. Returns how many were written.
    pub async fn flush_mirrors(&self) -> anyhow::Result<usize> {
        let Some(dir) = self.mirror_dir.as_deref() else {
            return Ok(0);
        };
        let carts: Vec<(SessionId, SharedCart)> = self
            .carts
            .read()
            .iter()
            .map(|(id, cart)| (*id, cart.clone()))
            .collect();

        let mut failures = 0usize;
        for (id, cart) in &carts {
            let snapshot = cart.lock().await.snapshot();
            if let Err(error) = FileMirror::for_session(dir, id).write(&snapshot) {
                warn!(session = %id, error = %error, "failed to flush cart mirror");
                failures += 1;
            }
        }
        anyhow::ensure!(
            failures == 0,
            "{failures} of {} cart mirrors could not be written",
            carts.len()
        );
        Ok(carts.len())
    }

    pub fn len(&self) -> usize {
        self.carts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.read().is_empty()
    }

    fn insert(&self, id: SessionId, cart: CartStore) {
        let mut carts = self.carts.write();
        carts.insert(id, Arc::new(Mutex::new(cart)));
        METRICS.set_sessions_open(carts.len());
    }

    fn mirror_for(&self, id: &SessionId) -> Option<FileMirror> {
        self.mirror_dir
            .as_deref()
            .map(|dir| FileMirror::for_session(dir, id))
    }

    fn attach_observers(&self, id: &SessionId, cart: CartStore) -> CartStore {
        let cart = cart.with_observer(METRICS.clone());
        match self.mirror_for(id) {
            Some(mirror) => cart.with_observer(Arc::new(mirror)),
            None => cart,
        }
    }

    fn restore(&self, id: &SessionId) -> Option<CartStore> {
        let mirror = self.mirror_for(id)?;
        let cart = match mirror.load() {
            Ok(Some(snapshot)) => CartStore::from_snapshot(snapshot),
            Ok(None) => return None,
            Err(error) => {
                warn!(session = %id, error = %error, "unreadable cart mirror, starting empty");
                CartStore::new()
            }
        };
        debug!(session = %id, lines = cart.lines().len(), "cart restored from mirror");
        Some(self.attach_observers(id, cart))
    }
}
