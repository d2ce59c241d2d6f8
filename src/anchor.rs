//! Keeps callback adapters alive while a host may still call them.
//!
//! The host only ever holds an [`AdapterRef`], a weak reference. The strong
//! reference lives in a process-wide registry for as long as the
//! [`AdapterAnchor`] that put it there exists, or, for a persisted anchor,
//! until its host reports it has stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use lazy_static::lazy_static;
use crate::callbacks::{AdapterRef, CallbackAdapter};
use crate::sketch::SketchId;

lazy_static! {
    static ref PINNED: Mutex<HashMap<SketchId, Arc<CallbackAdapter>>> = Mutex::new(HashMap::new());
}

fn pinned() -> MutexGuard<'static, HashMap<SketchId, Arc<CallbackAdapter>>> {
    PINNED.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pins an adapter for the duration of a run; dropping it unpins.
pub struct AdapterAnchor {
    id: SketchId,
    adapter: Arc<CallbackAdapter>,
    persist: bool,
}

impl AdapterAnchor {
    pub fn pin(id: SketchId, adapter: Arc<CallbackAdapter>) -> Self {
        release_stopped();
        if pinned().insert(id, Arc::clone(&adapter)).is_some() {
            log::warn!("sketch {} pinned a second adapter; the first is released", id);
        }
        log::debug!("adapter for sketch {} pinned", id);
        Self { id, adapter, persist: false }
    }

    pub fn id(&self) -> SketchId {
        self.id
    }

    pub fn adapter(&self) -> &Arc<CallbackAdapter> {
        &self.adapter
    }

    /// A handle to pass to the host.
    pub fn handle(&self) -> AdapterRef {
        AdapterRef::new(self.id, Arc::downgrade(&self.adapter))
    }

    /// Drops the anchor but leaves the adapter pinned until [`unpin`] is called
    /// or its host stops.
    pub fn persist(mut self) {
        self.persist = true;
    }
}

impl Drop for AdapterAnchor {
    fn drop(&mut self) {
        if self.persist {
            log::debug!("adapter for sketch {} left pinned", self.id);
            return;
        }
        let mut pinned = pinned();
        // Only remove our own adapter, not one pinned later under the same id.
        if pinned.get(&self.id).map(|a| Arc::ptr_eq(a, &self.adapter)).unwrap_or(false) {
            pinned.remove(&self.id);
            log::debug!("adapter for sketch {} released", self.id);
        }
    }
}

pub fn is_pinned(id: SketchId) -> bool {
    pinned().contains_key(&id)
}

pub fn pinned_count() -> usize {
    pinned().len()
}

/// Releases an adapter left behind by [`AdapterAnchor::persist`].
pub fn unpin(id: SketchId) -> bool {
    let released = pinned().remove(&id).is_some();
    if released {
        log::debug!("adapter for sketch {} unpinned", id);
    }
    released
}

/// Releases every pinned adapter whose host has stopped.
///
/// A live anchor keeps its own reference, so only persisted adapters are
/// actually freed here.
pub fn release_stopped() -> usize {
    let candidates: Vec<(SketchId, Arc<CallbackAdapter>)> =
        pinned().iter().map(|(id, adapter)| (*id, Arc::clone(adapter))).collect();

    // Hosts are asked without holding the registry lock.
    let stopped: Vec<_> = candidates
        .into_iter()
        .filter(|(_, adapter)| adapter.context().host().is_stopped())
        .collect();
    if stopped.is_empty() {
        return 0;
    }

    let mut released = Vec::new();
    {
        let mut pinned = pinned();
        for (id, adapter) in &stopped {
            if pinned.get(id).map(|a| Arc::ptr_eq(a, adapter)).unwrap_or(false) {
                if let Some(entry) = pinned.remove(id) {
                    released.push(entry);
                }
                log::debug!("adapter for sketch {} released, host stopped", id);
            }
        }
    }

    // Adapters are dropped here, outside the lock.
    let count = released.len();
    drop(released);
    drop(stopped);
    count
}
