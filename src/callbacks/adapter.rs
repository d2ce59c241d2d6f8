use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use crate::callbacks::profile::{ProfileStats, Profiler};
use crate::callbacks::{Callback, CallbackSet};
use crate::errors::{BridgeError, Result};
use crate::event::{EventArg, SketchEvent};
use crate::sketch::SketchContext;

struct Entry {
    callback: Callback,
    profiled: bool,
}

/// The object the host calls into for one run of a sketch.
///
/// Entries are immutable once published. Replacing a callback or toggling its
/// profiling swaps in a new entry, so a lookup racing with the swap sees
/// either the old or the new one in full.
pub struct CallbackAdapter {
    context: Arc<SketchContext>,
    entries: RwLock<HashMap<SketchEvent, Arc<Entry>>>,
    profiler: Profiler,
}

impl CallbackAdapter {
    pub fn new(context: Arc<SketchContext>, callbacks: CallbackSet) -> Self {
        let entries: HashMap<_, _> = callbacks
            .into_inner()
            .into_iter()
            .map(|(event, callback)| (event, Arc::new(Entry { callback, profiled: false })))
            .collect();

        log::debug!(
            "adapter for sketch {} defines {:?}",
            context.id(),
            entries.keys().map(|e| e.as_str()).collect::<Vec<_>>()
        );

        Self { context, entries: RwLock::new(entries), profiler: Profiler::default() }
    }

    pub fn context(&self) -> &Arc<SketchContext> {
        &self.context
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SketchEvent, Arc<Entry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SketchEvent, Arc<Entry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_defined(&self, event: SketchEvent) -> bool {
        self.read().contains_key(&event)
    }

    pub fn defined_events(&self) -> Vec<SketchEvent> {
        let mut events: Vec<_> = self.read().keys().copied().collect();
        events.sort();
        events
    }

    /// Calls the guest callback for `event`.
    ///
    /// Returns `Ok(false)` without side effects when the event is not defined.
    /// Failures of the `exit` callback are logged and reported as a completed
    /// call; any other failure is returned as [`BridgeError::Callback`].
    pub fn invoke(&self, event: SketchEvent, arg: Option<&EventArg>) -> Result<bool> {
        // Never hold the lock across the call: callbacks may replace entries.
        let entry = match self.read().get(&event) {
            Some(entry) => Arc::clone(entry),
            None => return Ok(false),
        };

        let started = entry.profiled.then(Instant::now);
        let outcome = entry.callback.call(&self.context, arg);
        if let Some(started) = started {
            self.profiler.record(event, started.elapsed());
        }

        match outcome {
            Ok(()) => Ok(true),
            Err(err) if event == SketchEvent::Exit => {
                log::error!("exit callback of sketch {} failed: {:#}", self.context.id(), err);
                Ok(true)
            }
            Err(source) => Err(BridgeError::Callback { event, source }),
        }
    }

    /// Publishes `callback` for `event`, defining it if it was absent.
    /// Profiling of an existing entry carries over.
    pub fn replace(&self, event: SketchEvent, callback: Callback) {
        let mut entries = self.write();
        let profiled = entries.get(&event).map(|e| e.profiled).unwrap_or(false);
        entries.insert(event, Arc::new(Entry { callback, profiled }));
        log::debug!("callback '{}' replaced for sketch {}", event, self.context.id());
    }

    /// Returns false if `event` is not defined.
    pub fn set_profiled(&self, event: SketchEvent, profiled: bool) -> bool {
        let mut entries = self.write();
        let callback = match entries.get(&event) {
            Some(entry) if entry.profiled == profiled => return true,
            Some(entry) => entry.callback.clone(),
            None => return false,
        };
        entries.insert(event, Arc::new(Entry { callback, profiled }));
        true
    }

    pub fn is_profiled(&self, event: SketchEvent) -> bool {
        self.read().get(&event).map(|e| e.profiled).unwrap_or(false)
    }

    pub fn profile_stats(&self) -> BTreeMap<SketchEvent, ProfileStats> {
        self.profiler.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::headless::HeadlessHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adapter(set: CallbackSet) -> CallbackAdapter {
        CallbackAdapter::new(SketchContext::for_host(Arc::new(HeadlessHost::manual(2, 2))), set)
    }

    #[test]
    fn undefined_events_are_never_called() {
        let a = adapter(CallbackSet::new());
        assert_eq!(a.invoke(SketchEvent::KeyPressed, None).unwrap(), false);
        assert!(a.defined_events().is_empty());
        assert!(a.profile_stats().is_empty());
    }

    #[test]
    fn defined_events_match_registration() {
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Exit, |_| Ok(()))
            .on(SketchEvent::Settings, |_| Ok(()))
            .on_event(SketchEvent::MouseWheel, |_, _| Ok(()));

        let a = adapter(set);
        assert_eq!(
            a.defined_events(),
            vec![SketchEvent::Settings, SketchEvent::MouseWheel, SketchEvent::Exit]
        );
        assert!(a.is_defined(SketchEvent::MouseWheel));
        assert!(!a.is_defined(SketchEvent::Draw));
    }

    #[test]
    fn failures_carry_the_event_name() {
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Draw, |_| Err(anyhow::anyhow!("boom")));

        match adapter(set).invoke(SketchEvent::Draw, None) {
            Err(BridgeError::Callback { event, source }) => {
                assert_eq!(event, SketchEvent::Draw);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected callback error, got {:?}", other),
        }
    }

    #[test]
    fn exit_failures_are_swallowed() {
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Exit, |_| Err(anyhow::anyhow!("cleanup failed")));
        assert_eq!(adapter(set).invoke(SketchEvent::Exit, None).unwrap(), true);
    }

    #[test]
    fn replace_swaps_draw_and_keeps_profiling() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut set = CallbackSet::new();
        let counter = first.clone();
        set.on(SketchEvent::Draw, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let a = adapter(set);
        assert!(a.set_profiled(SketchEvent::Draw, true));
        a.invoke(SketchEvent::Draw, None).unwrap();

        let counter = second.clone();
        a.replace(SketchEvent::Draw, Callback::plain(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        a.invoke(SketchEvent::Draw, None).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(a.is_profiled(SketchEvent::Draw));
        assert_eq!(a.profile_stats()[&SketchEvent::Draw].calls, 2);
    }

    #[test]
    fn profiling_undefined_events_is_refused() {
        let a = adapter(CallbackSet::new());
        assert!(!a.set_profiled(SketchEvent::Draw, true));
        assert!(!a.is_profiled(SketchEvent::Draw));
    }

    #[test]
    fn callbacks_may_replace_themselves() {
        let a = Arc::new(adapter(CallbackSet::new()));
        let weak = Arc::downgrade(&a);
        a.replace(SketchEvent::Draw, Callback::plain(move |_| {
            if let Some(a) = weak.upgrade() {
                a.replace(SketchEvent::Draw, Callback::plain(|_| Ok(())));
            }
            Ok(())
        }));

        assert!(a.invoke(SketchEvent::Draw, None).unwrap());
        assert!(a.invoke(SketchEvent::Draw, None).unwrap());
    }
}
