//! Guest-defined callbacks and the handle the host uses to reach them.
//!
//! A guest describes its sketch by registering callables into a
//! [`CallbackSet`]. At run start the set is frozen into a
//! [`CallbackAdapter`], and the host is handed an [`AdapterRef`] through which
//! it invokes callbacks by event. The host never owns the adapter.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use crate::errors::{BridgeError, Result};
use crate::event::{EventArg, SketchEvent};
use crate::sketch::{SketchContext, SketchId};

pub mod adapter;
pub mod profile;

pub use adapter::CallbackAdapter;
pub use profile::ProfileStats;

type PlainFn = dyn Fn(&SketchContext) -> anyhow::Result<()> + Send + Sync;
type EventFn = dyn Fn(&SketchContext, &EventArg) -> anyhow::Result<()> + Send + Sync;

/// A registered guest callable, taking either no argument or the event payload.
#[derive(Clone)]
pub enum Callback {
    Plain(Arc<PlainFn>),
    WithEvent(Arc<EventFn>),
}

impl Callback {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(&SketchContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callback::Plain(Arc::new(f))
    }

    pub fn with_event<F>(f: F) -> Self
    where
        F: Fn(&SketchContext, &EventArg) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callback::WithEvent(Arc::new(f))
    }

    pub fn takes_event(&self) -> bool {
        matches!(self, Callback::WithEvent(_))
    }

    /// Plain callbacks ignore `arg`. A callback that wants the payload fails
    /// when the host did not supply one.
    pub(crate) fn call(&self, ctx: &SketchContext, arg: Option<&EventArg>) -> anyhow::Result<()> {
        match (self, arg) {
            (Callback::Plain(f), _) => f(ctx),
            (Callback::WithEvent(f), Some(arg)) => f(ctx, arg),
            (Callback::WithEvent(_), None) => Err(anyhow::anyhow!("callback expects an event argument but none was passed")),
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callback::Plain(_) => write!(f, "Callback::Plain"),
            Callback::WithEvent(_) => write!(f, "Callback::WithEvent"),
        }
    }
}

/// The callbacks a guest defined, by event. Absent events are simply missing.
#[derive(Clone, Default, Debug)]
pub struct CallbackSet {
    callbacks: BTreeMap<SketchEvent, Callback>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback that takes no argument.
    pub fn on<F>(&mut self, event: SketchEvent, f: F) -> &mut Self
    where
        F: Fn(&SketchContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event, Callback::plain(f));
        self
    }

    /// Registers a callback that receives the key or mouse payload.
    pub fn on_event<F>(&mut self, event: SketchEvent, f: F) -> &mut Self
    where
        F: Fn(&SketchContext, &EventArg) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event, Callback::with_event(f));
        self
    }

    /// Returns the callback previously registered for `event`, if any.
    pub fn insert(&mut self, event: SketchEvent, callback: Callback) -> Option<Callback> {
        let previous = self.callbacks.insert(event, callback);
        if previous.is_some() {
            log::debug!("callback for '{}' redefined", event);
        }
        previous
    }

    pub fn remove(&mut self, event: SketchEvent) -> Option<Callback> {
        self.callbacks.remove(&event)
    }

    pub fn get(&self, event: SketchEvent) -> Option<&Callback> {
        self.callbacks.get(&event)
    }

    pub fn contains(&self, event: SketchEvent) -> bool {
        self.callbacks.contains_key(&event)
    }

    /// Defined events in their canonical order.
    pub fn events(&self) -> Vec<SketchEvent> {
        self.callbacks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<SketchEvent, Callback> {
        self.callbacks
    }
}

/// Something that can describe a sketch by registering callbacks.
///
/// Called once per run, right before the host is started.
pub trait SketchDefinition: Send + Sync {
    fn define(&self, callbacks: &mut CallbackSet);
}

impl SketchDefinition for CallbackSet {
    fn define(&self, callbacks: &mut CallbackSet) {
        for (event, callback) in &self.callbacks {
            callbacks.insert(*event, callback.clone());
        }
    }
}

/// Adapts a registration closure into a [`SketchDefinition`].
pub struct DefineFn<F>(pub F);

impl<F> SketchDefinition for DefineFn<F>
where
    F: Fn(&mut CallbackSet) + Send + Sync,
{
    fn define(&self, callbacks: &mut CallbackSet) {
        (self.0)(callbacks)
    }
}

/// Non-owning handle the host uses to invoke callbacks.
///
/// Once the adapter is released every call fails with
/// [`BridgeError::AdapterReleased`].
#[derive(Clone)]
pub struct AdapterRef {
    sketch_id: SketchId,
    adapter: Weak<CallbackAdapter>,
}

impl AdapterRef {
    pub(crate) fn new(sketch_id: SketchId, adapter: Weak<CallbackAdapter>) -> Self {
        Self { sketch_id, adapter }
    }

    pub fn sketch_id(&self) -> SketchId {
        self.sketch_id
    }

    pub fn is_alive(&self) -> bool {
        self.adapter.strong_count() > 0
    }

    fn upgrade(&self) -> Result<Arc<CallbackAdapter>> {
        self.adapter.upgrade().ok_or(BridgeError::AdapterReleased)
    }

    /// Invokes the callback for `event`. `Ok(false)` means the guest did not define it.
    pub fn invoke(&self, event: SketchEvent, arg: Option<&EventArg>) -> Result<bool> {
        self.upgrade()?.invoke(event, arg)
    }

    pub fn is_defined(&self, event: SketchEvent) -> Result<bool> {
        Ok(self.upgrade()?.is_defined(event))
    }

    pub fn defined_events(&self) -> Result<Vec<SketchEvent>> {
        Ok(self.upgrade()?.defined_events())
    }
}

impl std::fmt::Debug for AdapterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRef")
            .field("sketch_id", &self.sketch_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyEvent;
    use crate::event::Modifiers;
    use crate::host::headless::HeadlessHost;

    fn context() -> Arc<SketchContext> {
        SketchContext::for_host(Arc::new(HeadlessHost::manual(2, 2)))
    }

    #[test]
    fn absent_events_are_omitted() {
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Draw, |_| Ok(())).on(SketchEvent::Setup, |_| Ok(()));

        assert_eq!(set.events(), vec![SketchEvent::Setup, SketchEvent::Draw]);
        assert!(!set.contains(SketchEvent::KeyPressed));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn redefining_replaces_the_previous_callback() {
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Draw, |_| Ok(()));
        let previous = set.insert(SketchEvent::Draw, Callback::with_event(|_, _| Ok(())));

        assert!(matches!(previous, Some(Callback::Plain(_))));
        assert!(set.get(SketchEvent::Draw).map(Callback::takes_event).unwrap_or(false));
    }

    #[test]
    fn event_callback_without_payload_fails() {
        let ctx = context();
        let cb = Callback::with_event(|_, _| Ok(()));
        assert!(cb.call(&ctx, None).is_err());

        let arg = EventArg::Key(KeyEvent { key: Some('a'), code: 65, modifiers: Modifiers::empty() });
        assert!(cb.call(&ctx, Some(&arg)).is_ok());
        // plain callbacks ignore the payload
        assert!(Callback::plain(|_| Ok(())).call(&ctx, Some(&arg)).is_ok());
    }

    #[test]
    fn callback_set_is_its_own_definition() {
        let mut original = CallbackSet::new();
        original.on(SketchEvent::MouseMoved, |_| Ok(()));

        let mut target = CallbackSet::new();
        original.define(&mut target);
        assert_eq!(target.events(), vec![SketchEvent::MouseMoved]);

        let def = DefineFn(|set: &mut CallbackSet| {
            set.on(SketchEvent::Exit, |_| Ok(()));
        });
        let mut target = CallbackSet::new();
        def.define(&mut target);
        assert!(target.contains(SketchEvent::Exit));
    }

    #[test]
    fn released_adapter_fails_cleanly() {
        let adapter = Arc::new(CallbackAdapter::new(context(), CallbackSet::new()));
        let handle = AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter));
        assert!(handle.is_alive());
        assert_eq!(handle.invoke(SketchEvent::Draw, None).unwrap(), false);

        drop(adapter);
        assert!(!handle.is_alive());
        assert!(matches!(handle.invoke(SketchEvent::Draw, None), Err(BridgeError::AdapterReleased)));
        assert!(matches!(handle.is_defined(SketchEvent::Draw), Err(BridgeError::AdapterReleased)));
    }
}
