//! Sketch lifecycle: one guest definition running on one host.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::anchor::AdapterAnchor;
use crate::callbacks::profile::{self, ProfileStats};
use crate::callbacks::{Callback, CallbackAdapter, CallbackSet, SketchDefinition};
use crate::config::SketchConfig;
use crate::errors::{BridgeError, Result};
use crate::event::SketchEvent;
use crate::host::{HostRenderer, ImagePlacement, NativeImage};
use crate::image::cache::ImageCache;
use crate::image::{self, ImageSource, RasterImage};
use crate::pixels::{self, PixelBuffer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SketchId(Uuid);

impl SketchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SketchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SketchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SketchState {
    Created,
    Running,
    /// Terminal
    Stopped,
}

/// The controller's handle on the host object for one sketch.
#[derive(Clone)]
pub struct SketchHandle {
    id: SketchId,
    host: Arc<dyn HostRenderer>,
}

impl SketchHandle {
    pub fn id(&self) -> SketchId {
        self.id
    }

    pub fn host(&self) -> &Arc<dyn HostRenderer> {
        &self.host
    }
}

impl std::fmt::Debug for SketchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchHandle")
            .field("id", &self.id)
            .field("host", &self.host.name())
            .finish()
    }
}

/// What a callback sees of its sketch: the framebuffer, image helpers and exit.
pub struct SketchContext {
    handle: SketchHandle,
    images: Mutex<ImageCache>,
}

impl SketchContext {
    fn new(handle: SketchHandle, config: &SketchConfig) -> Self {
        Self { handle, images: Mutex::new(ImageCache::new(config.image_cache_capacity())) }
    }

    /// A context with a fresh id and default configuration.
    pub fn for_host(host: Arc<dyn HostRenderer>) -> Arc<Self> {
        let handle = SketchHandle { id: SketchId::new(), host };
        Arc::new(Self::new(handle, &SketchConfig::default()))
    }

    pub fn id(&self) -> SketchId {
        self.handle.id
    }

    pub fn host(&self) -> &Arc<dyn HostRenderer> {
        &self.handle.host
    }

    /// `(width, height)` of the sketch surface.
    pub fn size(&self) -> (u32, u32) {
        self.handle.host.dimensions()
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.handle.host.resize(width, height).map_err(BridgeError::host)
    }

    /// Fresh copy of the current framebuffer.
    pub fn get_pixels(&self) -> Result<PixelBuffer> {
        pixels::read_pixels(self.handle.host.as_ref())
    }

    pub fn set_pixels(&self, buffer: &PixelBuffer) -> Result<()> {
        pixels::write_pixels(self.handle.host.as_ref(), buffer)
    }

    fn images(&self) -> MutexGuard<'_, ImageCache> {
        self.images.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host image for `source`, memoized by source identity when `cache` is set.
    pub fn resolve_image(&self, source: &ImageSource, cache: bool) -> Result<NativeImage> {
        self.images().resolve(self.handle.host.as_ref(), source, cache)
    }

    /// Draws `source`. With `cache` set the host image is reused across calls
    /// for the same source object; otherwise it is converted every time.
    pub fn image(&self, source: &ImageSource, placement: ImagePlacement, cache: bool) -> Result<()> {
        let image = self.resolve_image(source, cache)?;
        self.handle.host.draw_image(&image, placement).map_err(BridgeError::host)
    }

    /// Uses `source` as the texture for subsequent shapes.
    pub fn texture(&self, source: &ImageSource, cache: bool) -> Result<()> {
        let image = self.resolve_image(source, cache)?;
        self.handle.host.texture(&image).map_err(BridgeError::host)
    }

    pub fn load_image(&self, path: impl AsRef<Path>) -> Result<ImageSource> {
        Ok(image::load_image(path)?.into())
    }

    /// New image of the given size filled with `color`.
    pub fn create_image(&self, width: u32, height: u32, color: [u8; 4]) -> ImageSource {
        RasterImage::filled(width, height, color).into()
    }

    /// Encodes the current framebuffer as PNG.
    pub fn save_frame(&self, path: impl AsRef<Path>) -> Result<()> {
        let frame = self.get_pixels()?;
        image::save_png(&RasterImage::from_pixel_buffer(&frame), path)
    }

    pub fn cached_images(&self) -> usize {
        self.images().len()
    }

    pub fn clear_image_cache(&self) {
        self.images().clear();
    }

    /// Asks the host to stop after the current frame.
    pub fn exit_sketch(&self) {
        self.handle.host.request_exit();
    }
}

struct Inner {
    state: SketchState,
    anchor: Option<AdapterAnchor>,
    pending_draw: Option<Callback>,
    pending_profile: BTreeSet<SketchEvent>,
    final_stats: BTreeMap<SketchEvent, ProfileStats>,
}

/// Runs one guest sketch on one host.
///
/// States move `Created -> Running -> Stopped`; a stopped sketch cannot be
/// restarted. All methods take `&self` and may be called from any thread.
pub struct Sketch {
    context: Arc<SketchContext>,
    definition: Box<dyn SketchDefinition>,
    config: SketchConfig,
    inner: Mutex<Inner>,
}

impl Sketch {
    pub fn new(host: Arc<dyn HostRenderer>, definition: impl SketchDefinition + 'static) -> Self {
        Self::with_config(SketchConfig::default(), host, definition)
    }

    pub fn with_config(
        config: SketchConfig,
        host: Arc<dyn HostRenderer>,
        definition: impl SketchDefinition + 'static,
    ) -> Self {
        let handle = SketchHandle { id: SketchId::new(), host };
        if let Err(e) = crate::config::validate(&config) {
            log::warn!("sketch {}: {}", handle.id, e);
        }
        log::debug!("sketch {} created on host '{}'", handle.id, handle.host.name());

        Self {
            context: Arc::new(SketchContext::new(handle, &config)),
            definition: Box::new(definition),
            config,
            inner: Mutex::new(Inner {
                state: SketchState::Created,
                anchor: None,
                pending_draw: None,
                pending_profile: BTreeSet::new(),
                final_stats: BTreeMap::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> SketchId {
        self.context.id()
    }

    pub fn handle(&self) -> &SketchHandle {
        &self.context.handle
    }

    pub fn context(&self) -> &Arc<SketchContext> {
        &self.context
    }

    pub fn config(&self) -> &SketchConfig {
        &self.config
    }

    fn host(&self) -> &dyn HostRenderer {
        self.context.handle.host.as_ref()
    }

    /// Starts the host with this sketch's callbacks.
    ///
    /// With `blocking`, returns only once the sketch has stopped, reporting a
    /// failed `setup` as [`BridgeError::Startup`]. Otherwise returns as soon as
    /// the host accepted the start.
    pub fn run(&self, blocking: bool) -> Result<()> {
        let handle = {
            let mut inner = self.inner();
            match inner.state {
                SketchState::Created => {}
                SketchState::Running => {
                    return Err(BridgeError::Startup(format!("sketch {} is already running", self.id())))
                }
                SketchState::Stopped => {
                    return Err(BridgeError::Startup(format!("sketch {} has already stopped", self.id())))
                }
            }
            if self.host().is_running() {
                return Err(BridgeError::Startup(format!("host '{}' is already running", self.host().name())));
            }

            let adapter = Arc::new(self.build_adapter(&inner));
            let anchor = AdapterAnchor::pin(self.id(), adapter);
            let handle = anchor.handle();
            inner.anchor = Some(anchor);
            inner.state = SketchState::Running;
            handle
        };

        // The lock is released so `settings` may call back into this sketch.
        if let Err(err) = self.host().start(handle) {
            let mut inner = self.inner();
            inner.anchor = None;
            inner.state = SketchState::Created;
            return Err(BridgeError::Startup(format!("{:#}", err)));
        }

        {
            let mut inner = self.inner();
            inner.pending_draw = None;
            inner.pending_profile.clear();
        }
        log::info!("sketch {} running on host '{}'", self.id(), self.host().name());

        if blocking {
            while self.observe() != SketchState::Stopped {
                std::thread::sleep(self.config.poll_interval());
            }
            return self.startup_failure();
        }
        Ok(())
    }

    fn build_adapter(&self, inner: &Inner) -> CallbackAdapter {
        let mut callbacks = CallbackSet::new();
        self.definition.define(&mut callbacks);
        if let Some(draw) = &inner.pending_draw {
            callbacks.insert(SketchEvent::Draw, draw.clone());
        }

        let adapter = CallbackAdapter::new(Arc::clone(&self.context), callbacks);
        for event in self.config.profile.iter().chain(inner.pending_profile.iter()) {
            if !adapter.set_profiled(*event, true) {
                log::debug!("'{}' is not defined, not profiled", event);
            }
        }
        adapter
    }

    fn startup_failure(&self) -> Result<()> {
        match self.host().failure() {
            Some(reason) => Err(BridgeError::Startup(reason)),
            None => Ok(()),
        }
    }

    /// Current state, moving to `Stopped` (and releasing the adapter) once the
    /// host reports it has stopped.
    pub fn state(&self) -> SketchState {
        self.observe()
    }

    fn observe(&self) -> SketchState {
        let mut inner = self.inner();
        if inner.state == SketchState::Running && self.host().is_stopped() {
            inner.state = SketchState::Stopped;
            if let Some(anchor) = inner.anchor.take() {
                inner.final_stats = anchor.adapter().profile_stats();
            }
            log::info!("sketch {} stopped", self.id());
        }
        inner.state
    }

    pub fn is_running(&self) -> bool {
        self.observe() == SketchState::Running
    }

    /// Asks the host to stop. Safe to call repeatedly.
    pub fn exit(&self) {
        match self.observe() {
            SketchState::Running => {
                log::debug!("sketch {} exit requested", self.id());
                self.host().request_exit();
            }
            SketchState::Created => log::debug!("sketch {} not running, nothing to exit", self.id()),
            SketchState::Stopped => {}
        }
    }

    /// Resolves once the sketch has stopped, polling at the configured interval.
    pub async fn wait_stopped(&self) -> Result<()> {
        if self.observe() == SketchState::Created {
            return Err(BridgeError::Startup(format!("sketch {} was never started", self.id())));
        }

        let mut interval = tokio::time::interval(self.config.poll_interval());
        loop {
            interval.tick().await;
            if self.observe() == SketchState::Stopped {
                break;
            }
        }
        self.startup_failure()
    }

    /// Replaces `draw`. Takes effect from the next frame of a running sketch,
    /// or at `run` when called before it.
    pub fn hot_reload_draw<F>(&self, draw: F)
    where
        F: Fn(&SketchContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback = Callback::plain(draw);
        let mut inner = self.inner();
        match (inner.state, inner.anchor.as_ref()) {
            (SketchState::Running, Some(anchor)) => {
                anchor.adapter().replace(SketchEvent::Draw, callback);
                log::info!("sketch {} draw reloaded", self.id());
            }
            (SketchState::Stopped, _) => log::warn!("sketch {} has stopped, draw not reloaded", self.id()),
            _ => inner.pending_draw = Some(callback),
        }
    }

    /// Marks callbacks by name for timing. Unknown names are ignored.
    pub fn profile_functions<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner();
        for name in names {
            let event = match name.as_ref().parse::<SketchEvent>() {
                Ok(event) => event,
                Err(err) => {
                    log::debug!("{}, not profiled", err);
                    continue;
                }
            };

            match (inner.state, inner.anchor.as_ref()) {
                (SketchState::Running, Some(anchor)) => {
                    if !anchor.adapter().set_profiled(event, true) {
                        log::debug!("'{}' is not defined, not profiled", event);
                    }
                }
                (SketchState::Stopped, _) => {}
                _ => {
                    inner.pending_profile.insert(event);
                }
            }
        }
    }

    pub fn profile_draw(&self) {
        self.profile_functions([SketchEvent::Draw.as_str()]);
    }

    /// Timing for every profiled callback that ran at least once.
    pub fn profile_stats(&self) -> BTreeMap<SketchEvent, ProfileStats> {
        let inner = self.inner();
        match inner.anchor.as_ref() {
            Some(anchor) => anchor.adapter().profile_stats(),
            None => inner.final_stats.clone(),
        }
    }

    pub fn log_profile_stats(&self) {
        profile::log_stats(&self.profile_stats());
    }
}

impl Drop for Sketch {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(anchor) = inner.anchor.take() {
            if self.context.handle.host.is_stopped() {
                return;
            }
            log::warn!("sketch {} dropped while running; exit requested, adapter stays pinned until the host stops", anchor.id());
            self.context.handle.host.request_exit();
            anchor.persist();
        }
    }
}
