//! In-process host with an RGBA framebuffer and no window.
//!
//! Drives the sketch either one frame per [`HeadlessHost::step`] call, or from
//! its own loop thread at a fixed frame interval. Each frame runs `setup` (first
//! frame only), then any queued input events, then `draw`. When the loop ends it
//! calls `exit`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use anyhow::{anyhow, bail};
use crate::callbacks::AdapterRef;
use crate::errors::BridgeError;
use crate::event::{EventArg, SketchEvent};
use crate::host::{HostRenderer, ImagePlacement, NativeImage};
use crate::image::RasterImage;
use crate::pixels::{PixelBuffer, CHANNELS};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Manual,
    Threaded { frame_interval: Duration },
}

/// Counts of host operations, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub pixel_reads: u64,
    pub pixel_writes: u64,
    pub images_created: u64,
    pub images_drawn: u64,
    pub textures_set: u64,
}

/// One `draw_image` call as the host saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub frame: u64,
    pub image_width: u32,
    pub image_height: u32,
    pub placement: ImagePlacement,
}

struct State {
    width: u32,
    height: u32,
    framebuffer: Vec<u8>,
    adapter: Option<AdapterRef>,
    setup_done: bool,
    frame_count: u64,
    max_frames: Option<u64>,
    pending: VecDeque<(SketchEvent, Option<EventArg>)>,
    draws: Vec<DrawCall>,
    texture: Option<NativeImage>,
    failure: Option<String>,
    stats: HostStats,
}

struct Shared {
    name: String,
    mode: Mode,
    state: Mutex<State>,
    running: AtomicBool,
    stopped: AtomicBool,
    exit_requested: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloning yields another handle on the same host.
#[derive(Clone)]
pub struct HeadlessHost {
    shared: Arc<Shared>,
}

impl HeadlessHost {
    /// A host that only advances when [`HeadlessHost::step`] is called.
    pub fn manual(width: u32, height: u32) -> Self {
        Self::with_mode(width, height, Mode::Manual)
    }

    /// A host that runs its own frame loop once started.
    pub fn threaded(width: u32, height: u32, frame_interval: Duration) -> Self {
        Self::with_mode(width, height, Mode::Threaded { frame_interval })
    }

    fn with_mode(width: u32, height: u32, mode: Mode) -> Self {
        let state = State {
            width,
            height,
            framebuffer: vec![0; width as usize * height as usize * CHANNELS],
            adapter: None,
            setup_done: false,
            frame_count: 0,
            max_frames: None,
            pending: VecDeque::new(),
            draws: Vec::new(),
            texture: None,
            failure: None,
            stats: HostStats::default(),
        };

        Self {
            shared: Arc::new(Shared {
                name: "headless".to_string(),
                mode,
                state: Mutex::new(state),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                exit_requested: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Stop by itself after `frames` frames.
    pub fn with_max_frames(self, frames: u64) -> Self {
        self.state().max_frames = Some(frames);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues an input event for delivery at the start of the next frame.
    pub fn queue_event(&self, event: SketchEvent, arg: Option<EventArg>) {
        self.state().pending.push_back((event, arg));
    }

    /// Runs one frame. Returns false once the loop has ended (or never started).
    pub fn step(&self) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }

        let (adapter, first_frame, events) = {
            let mut state = self.state();
            let adapter = match state.adapter.clone() {
                Some(adapter) => adapter,
                None => return false,
            };
            let first_frame = !state.setup_done;
            state.setup_done = true;
            let events: Vec<_> = state.pending.drain(..).collect();
            (adapter, first_frame, events)
        };

        if self.shared.exit_requested.load(Ordering::SeqCst) {
            self.finish(&adapter);
            return false;
        }

        if first_frame {
            match adapter.invoke(SketchEvent::Setup, None) {
                Ok(_) => {}
                Err(BridgeError::AdapterReleased) => return self.halt(),
                Err(err) => {
                    log::error!("{} host: setup failed: {}", self.shared.name, err);
                    self.state().failure = Some(err.to_string());
                    self.finish(&adapter);
                    return false;
                }
            }
        }

        for (event, arg) in events {
            match adapter.invoke(event, arg.as_ref()) {
                Ok(_) => {}
                Err(BridgeError::AdapterReleased) => return self.halt(),
                Err(err) => log::warn!("{} host: {}", self.shared.name, err),
            }
        }

        match adapter.invoke(SketchEvent::Draw, None) {
            Ok(_) => {}
            Err(BridgeError::AdapterReleased) => return self.halt(),
            Err(err) => log::error!("{} host: frame failed: {}", self.shared.name, err),
        }

        let limit_reached = {
            let mut state = self.state();
            state.frame_count += 1;
            state.max_frames.map(|max| state.frame_count >= max).unwrap_or(false)
        };

        if limit_reached || self.shared.exit_requested.load(Ordering::SeqCst) {
            self.finish(&adapter);
            return false;
        }
        true
    }

    fn finish(&self, adapter: &AdapterRef) {
        if let Err(err) = adapter.invoke(SketchEvent::Exit, None) {
            log::warn!("{} host: exit not delivered: {}", self.shared.name, err);
        }
        self.halt();
    }

    fn halt(&self) -> bool {
        self.state().adapter = None;
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.stopped.store(true, Ordering::SeqCst);
        log::info!("{} host stopped", self.shared.name);
        crate::anchor::release_stopped();
        false
    }

    /// Waits for the loop thread of a threaded host to finish.
    pub fn join(&self) {
        let handle = self.shared.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("{} host: loop thread panicked", self.shared.name);
            }
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.state().frame_count
    }

    pub fn stats(&self) -> HostStats {
        self.state().stats
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.state().draws.clone()
    }

    pub fn current_texture(&self) -> Option<NativeImage> {
        self.state().texture.clone()
    }

    /// Copy of the framebuffer that does not count as a host read.
    pub fn framebuffer(&self) -> PixelBuffer {
        let state = self.state();
        PixelBuffer::from_vec(state.height as usize, state.width as usize, state.framebuffer.clone())
            .unwrap_or_else(|_| PixelBuffer::new(state.height as usize, state.width as usize))
    }

    pub fn holds_adapter(&self) -> bool {
        self.state().adapter.is_some()
    }
}

impl HostRenderer for HeadlessHost {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn start(&self, adapter: AdapterRef) -> anyhow::Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            bail!("{} host is already running", self.shared.name);
        }
        if self.shared.stopped.load(Ordering::SeqCst) {
            bail!("{} host has already run a sketch", self.shared.name);
        }

        // settings runs before the surface exists; failing it refuses the start
        adapter
            .invoke(SketchEvent::Settings, None)
            .map_err(|err| anyhow!(err).context("settings failed"))?;

        self.state().adapter = Some(adapter);
        self.shared.running.store(true, Ordering::SeqCst);
        log::info!("{} host started", self.shared.name);

        if let Mode::Threaded { frame_interval } = self.shared.mode {
            let host = self.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-loop", self.shared.name))
                .spawn(move || {
                    while host.step() {
                        std::thread::sleep(frame_interval);
                    }
                });

            match spawned {
                Ok(handle) => {
                    *self.shared.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                }
                Err(err) => {
                    self.state().adapter = None;
                    self.shared.running.store(false, Ordering::SeqCst);
                    return Err(anyhow!(err).context("cannot spawn loop thread"));
                }
            }
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    fn request_exit(&self) {
        self.shared.exit_requested.store(true, Ordering::SeqCst);
    }

    fn failure(&self) -> Option<String> {
        self.state().failure.clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        let state = self.state();
        (state.width, state.height)
    }

    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()> {
        let mut state = self.state();
        state.width = width;
        state.height = height;
        state.framebuffer = vec![0; width as usize * height as usize * CHANNELS];
        Ok(())
    }

    fn read_pixels(&self) -> anyhow::Result<Vec<u8>> {
        let mut state = self.state();
        state.stats.pixel_reads += 1;
        Ok(state.framebuffer.clone())
    }

    fn write_pixels(&self, pixels: &[u8]) -> anyhow::Result<()> {
        let mut state = self.state();
        if pixels.len() != state.framebuffer.len() {
            bail!("expected {} bytes, got {}", state.framebuffer.len(), pixels.len());
        }
        state.framebuffer.copy_from_slice(pixels);
        state.stats.pixel_writes += 1;
        Ok(())
    }

    fn create_image(&self, raster: &RasterImage) -> anyhow::Result<NativeImage> {
        self.state().stats.images_created += 1;
        Ok(NativeImage::new(raster.width(), raster.height(), raster.clone()))
    }

    fn create_image_from_pixels(&self, pixels: &PixelBuffer) -> anyhow::Result<NativeImage> {
        self.create_image(&RasterImage::from_pixel_buffer(pixels))
    }

    fn draw_image(&self, image: &NativeImage, placement: ImagePlacement) -> anyhow::Result<()> {
        let raster = image
            .payload::<RasterImage>()
            .ok_or_else(|| anyhow!("image was not created by the {} host", self.shared.name))?;

        let mut state = self.state();
        let (width, height) = (state.width, state.height);
        blit(&mut state.framebuffer, width, height, raster, placement);

        let frame = state.frame_count;
        state.draws.push(DrawCall {
            frame,
            image_width: image.width(),
            image_height: image.height(),
            placement,
        });
        state.stats.images_drawn += 1;
        Ok(())
    }

    fn texture(&self, image: &NativeImage) -> anyhow::Result<()> {
        let mut state = self.state();
        state.texture = Some(image.clone());
        state.stats.textures_set += 1;
        Ok(())
    }
}

/// Source-over composite of `src` into the framebuffer, clipped, nearest-neighbour scaled.
fn blit(dst: &mut [u8], dst_w: u32, dst_h: u32, src: &RasterImage, placement: ImagePlacement) {
    let (x0, y0, w, h) = match placement {
        ImagePlacement::At { x, y } => (x, y, src.width() as f32, src.height() as f32),
        ImagePlacement::Sized { x, y, width, height } => (x, y, width, height),
    };
    if w <= 0.0 || h <= 0.0 || src.width() == 0 || src.height() == 0 {
        return;
    }

    let left = x0.round().max(0.0) as u32;
    let top = y0.round().max(0.0) as u32;
    let right = ((x0 + w).round().max(0.0) as u32).min(dst_w);
    let bottom = ((y0 + h).round().max(0.0) as u32).min(dst_h);

    for dy in top..bottom {
        let sy = (((dy as f32 - y0) / h) * src.height() as f32) as u32;
        for dx in left..right {
            let sx = (((dx as f32 - x0) / w) * src.width() as f32) as u32;
            let Some(px) = src.pixel(sx.min(src.width() - 1), sy.min(src.height() - 1)) else {
                continue;
            };
            let offset = (dy as usize * dst_w as usize + dx as usize) * CHANNELS;
            composite(&mut dst[offset..offset + CHANNELS], px);
        }
    }
}

fn composite(dst: &mut [u8], src: [u8; 4]) {
    let a = src[3] as u32;
    if a == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    if a == 0 {
        return;
    }
    // straight alpha: weights are scaled by 255 * 255
    let inv = 255 - a;
    let dst_a = dst[3] as u32;
    let out_a = a * 255 + dst_a * inv;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * a * 255 + dst[c] as u32 * dst_a * inv + out_a / 2) / out_a) as u8;
    }
    dst[3] = ((out_a + 127) / 255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{CallbackAdapter, CallbackSet};
    use crate::sketch::{SketchContext, SketchId};
    use std::sync::atomic::AtomicUsize;

    fn recorder(log: Arc<Mutex<Vec<SketchEvent>>>) -> CallbackSet {
        let mut set = CallbackSet::new();
        for event in [SketchEvent::Settings, SketchEvent::Setup, SketchEvent::Draw, SketchEvent::KeyPressed, SketchEvent::Exit] {
            let log = log.clone();
            set.on(event, move |_| {
                log.lock().unwrap().push(event);
                Ok(())
            });
        }
        set
    }

    fn attach(host: &HeadlessHost, set: CallbackSet) -> Arc<CallbackAdapter> {
        let ctx = SketchContext::for_host(Arc::new(host.clone()));
        Arc::new(CallbackAdapter::new(ctx, set))
    }

    #[test]
    fn frame_order_is_setup_events_draw() {
        let host = HeadlessHost::manual(2, 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let adapter = attach(&host, recorder(log.clone()));

        host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![SketchEvent::Settings]);

        host.queue_event(SketchEvent::KeyPressed, None);
        assert!(host.step());
        assert!(host.step());
        host.request_exit();
        assert!(!host.step());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                SketchEvent::Settings,
                SketchEvent::Setup,
                SketchEvent::KeyPressed,
                SketchEvent::Draw,
                SketchEvent::Draw,
                SketchEvent::Exit,
            ]
        );
        assert!(host.is_stopped());
        assert!(!host.is_running());
        assert!(!host.holds_adapter());
        assert_eq!(host.frame_count(), 2);
    }

    #[test]
    fn failing_settings_refuses_start() {
        let host = HeadlessHost::manual(2, 2);
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Settings, |_| Err(anyhow!("no renderer")));
        let adapter = attach(&host, set);

        let err = host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap_err();
        assert!(format!("{:#}", err).contains("no renderer"));
        assert!(!host.is_running());
        assert!(!host.holds_adapter());
    }

    #[test]
    fn failing_setup_is_recorded_and_stops_the_loop() {
        let host = HeadlessHost::manual(2, 2);
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Setup, |_| Err(anyhow!("missing asset")));
        let adapter = attach(&host, set);

        host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap();
        assert!(!host.step());
        assert!(host.is_stopped());
        assert!(host.failure().unwrap().contains("missing asset"));
    }

    #[test]
    fn failing_draw_only_aborts_that_frame() {
        let host = HeadlessHost::manual(2, 2);
        let mut set = CallbackSet::new();
        set.on(SketchEvent::Draw, |_| Err(anyhow!("bad frame")));
        let adapter = attach(&host, set);

        host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap();
        assert!(host.step());
        assert!(host.step());
        assert_eq!(host.frame_count(), 2);
        assert!(host.failure().is_none());
    }

    #[test]
    fn released_adapter_halts_the_host() {
        let host = HeadlessHost::manual(2, 2);
        let adapter = attach(&host, CallbackSet::new());
        host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap();

        drop(adapter);
        assert!(!host.step());
        assert!(host.is_stopped());
    }

    #[test]
    fn threaded_loop_honours_frame_limit() {
        let host = HeadlessHost::threaded(2, 2, Duration::from_millis(1)).with_max_frames(5);
        let draws = Arc::new(AtomicUsize::new(0));
        let mut set = CallbackSet::new();
        let counter = draws.clone();
        set.on(SketchEvent::Draw, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let adapter = attach(&host, set);

        host.start(AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter))).unwrap();
        host.join();

        assert!(host.is_stopped());
        assert_eq!(draws.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn start_twice_fails() {
        let host = HeadlessHost::manual(1, 1);
        let adapter = attach(&host, CallbackSet::new());
        let handle = AdapterRef::new(SketchId::new(), Arc::downgrade(&adapter));
        host.start(handle.clone()).unwrap();
        assert!(host.start(handle).is_err());
    }

    #[test]
    fn draw_image_composites_and_clips() {
        let host = HeadlessHost::manual(4, 4);
        let red = host.create_image(&RasterImage::filled(2, 2, [255, 0, 0, 255])).unwrap();
        host.draw_image(&red, ImagePlacement::At { x: 3.0, y: 3.0 }).unwrap();

        let fb = host.framebuffer();
        assert_eq!(fb.pixel(3, 3), Some([255, 0, 0, 255]));
        assert_eq!(fb.pixel(2, 2), Some([0, 0, 0, 0]));

        let half = host.create_image(&RasterImage::filled(1, 1, [0, 0, 255, 128])).unwrap();
        host.draw_image(&half, ImagePlacement::Sized { x: 0.0, y: 0.0, width: 2.0, height: 2.0 }).unwrap();
        let fb = host.framebuffer();
        assert_eq!(fb.pixel(1, 1), Some([0, 0, 255, 128]));
        assert_eq!(fb.pixel(0, 2), Some([0, 0, 0, 0]));

        let draws = host.draw_calls();
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].image_width, draws[0].image_height), (2, 2));
        assert_eq!(host.stats().images_created, 2);
    }

    #[test]
    fn foreign_images_are_rejected() {
        let host = HeadlessHost::manual(1, 1);
        let foreign = NativeImage::new(1, 1, 5u8);
        assert!(host.draw_image(&foreign, ImagePlacement::At { x: 0.0, y: 0.0 }).is_err());
    }

    #[test]
    fn resize_resets_the_framebuffer() {
        let host = HeadlessHost::manual(2, 2);
        host.resize(3, 1).unwrap();
        assert_eq!(host.dimensions(), (3, 1));
        assert_eq!(host.read_pixels().unwrap().len(), 12);
        assert!(host.write_pixels(&[0; 16]).is_err());
    }
}
