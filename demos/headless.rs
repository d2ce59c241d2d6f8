use sketch_bridge::{
    CallbackSet, HeadlessHost, ImagePlacement, MouseEvent, EventArg, PixelBuffer, Sketch, SketchConfig,
    SketchEvent,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), sketch_bridge::BridgeError> {
    env_logger::init();

    // Configuration comes from the environment (SKETCH_POLL_INTERVAL_MS and
    // SKETCH_IMAGE_CACHE_CAPACITY), with draw timing switched on from the start.
    let mut config = SketchConfig::from_env();
    config.profile.push(SketchEvent::Draw);

    // The headless host renders into an in-memory framebuffer on its own
    // thread. Here it runs for 120 frames and then stops by itself.
    let host = HeadlessHost::threaded(160, 120, Duration::from_millis(4)).with_max_frames(120);

    // A sprite that we draw every frame. The same source object is passed
    // each time with caching on, so the host image is only created once.
    let frame = Arc::new(AtomicU32::new(0));
    let mut callbacks = CallbackSet::new();

    callbacks.on(SketchEvent::Setup, |ctx| {
        let (w, h) = ctx.size();
        ctx.set_pixels(&PixelBuffer::filled(h as usize, w as usize, [20, 20, 40, 255]))?;
        Ok(())
    });

    let counter = frame.clone();
    let sprite = std::sync::OnceLock::new();
    callbacks.on(SketchEvent::Draw, move |ctx| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let sprite = sprite.get_or_init(|| ctx.create_image(16, 16, [240, 180, 40, 255]));
        let x = (n % 144) as f32;
        ctx.image(sprite, ImagePlacement::At { x, y: 52.0 }, true)?;
        Ok(())
    });

    callbacks.on_event(SketchEvent::MouseMoved, |_, arg| {
        if let EventArg::Mouse(MouseEvent { x, y, .. }) = arg {
            log::debug!("mouse at {},{}", x, y);
        }
        Ok(())
    });

    callbacks.on(SketchEvent::Exit, |ctx| {
        ctx.save_frame(std::env::temp_dir().join("sketch-bridge-headless.png"))?;
        Ok(())
    });

    // Start the sketch without blocking, then wait for the host to finish.
    let sketch = Sketch::with_config(config, Arc::new(host.clone()), callbacks);
    sketch.run(false)?;
    host.queue_event(SketchEvent::MouseMoved, Some(EventArg::Mouse(MouseEvent::at(10.0, 20.0))));

    sketch.wait_stopped().await?;

    println!("rendered {} frames, {} host images created", host.frame_count(), host.stats().images_created);
    sketch.log_profile_stats();
    Ok(())
}
