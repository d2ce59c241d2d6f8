use sketch_bridge::image::{load_image, save_png};
use sketch_bridge::{
    BridgeError, CallbackSet, HeadlessHost, ImagePlacement, ImageSource, NativeImage, PixelBuffer, RasterImage,
    Sketch, SketchConfig, SketchEvent,
};
use std::sync::{Arc, Mutex};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sketch_on(host: &HeadlessHost) -> Sketch {
    Sketch::new(Arc::new(host.clone()), CallbackSet::new())
}

#[test]
fn get_then_set_leaves_the_framebuffer_unchanged() {
    init();
    let host = HeadlessHost::manual(5, 3);
    let sketch = sketch_on(&host);
    let ctx = sketch.context();

    let mut seed = PixelBuffer::new(3, 5);
    seed.fill_region(0..2, 1..4, [10, 20, 30, 255]);
    ctx.set_pixels(&seed).unwrap();

    let before = host.framebuffer();
    let pixels = ctx.get_pixels().unwrap();
    assert_eq!(pixels.shape(), (3, 5, 4));
    ctx.set_pixels(&pixels).unwrap();

    assert_eq!(host.framebuffer(), before);
    assert_eq!(pixels, seed);
}

#[test]
fn reads_are_fresh_copies() {
    init();
    let host = HeadlessHost::manual(2, 2);
    let sketch = sketch_on(&host);

    let mut pixels = sketch.context().get_pixels().unwrap();
    pixels.set_pixel(0, 0, [255, 255, 255, 255]);

    assert_eq!(host.framebuffer().pixel(0, 0), Some([0, 0, 0, 0]));
    assert_eq!(host.stats().pixel_reads, 1);
}

#[test]
fn shape_mismatch_never_reaches_the_host() {
    init();
    let host = HeadlessHost::manual(4, 2);
    let sketch = sketch_on(&host);

    // transposed
    let err = sketch.context().set_pixels(&PixelBuffer::new(4, 2)).unwrap_err();
    match err {
        BridgeError::ShapeMismatch { expected, actual } => {
            assert_eq!(expected, (2, 4, 4));
            assert_eq!(actual, (4, 2, 4));
        }
        other => panic!("expected shape mismatch, got {:?}", other),
    }
    assert_eq!(host.stats().pixel_writes, 0);
    assert_eq!(host.framebuffer(), PixelBuffer::new(2, 4));
}

#[test]
fn pixels_written_in_draw_are_visible_to_the_host() {
    init();
    let host = HeadlessHost::manual(3, 3);
    let mut set = CallbackSet::new();
    set.on(SketchEvent::Draw, |ctx| {
        let mut px = ctx.get_pixels()?;
        let (w, h) = ctx.size();
        px.set_pixel(h as usize - 1, w as usize - 1, [1, 2, 3, 4]);
        ctx.set_pixels(&px)?;
        Ok(())
    });
    let sketch = Sketch::new(Arc::new(host.clone()), set);

    sketch.run(false).unwrap();
    host.step();
    assert_eq!(host.framebuffer().pixel(2, 2), Some([1, 2, 3, 4]));
    sketch.exit();
    host.step();
}

#[test]
fn cached_images_follow_source_identity() {
    init();
    let host = HeadlessHost::manual(8, 8);
    let sketch = sketch_on(&host);
    let ctx = sketch.context();

    let sprite = ctx.create_image(2, 2, [0, 255, 0, 255]);
    let twin = ctx.create_image(2, 2, [0, 255, 0, 255]);

    ctx.image(&sprite, ImagePlacement::At { x: 0.0, y: 0.0 }, true).unwrap();
    ctx.image(&sprite, ImagePlacement::At { x: 4.0, y: 4.0 }, true).unwrap();
    assert_eq!(host.stats().images_created, 1);

    ctx.image(&twin, ImagePlacement::At { x: 2.0, y: 2.0 }, true).unwrap();
    assert_eq!(host.stats().images_created, 2);
    assert_eq!(ctx.cached_images(), 2);

    let a = ctx.resolve_image(&sprite, true).unwrap();
    let b = ctx.resolve_image(&sprite, true).unwrap();
    let c = ctx.resolve_image(&sprite, false).unwrap();
    assert!(NativeImage::ptr_eq(&a, &b));
    assert!(!NativeImage::ptr_eq(&a, &c));
    assert_eq!(host.stats().images_created, 3);

    assert_eq!(host.draw_calls().len(), 3);
    assert_eq!(host.framebuffer().pixel(5, 5), Some([0, 255, 0, 255]));

    ctx.clear_image_cache();
    assert_eq!(ctx.cached_images(), 0);
}

#[test]
fn uncached_draws_convert_every_call() {
    init();
    let host = HeadlessHost::manual(4, 4);
    let sketch = sketch_on(&host);
    let ctx = sketch.context();
    let sprite = ctx.create_image(1, 1, [7, 7, 7, 255]);

    for x in 0..3 {
        ctx.image(&sprite, ImagePlacement::At { x: x as f32, y: 0.0 }, false).unwrap();
    }

    assert_eq!(host.stats().images_created, 3);
    assert_eq!(host.stats().images_drawn, 3);
    assert_eq!(ctx.cached_images(), 0);
    assert_eq!(host.framebuffer().pixel(0, 2), Some([7, 7, 7, 255]));
}

#[test]
fn images_made_per_frame_do_not_accumulate_in_the_cache() {
    init();
    let host = HeadlessHost::manual(4, 4);
    let mut set = CallbackSet::new();
    set.on(SketchEvent::Draw, |ctx| {
        let (w, _) = ctx.size();
        let scratch = ctx.create_image(w, 1, [1, 2, 3, 255]);
        ctx.image(&scratch, ImagePlacement::At { x: 0.0, y: 0.0 }, true)?;
        Ok(())
    });
    let sketch = Sketch::new(Arc::new(host.clone()), set);
    sketch.run(false).unwrap();

    for _ in 0..50 {
        assert!(host.step());
        assert!(sketch.context().cached_images() <= 1);
    }
    assert_eq!(host.stats().images_created, 50);

    sketch.exit();
    host.step();
}

#[test]
fn bounded_cache_from_config() {
    init();
    let host = HeadlessHost::manual(4, 4);
    let config = SketchConfig::builder().image_cache_capacity(1).build().unwrap();
    let sketch = Sketch::with_config(config, Arc::new(host.clone()), CallbackSet::new());
    let ctx = sketch.context();

    let a = ctx.create_image(1, 1, [1, 1, 1, 255]);
    let b = ctx.create_image(1, 1, [2, 2, 2, 255]);
    ctx.resolve_image(&a, true).unwrap();
    ctx.resolve_image(&b, true).unwrap();
    ctx.resolve_image(&a, true).unwrap();

    assert_eq!(ctx.cached_images(), 1);
    assert_eq!(host.stats().images_created, 3);
}

#[test]
fn texture_caches_on_request() {
    init();
    let host = HeadlessHost::manual(4, 4);
    let sketch = sketch_on(&host);
    let ctx = sketch.context();
    let pattern = ImageSource::from(PixelBuffer::filled(2, 2, [9, 9, 9, 255]));

    ctx.texture(&pattern, true).unwrap();
    ctx.texture(&pattern, true).unwrap();
    assert_eq!(host.stats().images_created, 1);

    ctx.texture(&pattern, false).unwrap();
    assert_eq!(host.stats().images_created, 2);
    assert_eq!(host.stats().textures_set, 3);
    let texture = host.current_texture().unwrap();
    assert_eq!((texture.width(), texture.height()), (2, 2));
}

#[test]
fn files_load_and_frames_save() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("tile.png");
    let svg = dir.path().join("shape.SVG");
    save_png(&RasterImage::filled(3, 2, [200, 100, 50, 255]), &png).unwrap();
    std::fs::write(
        &svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="6" height="4"><rect width="6" height="4" fill="blue"/></svg>"#,
    )
    .unwrap();

    let host = HeadlessHost::manual(6, 4);
    let sketch = sketch_on(&host);
    let ctx = sketch.context();

    let tile = ctx.load_image(&png).unwrap();
    let shape = ctx.load_image(&svg).unwrap();
    ctx.image(&shape, ImagePlacement::At { x: 0.0, y: 0.0 }, false).unwrap();
    ctx.image(&tile, ImagePlacement::At { x: 0.0, y: 0.0 }, false).unwrap();

    let frame = dir.path().join("frame.png");
    ctx.save_frame(&frame).unwrap();
    let saved = load_image(&frame).unwrap();
    assert_eq!((saved.width(), saved.height()), (6, 4));
    assert_eq!(saved.pixel(1, 1), Some([200, 100, 50, 255]));
    assert_eq!(saved.pixel(5, 3), Some([0, 0, 255, 255]));

    let missing = ctx.load_image(dir.path().join("nope.png")).unwrap_err();
    assert!(matches!(missing, BridgeError::Decode { .. }));
}

#[test]
fn callbacks_receive_input_payloads() {
    init();
    use sketch_bridge::{EventArg, KeyEvent, Modifiers};

    let host = HeadlessHost::manual(2, 2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut set = CallbackSet::new();
    let keys = seen.clone();
    set.on_event(SketchEvent::KeyTyped, move |_, arg| {
        if let EventArg::Key(k) = arg {
            keys.lock().unwrap().push((k.key, k.modifiers));
        }
        Ok(())
    });
    let sketch = Sketch::new(Arc::new(host.clone()), set);
    sketch.run(false).unwrap();

    host.queue_event(
        SketchEvent::KeyTyped,
        Some(EventArg::Key(KeyEvent { key: Some('Z'), code: 90, modifiers: Modifiers::SHIFT })),
    );
    // undefined events are skipped
    host.queue_event(SketchEvent::MouseWheel, None);
    host.step();

    assert_eq!(*seen.lock().unwrap(), vec![(Some('Z'), Modifiers::SHIFT)]);
    sketch.exit();
    host.step();
}
