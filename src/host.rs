//! Host renderer boundary.
//!
//! The host owns the run loop, the window and the framebuffer. The bridge only
//! talks to it through [`HostRenderer`]. Implementations in this crate:
//!
//! - [`headless::HeadlessHost`]: in-process RGBA framebuffer, used for tests
//!   and offline rendering
//! - [`crate::ffi::FfiHost`]: a host reached through a table of C function
//!   pointers

use std::any::Any;
use std::sync::Arc;
use crate::callbacks::AdapterRef;
use crate::image::RasterImage;
use crate::pixels::PixelBuffer;

pub mod headless;

/// Where and how large an image is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ImagePlacement {
    /// Top-left corner at `(x, y)`, drawn at the image's own size
    At { x: f32, y: f32 },
    /// Scaled into the rectangle `(x, y, width, height)`
    Sized { x: f32, y: f32, width: f32, height: f32 },
}

impl ImagePlacement {
    pub fn origin(&self) -> (f32, f32) {
        match *self {
            ImagePlacement::At { x, y } | ImagePlacement::Sized { x, y, .. } => (x, y),
        }
    }
}

/// The host's image representation. Opaque to the bridge beyond its size.
///
/// Clones share the same host object; use [`NativeImage::ptr_eq`] to test
/// whether two handles refer to the same one.
#[derive(Clone)]
pub struct NativeImage {
    inner: Arc<NativeImageInner>,
}

struct NativeImageInner {
    width: u32,
    height: u32,
    payload: Box<dyn Any + Send + Sync>,
}

impl NativeImage {
    pub fn new<T: Any + Send + Sync>(width: u32, height: u32, payload: T) -> Self {
        Self {
            inner: Arc::new(NativeImageInner { width, height, payload: Box::new(payload) }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Host-specific data behind the handle, if it is of type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.inner.payload.downcast_ref::<T>()
    }

    pub fn ptr_eq(a: &NativeImage, b: &NativeImage) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Address of the shared host object, used as its identity.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl std::fmt::Debug for NativeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeImage")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .finish()
    }
}

/// Core host interface.
///
/// Control methods may be called from any thread. Callbacks are only ever
/// invoked by the host's own loop, one at a time, through the [`AdapterRef`]
/// handed over in [`HostRenderer::start`].
pub trait HostRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// Begin the run loop, calling back into the sketch through `adapter`.
    ///
    /// Fails if the host is already running or refuses to start. A host that
    /// fails here must not keep `adapter`.
    fn start(&self, adapter: AdapterRef) -> anyhow::Result<()>;

    fn is_running(&self) -> bool;

    fn is_stopped(&self) -> bool;

    /// Ask the loop to stop at its next safe point. Does not wait.
    fn request_exit(&self);

    /// Reason the loop stopped abnormally, if it did.
    fn failure(&self) -> Option<String> {
        None
    }

    /// Current sketch size as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()>;

    /// An owned copy of the framebuffer, `width * height * 4` bytes, row-major.
    fn read_pixels(&self) -> anyhow::Result<Vec<u8>>;

    /// Replace the framebuffer and refresh the displayed pixels. `pixels` is
    /// only valid for the duration of the call; the host copies what it keeps.
    fn write_pixels(&self, pixels: &[u8]) -> anyhow::Result<()>;

    /// Build a host image from a decoded raster.
    fn create_image(&self, raster: &RasterImage) -> anyhow::Result<NativeImage>;

    /// Build a host image from a raw pixel buffer.
    fn create_image_from_pixels(&self, pixels: &PixelBuffer) -> anyhow::Result<NativeImage>;

    fn draw_image(&self, image: &NativeImage, placement: ImagePlacement) -> anyhow::Result<()>;

    /// Use `image` as the texture for subsequent shapes.
    fn texture(&self, image: &NativeImage) -> anyhow::Result<()>;
}
