//! C ABI for hosts implemented outside Rust.
//!
//! A native renderer describes itself with a [`HostVTable`]. The bridge wraps
//! it as an [`FfiHost`] and, on start, hands the renderer an owned
//! [`SketchAdapterHandle`]. The renderer drives callbacks with
//! [`sketch_bridge_dispatch`] and frees the handle with
//! [`sketch_bridge_adapter_free`] once its loop has ended.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use anyhow::{anyhow, bail};
use crate::callbacks::AdapterRef;
use crate::errors::BridgeError;
use crate::event::{EventArg, KeyEvent, Modifiers, MouseButton, MouseEvent, SketchEvent};
use crate::host::{HostRenderer, ImagePlacement, NativeImage};
use crate::image::RasterImage;
use crate::pixels::PixelBuffer;

/// The callback ran
pub const SKETCH_BRIDGE_CALLED: i32 = 1;
/// The sketch does not define the event
pub const SKETCH_BRIDGE_UNDEFINED: i32 = 0;
/// The callback returned an error or panicked
pub const SKETCH_BRIDGE_CALLBACK_FAILED: i32 = -1;
/// The sketch is gone; stop calling
pub const SKETCH_BRIDGE_RELEASED: i32 = -2;
/// Null handle, unknown event code or malformed argument
pub const SKETCH_BRIDGE_INVALID: i32 = -3;

#[repr(C)]
pub struct SketchAdapterHandle(*mut AdapterRef);

impl SketchAdapterHandle {
    fn new(adapter: AdapterRef) -> Self {
        SketchAdapterHandle(Box::into_raw(Box::new(adapter)))
    }

    pub fn null() -> Self {
        SketchAdapterHandle(std::ptr::null_mut())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

pub const FFI_ARG_NONE: u32 = 0;
pub const FFI_ARG_KEY: u32 = 1;
pub const FFI_ARG_MOUSE: u32 = 2;

/// Key or mouse payload as a flat C struct. `kind` selects which fields apply.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FfiEventArg {
    pub kind: u32,
    /// Unicode scalar value of the key, 0 for none
    pub key: u32,
    pub key_code: u32,
    pub x: f32,
    pub y: f32,
    /// 0 none, 1 left, 2 middle, 3 right
    pub button: u32,
    pub wheel: f32,
    pub modifiers: u8,
}

impl FfiEventArg {
    fn to_event_arg(self) -> Result<Option<EventArg>, String> {
        let modifiers = Modifiers::from_bits_truncate(self.modifiers);
        match self.kind {
            FFI_ARG_NONE => Ok(None),
            FFI_ARG_KEY => Ok(Some(EventArg::Key(KeyEvent {
                key: char::from_u32(self.key).filter(|c| *c != '\0'),
                code: self.key_code,
                modifiers,
            }))),
            FFI_ARG_MOUSE => {
                let button = match self.button {
                    0 => None,
                    1 => Some(MouseButton::Left),
                    2 => Some(MouseButton::Middle),
                    3 => Some(MouseButton::Right),
                    other => return Err(format!("unknown mouse button {}", other)),
                };
                Ok(Some(EventArg::Mouse(MouseEvent { x: self.x, y: self.y, button, wheel: self.wheel, modifiers })))
            }
            other => Err(format!("unknown argument kind {}", other)),
        }
    }
}

/// Function table a native renderer fills in. Every function receives
/// `user_data` as its first argument.
///
/// `start` takes ownership of the adapter handle when it returns true; on
/// false the bridge frees it. Image ids are chosen by the host, 0 meaning
/// failure.
#[repr(C)]
pub struct HostVTable {
    pub user_data: *mut c_void,
    pub start: extern "C" fn(*mut c_void, SketchAdapterHandle) -> bool,
    pub is_running: extern "C" fn(*mut c_void) -> bool,
    pub is_stopped: extern "C" fn(*mut c_void) -> bool,
    pub request_exit: extern "C" fn(*mut c_void),
    pub width: extern "C" fn(*mut c_void) -> u32,
    pub height: extern "C" fn(*mut c_void) -> u32,
    pub resize: extern "C" fn(*mut c_void, u32, u32) -> bool,
    /// Copies at most `len` framebuffer bytes into `out`, returning the count
    pub read_pixels: extern "C" fn(*mut c_void, *mut u8, usize) -> usize,
    /// `pixels` is only valid for the duration of the call
    pub write_pixels: extern "C" fn(*mut c_void, *const u8, usize) -> bool,
    /// Straight RGBA8, `width * height * 4` bytes
    pub create_image: extern "C" fn(*mut c_void, *const u8, u32, u32) -> u64,
    pub draw_image: extern "C" fn(*mut c_void, u64, f32, f32, f32, f32) -> bool,
    pub texture: extern "C" fn(*mut c_void, u64) -> bool,
    pub release_image: Option<extern "C" fn(*mut c_void, u64)>,
}

/// A [`HostRenderer`] backed by a [`HostVTable`].
pub struct FfiHost {
    name: String,
    vtable: HostVTable,
}

// The vtable contract requires every function to be callable from any thread.
unsafe impl Send for FfiHost {}
unsafe impl Sync for FfiHost {}

struct FfiImage {
    id: u64,
    user_data: *mut c_void,
    release: Option<extern "C" fn(*mut c_void, u64)>,
}

unsafe impl Send for FfiImage {}
unsafe impl Sync for FfiImage {}

impl Drop for FfiImage {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            release(self.user_data, self.id);
        }
    }
}

impl FfiHost {
    /// # Safety
    ///
    /// `vtable.user_data` must stay valid for the life of the returned host,
    /// and every function in the table must be safe to call from any thread
    /// with that pointer.
    pub unsafe fn new(name: impl Into<String>, vtable: HostVTable) -> Self {
        Self { name: name.into(), vtable }
    }

    fn user_data(&self) -> *mut c_void {
        self.vtable.user_data
    }

    fn image_id(&self, image: &NativeImage) -> anyhow::Result<u64> {
        image
            .payload::<FfiImage>()
            .map(|img| img.id)
            .ok_or_else(|| anyhow!("image was not created by host '{}'", self.name))
    }

    fn wrap_image(&self, pixels: &[u8], width: u32, height: u32) -> anyhow::Result<NativeImage> {
        let id = (self.vtable.create_image)(self.user_data(), pixels.as_ptr(), width, height);
        if id == 0 {
            bail!("host '{}' could not create a {}x{} image", self.name, width, height);
        }
        Ok(NativeImage::new(
            width,
            height,
            FfiImage { id, user_data: self.user_data(), release: self.vtable.release_image },
        ))
    }
}

impl HostRenderer for FfiHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, adapter: AdapterRef) -> anyhow::Result<()> {
        let handle = SketchAdapterHandle::new(adapter);
        let raw = handle.0;
        if !(self.vtable.start)(self.user_data(), handle) {
            // a refusing host does not keep the handle
            unsafe { sketch_bridge_adapter_free(SketchAdapterHandle(raw)) };
            bail!("host '{}' refused to start", self.name);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        (self.vtable.is_running)(self.user_data())
    }

    fn is_stopped(&self) -> bool {
        (self.vtable.is_stopped)(self.user_data())
    }

    fn request_exit(&self) {
        (self.vtable.request_exit)(self.user_data())
    }

    fn dimensions(&self) -> (u32, u32) {
        ((self.vtable.width)(self.user_data()), (self.vtable.height)(self.user_data()))
    }

    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()> {
        if !(self.vtable.resize)(self.user_data(), width, height) {
            bail!("host '{}' could not resize to {}x{}", self.name, width, height);
        }
        Ok(())
    }

    fn read_pixels(&self) -> anyhow::Result<Vec<u8>> {
        let (width, height) = self.dimensions();
        let mut out = vec![0u8; width as usize * height as usize * 4];
        let written = (self.vtable.read_pixels)(self.user_data(), out.as_mut_ptr(), out.len());
        if written > out.len() {
            bail!("host '{}' reported {} bytes for a {} byte buffer", self.name, written, out.len());
        }
        out.truncate(written);
        Ok(out)
    }

    fn write_pixels(&self, pixels: &[u8]) -> anyhow::Result<()> {
        if !(self.vtable.write_pixels)(self.user_data(), pixels.as_ptr(), pixels.len()) {
            bail!("host '{}' rejected the pixel write", self.name);
        }
        Ok(())
    }

    fn create_image(&self, raster: &RasterImage) -> anyhow::Result<NativeImage> {
        self.wrap_image(raster.pixels(), raster.width(), raster.height())
    }

    fn create_image_from_pixels(&self, pixels: &PixelBuffer) -> anyhow::Result<NativeImage> {
        self.wrap_image(pixels.as_bytes(), pixels.width() as u32, pixels.height() as u32)
    }

    fn draw_image(&self, image: &NativeImage, placement: ImagePlacement) -> anyhow::Result<()> {
        let id = self.image_id(image)?;
        let (x, y, w, h) = match placement {
            ImagePlacement::At { x, y } => (x, y, image.width() as f32, image.height() as f32),
            ImagePlacement::Sized { x, y, width, height } => (x, y, width, height),
        };
        if !(self.vtable.draw_image)(self.user_data(), id, x, y, w, h) {
            bail!("host '{}' could not draw image {}", self.name, id);
        }
        Ok(())
    }

    fn texture(&self, image: &NativeImage) -> anyhow::Result<()> {
        let id = self.image_id(image)?;
        if !(self.vtable.texture)(self.user_data(), id) {
            bail!("host '{}' could not use image {} as texture", self.name, id);
        }
        Ok(())
    }
}

fn adapter_ref<'a>(handle: &'a SketchAdapterHandle) -> Option<&'a AdapterRef> {
    if handle.0.is_null() {
        return None;
    }
    Some(unsafe { &*handle.0 })
}

/// Invokes the callback for `event_code` (see [`SketchEvent::code`]).
///
/// `arg` may be null. Returns one of the `SKETCH_BRIDGE_*` status codes.
///
/// # Safety
///
/// `handle` must be null or the handle passed to the host's `start` and not
/// yet freed with [`sketch_bridge_adapter_free`]. A non-null `arg` must point
/// to a valid [`FfiEventArg`] for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn sketch_bridge_dispatch(handle: &SketchAdapterHandle, event_code: u32, arg: *const FfiEventArg) -> i32 {
    let Some(adapter) = adapter_ref(handle) else {
        return SKETCH_BRIDGE_INVALID;
    };
    let Some(event) = SketchEvent::from_code(event_code) else {
        log::warn!("dispatch with unknown event code {}", event_code);
        return SKETCH_BRIDGE_INVALID;
    };

    let arg = if arg.is_null() { FfiEventArg::default() } else { unsafe { *arg } };
    let arg = match arg.to_event_arg() {
        Ok(arg) => arg,
        Err(msg) => {
            log::warn!("dispatch of '{}': {}", event, msg);
            return SKETCH_BRIDGE_INVALID;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| adapter.invoke(event, arg.as_ref())));
    match outcome {
        Ok(Ok(true)) => SKETCH_BRIDGE_CALLED,
        Ok(Ok(false)) => SKETCH_BRIDGE_UNDEFINED,
        Ok(Err(BridgeError::AdapterReleased)) => SKETCH_BRIDGE_RELEASED,
        Ok(Err(err)) => {
            log::error!("{}", err);
            SKETCH_BRIDGE_CALLBACK_FAILED
        }
        Err(_) => {
            log::error!("callback '{}' panicked", event);
            SKETCH_BRIDGE_CALLBACK_FAILED
        }
    }
}

/// 1 if the sketch defines the event, 0 if not, or a negative status code.
///
/// # Safety
///
/// `handle` must be null or a live handle, as for [`sketch_bridge_dispatch`].
#[no_mangle]
pub unsafe extern "C" fn sketch_bridge_is_defined(handle: &SketchAdapterHandle, event_code: u32) -> i32 {
    let (Some(adapter), Some(event)) = (adapter_ref(handle), SketchEvent::from_code(event_code)) else {
        return SKETCH_BRIDGE_INVALID;
    };
    match adapter.is_defined(event) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(_) => SKETCH_BRIDGE_RELEASED,
    }
}

/// Frees a handle received by the host's `start`.
///
/// # Safety
///
/// `handle` must be null or a handle that was not freed before. It must not
/// be used after this call.
#[no_mangle]
pub unsafe extern "C" fn sketch_bridge_adapter_free(handle: SketchAdapterHandle) {
    if !handle.0.is_null() {
        unsafe {
            let _ = Box::from_raw(handle.0);
        }
    }
}
