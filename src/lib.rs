//! Bridge between guest-defined sketch callbacks and an external host renderer.
//!
//! A guest registers `settings`, `setup`, `draw` and input callbacks into a
//! [`CallbackSet`]; a [`Sketch`] hands them to a [`HostRenderer`] that owns the
//! run loop. Callbacks reach back into the bridge through a [`SketchContext`]
//! to read and write the framebuffer and to draw images.

pub mod anchor;
pub mod callbacks;
pub mod config;
pub mod errors;
pub mod event;
pub mod ffi;
pub mod host;
pub mod image;
pub mod json;
pub mod pixels;
pub mod sketch;

pub use callbacks::{AdapterRef, Callback, CallbackAdapter, CallbackSet, DefineFn, ProfileStats, SketchDefinition};
pub use config::SketchConfig;
pub use errors::{BridgeError, Result};
pub use event::{EventArg, KeyEvent, Modifiers, MouseButton, MouseEvent, SketchEvent};
pub use host::headless::HeadlessHost;
pub use host::{HostRenderer, ImagePlacement, NativeImage};
pub use image::{ImageSource, RasterImage, SvgImage};
pub use pixels::PixelBuffer;
pub use sketch::{Sketch, SketchContext, SketchHandle, SketchId, SketchState};
