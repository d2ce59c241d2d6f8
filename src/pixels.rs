//! Pixel buffer marshaling between the host framebuffer and the guest.
//!
//! The host exposes its framebuffer as a linear run of bytes, four per pixel,
//! row-major. The guest sees a [`PixelBuffer`] of shape `(height, width, 4)`.
//! Reads always produce a fresh copy; writes hand the host a borrowed slice it
//! may only use for the duration of the call.

use crate::errors::{BridgeError, Result, Shape};
use crate::host::HostRenderer;

/// Bytes per pixel
pub const CHANNELS: usize = 4;

/// Dense `(height, width, 4)` byte array in the host's channel order.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-filled buffer (fully transparent black).
    pub fn new(height: usize, width: usize) -> Self {
        Self { width, height, data: vec![0; height * width * CHANNELS] }
    }

    /// Buffer where every pixel holds `pixel`.
    pub fn filled(height: usize, width: usize, pixel: [u8; 4]) -> Self {
        let data = pixel.iter().copied().cycle().take(height * width * CHANNELS).collect();
        Self { width, height, data }
    }

    /// Wraps `data` as a `(height, width, 4)` buffer; `data` must hold exactly that many bytes.
    pub fn from_vec(height: usize, width: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != height * width * CHANNELS {
            return Err(BridgeError::ShapeMismatch {
                expected: (height, width, CHANNELS),
                actual: flat_shape(data.len()),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn shape(&self) -> Shape {
        (self.height, self.width, CHANNELS)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<[u8; 4]> {
        let offset = self.offset(row, col)?;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        Some(px)
    }

    /// Returns false when `(row, col)` is outside the buffer.
    pub fn set_pixel(&mut self, row: usize, col: usize, px: [u8; 4]) -> bool {
        match self.offset(row, col) {
            Some(offset) => {
                self.data[offset..offset + CHANNELS].copy_from_slice(&px);
                true
            }
            None => false,
        }
    }

    /// Fills the rectangle `[row0, row1) x [col0, col1)`, clipped to the buffer.
    pub fn fill_region(&mut self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>, px: [u8; 4]) {
        let row_end = rows.end.min(self.height);
        let col_end = cols.end.min(self.width);
        for row in rows.start..row_end {
            for col in cols.start..col_end {
                self.set_pixel(row, col, px);
            }
        }
    }

    /// One row of `width * 4` bytes at a time.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact((self.width * CHANNELS).max(1))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some((row * self.width + col) * CHANNELS)
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("len", &self.data.len())
            .finish()
    }
}

// Shape reported for a byte run that does not divide into the expected grid.
fn flat_shape(len: usize) -> Shape {
    (1, len / CHANNELS, CHANNELS)
}

/// Shape the host currently expects for its framebuffer.
pub(crate) fn host_shape(host: &dyn HostRenderer) -> Shape {
    let (width, height) = host.dimensions();
    (height as usize, width as usize, CHANNELS)
}

/// Copies the host framebuffer into a fresh `(height, width, 4)` buffer.
pub fn read_pixels(host: &dyn HostRenderer) -> Result<PixelBuffer> {
    let (height, width, _) = host_shape(host);
    let bytes = host.read_pixels().map_err(BridgeError::host)?;

    if bytes.len() != height * width * CHANNELS {
        return Err(BridgeError::host(anyhow::anyhow!(
            "host framebuffer holds {} bytes, expected {} for {}x{}",
            bytes.len(),
            height * width * CHANNELS,
            width,
            height
        )));
    }

    Ok(PixelBuffer { width, height, data: bytes })
}

/// Writes `buffer` back to the host and asks it to refresh its displayed pixels.
///
/// The shape is checked before the host is touched, so a mismatch never results
/// in a partial write.
pub fn write_pixels(host: &dyn HostRenderer, buffer: &PixelBuffer) -> Result<()> {
    let expected = host_shape(host);
    if buffer.shape() != expected {
        return Err(BridgeError::ShapeMismatch { expected, actual: buffer.shape() });
    }

    host.write_pixels(buffer.as_bytes()).map_err(BridgeError::host)
}
