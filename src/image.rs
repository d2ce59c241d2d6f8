//! Guest-side image sources and the codecs that feed them.
//!
//! Anything a sketch wants to draw is wrapped in an [`ImageSource`]. The
//! source's identity (not its content) is what the [`cache::ImageCache`] keys
//! on, so keep the same `ImageSource` (or a clone of it) around between frames
//! to benefit from caching.
//!
//! Raster files are decoded with the PNG codec. SVG documents are rasterized
//! once at their intrinsic size.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Weak};
use crate::errors::{BridgeError, Result};
use crate::host::NativeImage;
use crate::pixels::{PixelBuffer, CHANNELS};

pub mod cache;

/// Decoded raster with straight (non-premultiplied) RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(BridgeError::Conversion(format!(
                "raster of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Image of the given size where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let len = width as usize * height as usize * CHANNELS;
        let pixels = color.iter().copied().cycle().take(len).collect();
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[offset..offset + CHANNELS]);
        Some(px)
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn to_pixel_buffer(&self) -> PixelBuffer {
        // Length was checked on construction, the shape always matches.
        PixelBuffer::from_vec(self.height as usize, self.width as usize, self.pixels.clone())
            .unwrap_or_else(|_| PixelBuffer::new(self.height as usize, self.width as usize))
    }

    pub fn from_pixel_buffer(buffer: &PixelBuffer) -> Self {
        Self {
            width: buffer.width() as u32,
            height: buffer.height() as u32,
            pixels: buffer.as_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.pixels.len())
            .finish()
    }
}

/// A parsed SVG document, kept as markup until it is rasterized.
#[derive(Clone)]
pub struct SvgImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl SvgImage {
    /// Parses `data` as SVG markup. Fails with a conversion error when the
    /// document is malformed or has no area.
    pub fn from_data(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let tree = parse_svg(&data).map_err(BridgeError::Conversion)?;
        let size = tree.size().to_int_size();
        if size.width() == 0 || size.height() == 0 {
            return Err(BridgeError::Conversion("svg document has an empty size".into()));
        }
        Ok(Self { data, width: size.width(), height: size.height() })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Renders the document at its intrinsic size.
    pub fn rasterize(&self) -> Result<RasterImage> {
        rasterize_svg(&self.data).map_err(BridgeError::Conversion)
    }
}

impl std::fmt::Debug for SvgImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvgImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Anything a sketch can hand to `image()` or `texture()`.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// A guest pixel array
    Pixels(Arc<PixelBuffer>),
    /// A decoded raster (e.g. from [`load_image`])
    Raster(Arc<RasterImage>),
    /// Vector markup, rasterized on conversion
    Svg(Arc<SvgImage>),
    /// Encoded PNG bytes held in memory
    Encoded(Arc<Vec<u8>>),
    /// Already a host image; passed through untouched
    Native(NativeImage),
}

/// Key derived from the identity of an image source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdentityKey(usize);

impl ImageSource {
    pub fn identity(&self) -> IdentityKey {
        let ptr = match self {
            ImageSource::Pixels(p) => Arc::as_ptr(p) as *const () as usize,
            ImageSource::Raster(r) => Arc::as_ptr(r) as *const () as usize,
            ImageSource::Svg(s) => Arc::as_ptr(s) as *const () as usize,
            ImageSource::Encoded(e) => Arc::as_ptr(e) as *const () as usize,
            ImageSource::Native(n) => n.identity(),
        };
        IdentityKey(ptr)
    }

    pub(crate) fn downgrade(&self) -> Option<WeakSource> {
        match self {
            ImageSource::Pixels(p) => Some(WeakSource::Pixels(Arc::downgrade(p))),
            ImageSource::Raster(r) => Some(WeakSource::Raster(Arc::downgrade(r))),
            ImageSource::Svg(s) => Some(WeakSource::Svg(Arc::downgrade(s))),
            ImageSource::Encoded(e) => Some(WeakSource::Encoded(Arc::downgrade(e))),
            ImageSource::Native(_) => None,
        }
    }
}

impl From<PixelBuffer> for ImageSource {
    fn from(p: PixelBuffer) -> Self {
        ImageSource::Pixels(Arc::new(p))
    }
}

impl From<RasterImage> for ImageSource {
    fn from(r: RasterImage) -> Self {
        ImageSource::Raster(Arc::new(r))
    }
}

impl From<SvgImage> for ImageSource {
    fn from(s: SvgImage) -> Self {
        ImageSource::Svg(Arc::new(s))
    }
}

impl From<NativeImage> for ImageSource {
    fn from(n: NativeImage) -> Self {
        ImageSource::Native(n)
    }
}

/// Non-owning reference to a cached source. A cache entry only counts as a hit
/// while the source it was made from is still alive; entries whose source died
/// are pruned.
pub(crate) enum WeakSource {
    Pixels(Weak<PixelBuffer>),
    Raster(Weak<RasterImage>),
    Svg(Weak<SvgImage>),
    Encoded(Weak<Vec<u8>>),
}

impl WeakSource {
    pub(crate) fn is_alive(&self) -> bool {
        match self {
            WeakSource::Pixels(w) => w.strong_count() > 0,
            WeakSource::Raster(w) => w.strong_count() > 0,
            WeakSource::Svg(w) => w.strong_count() > 0,
            WeakSource::Encoded(w) => w.strong_count() > 0,
        }
    }

    pub(crate) fn refers_to(&self, source: &ImageSource) -> bool {
        match (self, source) {
            (WeakSource::Pixels(w), ImageSource::Pixels(s)) => w.strong_count() > 0 && std::ptr::eq(w.as_ptr(), Arc::as_ptr(s)),
            (WeakSource::Raster(w), ImageSource::Raster(s)) => w.strong_count() > 0 && std::ptr::eq(w.as_ptr(), Arc::as_ptr(s)),
            (WeakSource::Svg(w), ImageSource::Svg(s)) => w.strong_count() > 0 && std::ptr::eq(w.as_ptr(), Arc::as_ptr(s)),
            (WeakSource::Encoded(w), ImageSource::Encoded(s)) => w.strong_count() > 0 && std::ptr::eq(w.as_ptr(), Arc::as_ptr(s)),
            _ => false,
        }
    }
}

/// Loads an image file. `.svg` files are rasterized, everything else is
/// decoded as a raster.
pub fn load_image(path: impl AsRef<Path>) -> Result<RasterImage> {
    let path = path.as_ref();
    let decode_err = |message: String| BridgeError::Decode { path: path.to_path_buf(), message };

    let is_svg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("svg"))
        .unwrap_or(false);

    if is_svg {
        let mut data = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut data))
            .map_err(|e| decode_err(e.to_string()))?;
        return rasterize_svg(&data).map_err(decode_err);
    }

    let file = File::open(path).map_err(|e| decode_err(e.to_string()))?;
    decode_png(BufReader::new(file)).map_err(decode_err)
}

/// Decodes PNG bytes held in memory.
pub fn decode_png_bytes(bytes: &[u8]) -> Result<RasterImage> {
    decode_png(Cursor::new(bytes)).map_err(BridgeError::Conversion)
}

/// Writes `raster` as an RGBA8 PNG file.
pub fn save_png(raster: &RasterImage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let encode_err = |e: png::EncodingError| BridgeError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let file = File::create(path).map_err(|e| BridgeError::io(path, e))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), raster.width(), raster.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header().map_err(encode_err)?;
    writer.write_image_data(raster.pixels()).map_err(encode_err)?;
    writer.finish().map_err(encode_err)?;
    Ok(())
}

fn decode_png<R: Read>(reader: R) -> std::result::Result<RasterImage, String> {
    let mut decoder = png::Decoder::new(reader);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

    let mut reader = decoder.read_info().map_err(|e| e.to_string())?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(|e| e.to_string())?;
    buf.truncate(info.buffer_size());

    let pixel_count = info.width as usize * info.height as usize;
    let pixels = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        png::ColorType::Indexed => return Err("indexed png was not expanded".to_string()),
    };

    if pixels.len() != pixel_count * CHANNELS {
        return Err(format!("unexpected png data length {}", pixels.len()));
    }

    Ok(RasterImage { width: info.width, height: info.height, pixels })
}

fn parse_svg(data: &[u8]) -> std::result::Result<resvg::usvg::Tree, String> {
    let options = resvg::usvg::Options::default();
    resvg::usvg::Tree::from_data(data, &options).map_err(|e| e.to_string())
}

fn rasterize_svg(data: &[u8]) -> std::result::Result<RasterImage, String> {
    let tree = parse_svg(data)?;
    let size = tree.size().to_int_size();

    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| format!("cannot allocate {}x{} pixmap", size.width(), size.height()))?;
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // The pixmap is premultiplied; rasters handed to the host are straight alpha.
    let pixels = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();

    Ok(RasterImage { width: size.width(), height: size.height(), pixels })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="6">
        <rect x="0" y="0" width="8" height="6" fill="#ff0000"/>
    </svg>"##;

    fn write_png(dir: &Path, name: &str, raster: &RasterImage) -> std::path::PathBuf {
        let path = dir.join(name);
        save_png(raster, &path).unwrap();
        path
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let mut pixels = Vec::new();
        for i in 0..(3 * 2) {
            pixels.extend_from_slice(&[i as u8 * 10, 20, 30, 255 - i as u8]);
        }
        let raster = RasterImage::new(3, 2, pixels).unwrap();
        let path = write_png(dir.path(), "frame.png", &raster);

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded, raster);
    }

    #[test]
    fn svg_suffix_is_rasterized_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.SVG");
        std::fs::write(&path, SQUARE_SVG).unwrap();

        let raster = load_image(&path).unwrap();
        assert_eq!((raster.width(), raster.height()), (8, 6));
        assert_eq!(raster.pixel(4, 3), Some([255, 0, 0, 255]));
    }

    #[test]
    fn missing_file_is_a_decode_error_naming_the_path() {
        let err = load_image("/no/such/image.png").unwrap_err();
        match err {
            BridgeError::Decode { path, .. } => assert!(path.ends_with("image.png")),
            other => panic!("expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_raster_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_image(&path), Err(BridgeError::Decode { .. })));

        let svg_path = dir.path().join("broken.svg");
        std::fs::write(&svg_path, b"<svg").unwrap();
        assert!(matches!(load_image(&svg_path), Err(BridgeError::Decode { .. })));
    }

    #[test]
    fn svg_image_keeps_intrinsic_size() {
        let svg = SvgImage::from_data(SQUARE_SVG).unwrap();
        assert_eq!((svg.width(), svg.height()), (8, 6));
        let raster = svg.rasterize().unwrap();
        assert_eq!(raster.pixels().len(), 8 * 6 * 4);
    }

    #[test]
    fn encoded_bytes_decode_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let raster = RasterImage::filled(2, 2, [1, 2, 3, 4]);
        let path = write_png(dir.path(), "tiny.png", &raster);
        let bytes = std::fs::read(path).unwrap();

        assert_eq!(decode_png_bytes(&bytes).unwrap(), raster);
        assert!(matches!(decode_png_bytes(b"nope"), Err(BridgeError::Conversion(_))));
    }

    #[test]
    fn identity_follows_the_arc_not_the_value() {
        let a = ImageSource::from(PixelBuffer::new(2, 2));
        let b = ImageSource::from(PixelBuffer::new(2, 2));
        let a2 = a.clone();

        assert_eq!(a.identity(), a2.identity());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn weak_source_stops_matching_once_dropped() {
        let source = ImageSource::from(RasterImage::filled(1, 1, [0; 4]));
        let weak = source.downgrade().unwrap();
        assert!(weak.refers_to(&source));

        let other = ImageSource::from(RasterImage::filled(1, 1, [0; 4]));
        assert!(!weak.refers_to(&other));
    }

    #[test]
    fn raster_and_pixel_buffer_convert_both_ways() {
        let mut buffer = PixelBuffer::new(2, 3);
        buffer.set_pixel(1, 2, [5, 6, 7, 8]);
        let raster = RasterImage::from_pixel_buffer(&buffer);
        assert_eq!((raster.width(), raster.height()), (3, 2));
        assert_eq!(raster.pixel(2, 1), Some([5, 6, 7, 8]));
        assert_eq!(raster.to_pixel_buffer(), buffer);
    }
}
