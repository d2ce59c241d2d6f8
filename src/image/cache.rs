use std::num::NonZeroUsize;
use lru::LruCache;
use crate::errors::{BridgeError, Result};
use crate::host::{HostRenderer, NativeImage};
use crate::image::{decode_png_bytes, IdentityKey, ImageSource, WeakSource};

struct CacheEntry {
    source: WeakSource,
    image: NativeImage,
}

/// Converted host images keyed by the identity of the source they came from.
///
/// An entry lives as long as its source does. Without a capacity that is the
/// only bound; with one, the least recently resolved entry is evicted first.
pub struct ImageCache {
    entries: LruCache<IdentityKey, CacheEntry>,
    conversions: u64,
}

impl ImageCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { entries, conversions: 0 }
    }

    /// Returns the host image for `source`.
    ///
    /// With `cache` set, a source whose identity was resolved before (and is
    /// still alive) returns the same [`NativeImage`] without converting again;
    /// otherwise the result is stored for next time. Without `cache`, the
    /// cache is neither read nor written. Entries of dropped sources are
    /// pruned first.
    pub fn resolve(
        &mut self,
        host: &dyn HostRenderer,
        source: &ImageSource,
        cache: bool,
    ) -> Result<NativeImage> {
        if let ImageSource::Native(image) = source {
            return Ok(image.clone());
        }

        self.prune();
        let key = source.identity();

        if cache {
            if let Some(entry) = self.entries.get(&key) {
                if entry.source.refers_to(source) {
                    log::debug!("image cache hit for {:?}", key);
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.convert(host, source)?;

        if cache {
            if let Some(weak) = source.downgrade() {
                if let Some((evicted, _)) = self.entries.push(key, CacheEntry { source: weak, image: image.clone() }) {
                    if evicted != key {
                        log::debug!("image cache evicted {:?}", evicted);
                    }
                }
            }
        }

        Ok(image)
    }

    /// Drops entries whose source no longer exists, releasing their host images.
    pub fn prune(&mut self) -> usize {
        let dead: Vec<IdentityKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.source.is_alive())
            .map(|(key, _)| *key)
            .collect();

        for key in &dead {
            self.entries.pop(key);
        }
        if !dead.is_empty() {
            log::debug!("image cache pruned {} dead entries", dead.len());
        }
        dead.len()
    }

    fn convert(&mut self, host: &dyn HostRenderer, source: &ImageSource) -> Result<NativeImage> {
        let image = match source {
            ImageSource::Pixels(buffer) => {
                if buffer.is_empty() {
                    return Err(BridgeError::Conversion("pixel buffer is empty".into()));
                }
                host.create_image_from_pixels(buffer)
            }
            ImageSource::Raster(raster) => host.create_image(raster),
            ImageSource::Svg(svg) => host.create_image(&svg.rasterize()?),
            ImageSource::Encoded(bytes) => host.create_image(&decode_png_bytes(bytes)?),
            ImageSource::Native(image) => return Ok(image.clone()),
        }
        .map_err(BridgeError::host)?;

        self.conversions += 1;
        Ok(image)
    }

    pub fn contains(&self, source: &ImageSource) -> bool {
        self.entries
            .peek(&source.identity())
            .map(|entry| entry.source.refers_to(source))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        if self.entries.cap().get() == usize::MAX {
            None
        } else {
            Some(self.entries.cap())
        }
    }

    /// Number of conversions performed, cached or not.
    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
