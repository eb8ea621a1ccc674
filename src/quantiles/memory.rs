//! Memory-backed updatable sketch: an updatable sketch that keeps its
//! canonical serialized image in a caller-supplied byte region instead of
//! process heap memory, growing that region through an allocator callback
//! when it needs more space.
//!
//! This generalizes the off-heap design (a raw pointer plus a C-style
//! realloc callback) into a safe trait boundary: the region just needs to
//! report its length and support reads/writes at an offset, and growth
//! goes through an explicit, fallible callback rather than an implicit
//! `realloc`.

use crate::common::{Result, SketchError};
use crate::quantiles::codec;
use crate::quantiles::sketch::QuantilesSketch;

/// A byte-addressable region a memory-backed sketch can read and write.
pub trait ByteRegion {
    /// Current length of the region in bytes.
    fn len(&self) -> usize;

    /// `true` if the region holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Writes `buf` starting at `offset`, growing the logical content but
    /// not the underlying capacity (see [`GrowableRegion::grow`]).
    fn write(&mut self, offset: usize, buf: &[u8]);
}

/// A [`ByteRegion`] that can request more space from whatever allocator
/// backs it.
pub trait GrowableRegion: ByteRegion {
    /// Grows the region to at least `new_len` bytes, preserving existing
    /// content. Returns `SketchError::OutOfCapacity` if the allocator
    /// refuses.
    fn grow(&mut self, new_len: usize) -> Result<()>;
}

/// A [`GrowableRegion`] backed by an explicit allocate/release callback
/// pair, mirroring a caller that owns its own memory pool.
pub struct CallbackRegion {
    buffer: Vec<u8>,
    allocate: Box<dyn FnMut(usize) -> Result<Vec<u8>>>,
}

impl CallbackRegion {
    /// Builds a region of `initial_len` bytes, using `allocate` for every
    /// future growth request. `allocate` receives the requested length and
    /// returns a zero-initialized buffer of at least that length, or an
    /// error if it refuses.
    pub fn new(
        initial_len: usize,
        mut allocate: Box<dyn FnMut(usize) -> Result<Vec<u8>>>,
    ) -> Result<Self> {
        let buffer = allocate(initial_len)?;
        Ok(CallbackRegion { buffer, allocate })
    }
}

impl ByteRegion for CallbackRegion {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.buffer[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, buf: &[u8]) {
        self.buffer[offset..offset + buf.len()].copy_from_slice(buf);
    }
}

impl GrowableRegion for CallbackRegion {
    fn grow(&mut self, new_len: usize) -> Result<()> {
        if new_len <= self.buffer.len() {
            return Ok(());
        }
        let mut next = (self.allocate)(new_len)?;
        if next.len() < new_len {
            return Err(SketchError::OutOfCapacity { requested: new_len });
        }
        next[..self.buffer.len()].copy_from_slice(&self.buffer);
        self.buffer = next;
        Ok(())
    }
}

/// An updatable sketch whose canonical image is mirrored into a
/// [`GrowableRegion`] after every mutation.
///
/// The in-process `QuantilesSketch` remains the source of truth for reads;
/// the region exists so a caller can, for instance, persist or
/// memory-map the sketch without going through `serialize()` explicitly.
pub struct MemoryBackedSketch<R: GrowableRegion> {
    sketch: QuantilesSketch,
    region: R,
}

impl<R: GrowableRegion> MemoryBackedSketch<R> {
    /// Creates an empty memory-backed sketch, syncing the initial empty
    /// image into `region` immediately.
    ///
    /// # Errors
    /// Propagates `region`'s growth failure if it cannot hold even the
    /// empty preamble.
    pub fn new(k: u16, region: R) -> Result<Self> {
        let sketch = QuantilesSketch::new(k)?;
        let mut this = MemoryBackedSketch { sketch, region };
        this.sync()?;
        Ok(this)
    }

    /// Feeds one observation in and re-syncs the backing region.
    ///
    /// # Errors
    /// Returns `SketchError::OutOfCapacity` if the region's allocator
    /// refuses to grow to the new required size.
    pub fn update(&mut self, value: f64) -> Result<()> {
        self.sketch.update(value);
        self.sync()
    }

    /// Merges `other` in and re-syncs the backing region.
    ///
    /// # Errors
    /// Propagates `QuantilesSketch::merge`'s errors, plus region growth
    /// failures.
    pub fn merge(&mut self, other: &QuantilesSketch) -> Result<()> {
        use crate::common::Mergeable;
        self.sketch.merge(other)?;
        self.sync()
    }

    /// Read-only access to the live sketch.
    pub fn sketch(&self) -> &QuantilesSketch {
        &self.sketch
    }

    fn sync(&mut self) -> Result<()> {
        let bytes = codec::to_bytes(&self.sketch, false, false);
        if bytes.len() > self.region.len() {
            self.region.grow(bytes.len())?;
        }
        self.region.write(0, &bytes);
        Ok(())
    }
}
