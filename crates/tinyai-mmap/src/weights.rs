//! Shared, aligned layer buffers.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Heap copy of a layer blob whose first byte sits on a requested alignment.
pub(crate) struct AlignedBuf {
    storage: Vec<u8>,
    start: usize,
    len: usize,
}

impl AlignedBuf {
    pub(crate) fn copy_from(src: &[u8], alignment: usize) -> Self {
        let alignment = alignment.max(1);
        // Capacity covers the padding, so neither push below reallocates.
        let mut storage: Vec<u8> = Vec::with_capacity(src.len() + alignment - 1);
        let start = match storage.as_ptr().align_offset(alignment) {
            off if off < alignment => off,
            _ => 0,
        };
        storage.resize(start, 0);
        storage.extend_from_slice(src);
        Self { storage, start, len: src.len() }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.len]
    }
}

/// Read-only view of one cached layer.
///
/// Cloning is cheap. While any view of a layer is alive the store treats
/// that layer as pinned and will not evict it; the bytes stay valid even if
/// the layer is explicitly released in the meantime.
#[derive(Clone)]
pub struct LayerWeights {
    index: usize,
    buf: Arc<AlignedBuf>,
}

impl LayerWeights {
    /// Copy `bytes` into a standalone view. Stores that do not cache through
    /// [`crate::MappedModel`] use this to hand out weights.
    pub fn new(index: usize, bytes: &[u8], alignment: usize) -> Self {
        Self { index, buf: Arc::new(AlignedBuf::copy_from(bytes, alignment)) }
    }

    pub(crate) fn from_shared(index: usize, buf: Arc<AlignedBuf>) -> Self {
        Self { index, buf }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// `true` if both views share one buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }
}

impl Deref for LayerWeights {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for LayerWeights {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for LayerWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerWeights")
            .field("index", &self.index)
            .field("len", &self.buf.len)
            .finish()
    }
}
