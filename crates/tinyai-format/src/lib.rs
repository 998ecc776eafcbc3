//! TMAI model file layout.
//!
//! A TMAI file is a fixed 256-byte header, a table of 32-byte layer
//! descriptors starting at byte 256, then the weight blobs at whatever
//! offsets the descriptors name. Every integer is little-endian.
//!
//! This crate only parses and validates the layout; it never interprets
//! weight bytes. [`TmaiBuilder`] writes well-formed files for tests and
//! tooling.
//!
//! # Example
//!
//! ```no_run
//! use tinyai_format::parse_layout;
//!
//! let data = std::fs::read("model.tmai").unwrap();
//! let layout = parse_layout(&data).unwrap();
//! for layer in &layout.layers {
//!     println!("layer {} at {:#x}, {} bytes", layer.index, layer.offset, layer.size);
//! }
//! ```

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tinyai_common::{Result, TinyAiError};

mod writer;

pub use writer::TmaiBuilder;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// `"TMAI"` read as a little-endian u32.
pub const TMAI_MAGIC: u32 = 0x544D_4149;
/// Size of the fixed file header.
pub const HEADER_SIZE: usize = 256;
/// Size of one layer descriptor.
pub const DESCRIPTOR_SIZE: usize = 32;
/// Largest layer count a file may declare.
pub const MAX_LAYERS: usize = 256;
/// Width of the NUL-padded model name field.
pub const MODEL_NAME_LEN: usize = 64;
/// Width of the optional layer name field inside a descriptor.
pub const LAYER_NAME_LEN: usize = 20;

const NAME_OFFSET: usize = 16;
const LAYER_NAME_OFFSET: usize = 12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Bit width tag of a layer's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Precision(pub u32);

impl Precision {
    pub const INT4: Self = Self(4);
    pub const INT8: Self = Self(8);
    pub const FP16: Self = Self(16);
    pub const FP32: Self = Self(32);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// 4- and 8-bit layers hold quantized weights.
    pub const fn is_quantized(self) -> bool {
        matches!(self.0, 4 | 8)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.0)
    }
}

/// Parsed fixed header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHeader {
    pub version: u32,
    pub layer_count: usize,
    pub name: String,
}

impl ModelHeader {
    /// First byte past the descriptor table.
    pub fn table_end(&self) -> usize {
        HEADER_SIZE + self.layer_count * DESCRIPTOR_SIZE
    }
}

/// Immutable description of one layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub index: usize,
    /// Byte offset from the start of the file.
    pub offset: usize,
    pub size: usize,
    pub precision: Precision,
    pub name: Option<String>,
}

impl LayerDescriptor {
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.size)
    }

    /// Byte range of the blob within the file.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Header plus validated descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    pub header: ModelHeader,
    pub layers: Vec<LayerDescriptor>,
}

impl ModelLayout {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Sum of all blob sizes.
    pub fn total_size(&self) -> usize {
        self.layers.iter().map(|l| l.size).sum()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// NUL-terminated, lossily decoded string. `None` when the field is empty.
fn read_name(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// Returns `true` if `data` starts with the TMAI magic.
#[inline]
pub fn check_magic(data: &[u8]) -> bool {
    data.get(0..4) == Some(&TMAI_MAGIC.to_le_bytes()[..])
}

/// Parse the fixed 256-byte header.
pub fn parse_header(data: &[u8]) -> Result<ModelHeader> {
    if data.len() < HEADER_SIZE {
        return Err(TinyAiError::InvalidFormat(format!(
            "file is {} bytes, smaller than the {HEADER_SIZE}-byte header",
            data.len()
        )));
    }
    if !check_magic(data) {
        return Err(TinyAiError::InvalidFormat(format!(
            "bad magic {:#010x} (expected {TMAI_MAGIC:#010x})",
            read_u32(data, 0)
        )));
    }

    let version = read_u32(data, 4);
    let layer_count = read_u32(data, 8) as usize;
    if layer_count > MAX_LAYERS {
        return Err(TinyAiError::TooManyLayers { count: layer_count, max: MAX_LAYERS });
    }
    let name = read_name(&data[NAME_OFFSET..NAME_OFFSET + MODEL_NAME_LEN]).unwrap_or_default();

    Ok(ModelHeader { version, layer_count, name })
}

/// Parse the descriptor table that follows `header`.
///
/// Blob ranges are not checked here; see [`validate_layers`].
pub fn parse_descriptors(data: &[u8], header: &ModelHeader) -> Result<Vec<LayerDescriptor>> {
    let table_end = header.table_end();
    if data.len() < table_end {
        return Err(TinyAiError::InvalidFormat(format!(
            "descriptor table for {} layers ends at byte {table_end}, file is {} bytes",
            header.layer_count,
            data.len()
        )));
    }

    let layers = (0..header.layer_count)
        .map(|index| {
            let base = HEADER_SIZE + index * DESCRIPTOR_SIZE;
            let raw = &data[base..base + DESCRIPTOR_SIZE];
            LayerDescriptor {
                index,
                offset: read_u32(raw, 0) as usize,
                size: read_u32(raw, 4) as usize,
                precision: Precision(read_u32(raw, 8)),
                name: read_name(&raw[LAYER_NAME_OFFSET..LAYER_NAME_OFFSET + LAYER_NAME_LEN]),
            }
        })
        .collect();
    Ok(layers)
}

/// Reject blobs that leave the file, sit on top of the header or the
/// descriptor table, or overlap each other. Zero-sized blobs never overlap.
pub fn validate_layers(
    layers: &[LayerDescriptor],
    table_end: usize,
    file_len: usize,
) -> Result<()> {
    for layer in layers {
        if layer.end() > file_len {
            return Err(TinyAiError::InvalidFormat(format!(
                "layer {} range {:?} runs past end of file ({file_len} bytes)",
                layer.index,
                layer.range()
            )));
        }
        if layer.size > 0 && layer.offset < table_end {
            return Err(TinyAiError::InvalidFormat(format!(
                "layer {} starts at {} inside the header/descriptor area (ends at {table_end})",
                layer.index, layer.offset
            )));
        }
    }

    let mut spans: Vec<&LayerDescriptor> = layers.iter().filter(|l| l.size > 0).collect();
    spans.sort_by_key(|l| (l.offset, l.index));
    for pair in spans.windows(2) {
        if pair[1].offset < pair[0].end() {
            return Err(TinyAiError::InvalidFormat(format!(
                "layers {} and {} overlap ({:?} vs {:?})",
                pair[0].index,
                pair[1].index,
                pair[0].range(),
                pair[1].range()
            )));
        }
    }
    Ok(())
}

/// Parse and validate a whole file image.
pub fn parse_layout(data: &[u8]) -> Result<ModelLayout> {
    let header = parse_header(data)?;
    let layers = parse_descriptors(data, &header)?;
    validate_layers(&layers, header.table_end(), data.len())?;
    Ok(ModelLayout { header, layers })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
