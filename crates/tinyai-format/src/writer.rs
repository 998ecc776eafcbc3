//! Writer for TMAI model files.

use std::fmt;
use std::io::Write;
use std::path::Path;

use tinyai_common::{Result, TinyAiError};

use crate::{
    DESCRIPTOR_SIZE, HEADER_SIZE, LAYER_NAME_LEN, MAX_LAYERS, MODEL_NAME_LEN, Precision,
    TMAI_MAGIC,
};

struct PendingLayer {
    name: Option<String>,
    precision: Precision,
    data: Vec<u8>,
}

/// Builds a TMAI file from in-memory layer blobs.
///
/// Blobs are laid out in insertion order after the descriptor table, each
/// starting on a multiple of the blob alignment (64 by default).
///
/// ```
/// use std::io::Cursor;
/// use tinyai_format::{TmaiBuilder, Precision, parse_layout};
///
/// let bytes = TmaiBuilder::new()
///     .model_name("demo")
///     .layer(Precision::INT4, vec![0u8; 128])
///     .write(Cursor::new(Vec::new()))
///     .unwrap()
///     .into_inner();
/// let layout = parse_layout(&bytes).unwrap();
/// assert_eq!(layout.layers[0].size, 128);
/// ```
pub struct TmaiBuilder {
    name: String,
    version: u32,
    alignment: usize,
    layers: Vec<PendingLayer>,
}

impl fmt::Debug for TmaiBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmaiBuilder")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("alignment", &self.alignment)
            .field("layers", &self.layers.len())
            .field("blob_bytes", &self.layers.iter().map(|l| l.data.len()).sum::<usize>())
            .finish()
    }
}

impl Default for TmaiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TmaiBuilder {
    pub fn new() -> Self {
        Self { name: String::new(), version: 1, alignment: 64, layers: Vec::new() }
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Blob start alignment. Values below 1 are treated as 1.
    pub fn blob_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    pub fn layer(mut self, precision: Precision, data: impl Into<Vec<u8>>) -> Self {
        self.layers.push(PendingLayer { name: None, precision, data: data.into() });
        self
    }

    pub fn named_layer(
        mut self,
        name: impl Into<String>,
        precision: Precision,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.layers.push(PendingLayer { name: Some(name.into()), precision, data: data.into() });
        self
    }

    /// Serialize the file into `w` and hand the writer back.
    pub fn write<W: Write>(self, mut w: W) -> Result<W> {
        if self.layers.len() > MAX_LAYERS {
            return Err(TinyAiError::TooManyLayers { count: self.layers.len(), max: MAX_LAYERS });
        }
        if self.name.len() > MODEL_NAME_LEN {
            return Err(TinyAiError::InvalidFormat(format!(
                "model name is {} bytes, field holds {MODEL_NAME_LEN}",
                self.name.len()
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&TMAI_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&self.version.to_le_bytes());
        header[8..12].copy_from_slice(&(self.layers.len() as u32).to_le_bytes());
        header[16..16 + self.name.len()].copy_from_slice(self.name.as_bytes());

        let table_end = HEADER_SIZE + self.layers.len() * DESCRIPTOR_SIZE;
        let mut table = Vec::with_capacity(table_end - HEADER_SIZE);
        let mut offsets = Vec::with_capacity(self.layers.len());
        let mut cursor = table_end;
        for layer in &self.layers {
            cursor = cursor.next_multiple_of(self.alignment);
            let offset = u32::try_from(cursor).map_err(|_| {
                TinyAiError::InvalidFormat(format!("blob offset {cursor} does not fit in u32"))
            })?;
            let size = u32::try_from(layer.data.len()).map_err(|_| {
                TinyAiError::InvalidFormat(format!("blob of {} bytes is too large", layer.data.len()))
            })?;

            let mut desc = [0u8; DESCRIPTOR_SIZE];
            desc[0..4].copy_from_slice(&offset.to_le_bytes());
            desc[4..8].copy_from_slice(&size.to_le_bytes());
            desc[8..12].copy_from_slice(&layer.precision.bits().to_le_bytes());
            if let Some(name) = &layer.name {
                if name.len() > LAYER_NAME_LEN {
                    return Err(TinyAiError::InvalidFormat(format!(
                        "layer name {name:?} exceeds {LAYER_NAME_LEN} bytes"
                    )));
                }
                desc[12..12 + name.len()].copy_from_slice(name.as_bytes());
            }
            table.extend_from_slice(&desc);
            offsets.push(cursor);
            cursor += layer.data.len();
        }

        w.write_all(&header)?;
        w.write_all(&table)?;
        let mut written = table_end;
        for (layer, offset) in self.layers.iter().zip(offsets) {
            if offset > written {
                w.write_all(&vec![0u8; offset - written])?;
            }
            w.write_all(&layer.data)?;
            written = offset + layer.data.len();
        }
        w.flush()?;
        Ok(w)
    }

    /// Serialize into a byte vector.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        self.write(Vec::new())
    }

    /// Create (or truncate) `path` and write the file there.
    pub fn write_to_path(self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write(std::io::BufWriter::new(file))?;
        Ok(())
    }
}
