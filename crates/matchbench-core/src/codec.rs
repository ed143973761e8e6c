//! Alignment artifact marshalling.
//!
//! The harness treats the artifact format as an opaque boundary: everything
//! goes through [`AlignmentCodec`]. [`JsonCodec`] is the bundled format, a
//! JSON array of correspondences.

use std::fs;
use std::path::Path;

use crate::domain::alignment::Alignment;
use crate::domain::error::CodecError;
use crate::domain::test_case::location_to_path;

/// Parse and serialize alignment artifacts.
pub trait AlignmentCodec: Send + Sync {
    /// File extension (without dot) for artifacts written by this codec.
    fn extension(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<Alignment, CodecError>;

    fn encode(&self, alignment: &Alignment) -> Result<Vec<u8>, CodecError>;

    fn read(&self, path: &Path) -> Result<Alignment, CodecError> {
        let bytes = fs::read(path).map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.decode(&bytes)
    }

    /// Read from a location string (path or `file://` URL).
    fn read_location(&self, location: &str) -> Result<Alignment, CodecError> {
        let path =
            location_to_path(location).ok_or_else(|| CodecError::NotLocal(location.to_string()))?;
        self.read(&path)
    }

    fn write(&self, path: &Path, alignment: &Alignment) -> Result<(), CodecError> {
        let bytes = self.encode(alignment)?;
        fs::write(path, bytes).map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// JSON array of `{entity_one, entity_two, confidence, relation}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl AlignmentCodec for JsonCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Alignment, CodecError> {
        let alignment: Alignment = serde_json::from_slice(bytes)?;
        if let Some(bad) = alignment.iter().find(|c| !(0.0..=1.0).contains(&c.confidence)) {
            return Err(CodecError::ConfidenceOutOfRange {
                entity_one: bad.entity_one.clone(),
                entity_two: bad.entity_two.clone(),
                confidence: bad.confidence,
            });
        }
        Ok(alignment)
    }

    fn encode(&self, alignment: &Alignment) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec_pretty(alignment)?)
    }
}
