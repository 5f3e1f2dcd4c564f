//! Binary persistence for a built vector index.
//!
//! File format: vectors.bin
//!
//! Header (80 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of embedding model name)
//! - catalog: [u8; 32] (SHA256 fingerprint of the indexed catalog)
//! - metric: u8 (0 = cosine, 1 = l2)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - document_id: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! A file is only reused when both the model and the catalog match; any
//! mismatch means the caller rebuilds the whole index.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::DocumentId;
use crate::semantic::index::{IndexError, Metric, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + catalog(32) + metric(1) + dimensions(2) +
/// entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 80;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Catalog mismatch: file was built from a different catalog")]
    CatalogMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Stored index is invalid: {0}")]
    Index(#[from] IndexError),
}

impl VectorStorageError {
    /// Whether the file is readable but simply describes another model or
    /// catalog, so a rebuild is the expected reaction.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            VectorStorageError::VersionMismatch(..)
                | VectorStorageError::ModelMismatch
                | VectorStorageError::CatalogMismatch
                | VectorStorageError::DimensionMismatch { .. }
        )
    }
}

/// Storage manager for vector embeddings.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index from storage.
    ///
    /// # Arguments
    /// * `expected_model_id` - SHA256 hash of the expected model name
    /// * `expected_catalog` - fingerprint of the catalog being served
    /// * `expected_dimensions` - Expected embedding dimensions
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_catalog: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        Self::validate_header(&header, expected_model_id, expected_catalog, expected_dimensions)?;

        let dimensions = header.dimensions as usize;
        let mut entries: Vec<(DocumentId, Vec<f32>)> =
            Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            entries.push(Self::read_entry(&mut reader, dimensions)?);
        }

        Ok(VectorIndex::build(dimensions, header.metric, entries)?)
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        index: &VectorIndex,
        model_id: &[u8; 32],
        catalog: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_to_file(&temp_path, index, model_id, catalog);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
        catalog: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            ))
        })?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            catalog: *catalog,
            metric: index.metric(),
            dimensions,
            entry_count: index.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for entry in index.iter() {
            writer.write_all(&entry.id.to_le_bytes())?;
            for &value in &entry.embedding {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];
        if version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        // Verify checksum (computed over header without checksum field)
        let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[76..80]));
        if stored_checksum != crc32fast::hash(&header_bytes[0..76]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let metric = Metric::from_byte(header_bytes[65]).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!("unknown metric byte {}", header_bytes[65]))
        })?;

        Ok(Header {
            version,
            model_id: le_array(&header_bytes[1..33]),
            catalog: le_array(&header_bytes[33..65]),
            metric,
            dimensions: u16::from_le_bytes(le_array(&header_bytes[66..68])),
            entry_count: u64::from_le_bytes(le_array(&header_bytes[68..76])),
        })
    }

    fn validate_header(
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_catalog: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        if header.catalog != *expected_catalog {
            return Err(VectorStorageError::CatalogMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..65].copy_from_slice(&header.catalog);
        header_bytes[65] = header.metric.to_byte();
        header_bytes[66..68].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[68..76].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..76]);
        header_bytes[76..80].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        reader: &mut impl Read,
        dimensions: usize,
    ) -> Result<(DocumentId, Vec<f32>), VectorStorageError> {
        let mut id_bytes = [0u8; 8];
        reader.read_exact(&mut id_bytes)?;
        let id = u64::from_le_bytes(id_bytes);

        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }

        Ok((id, embedding))
    }
}

/// Copy a fixed-size slice of the header into an array.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    catalog: [u8; 32],
    metric: Metric,
    dimensions: u16,
    entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn catalog_id() -> [u8; 32] {
        [0x11; 32]
    }

    fn sample_index(metric: Metric) -> VectorIndex {
        VectorIndex::build(
            3,
            metric,
            vec![
                (1, vec![1.0, 0.0, 0.0]),
                (2, vec![0.0, 1.0, 0.0]),
                (5, vec![0.0, 0.0, 1.0]),
            ],
        )
        .unwrap()
    }

    fn storage_in(dir: &tempfile::TempDir) -> VectorStorage {
        VectorStorage::new(dir.path().join("vectors.bin"))
    }

    #[test]
    fn test_save_and_load_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);

        storage
            .save(&VectorIndex::empty(384, Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id(), &catalog_id(), 384).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), 384);
    }

    #[test]
    fn test_save_and_load_preserves_entries_and_metric() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);

        storage
            .save(&sample_index(Metric::L2), &model_id(), &catalog_id())
            .unwrap();

        let loaded = storage.load(&model_id(), &catalog_id(), 3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.metric(), Metric::L2);

        let ids: Vec<_> = loaded.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 5]);
        assert_eq!(loaded.iter().last().unwrap().embedding, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_model_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);
        storage
            .save(&sample_index(Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();

        let result = storage.load(&[0xFF; 32], &catalog_id(), 3);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
        assert!(result.unwrap_err().is_stale());
    }

    #[test]
    fn test_catalog_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);
        storage
            .save(&sample_index(Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();

        let result = storage.load(&model_id(), &[0x22; 32], 3);
        assert!(matches!(result, Err(VectorStorageError::CatalogMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);
        storage
            .save(&sample_index(Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();

        let result = storage.load(&model_id(), &catalog_id(), 384);
        assert!(matches!(result, Err(VectorStorageError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        let result = storage.save(&sample_index(Metric::Cosine), &model_id(), &catalog_id());

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);
        storage
            .save(&sample_index(Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();

        storage.delete().unwrap();
        assert!(!storage.exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage_in(&tmp);
        storage
            .save(&sample_index(Metric::Cosine), &model_id(), &catalog_id())
            .unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id(), &catalog_id(), 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
        assert!(!result.unwrap_err().is_stale());
    }
}
