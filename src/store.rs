//! File-backed cache of compiled models.
//!
//! Compiling a schema is the expensive step of the pipeline, so hosts
//! that load the same schema repeatedly can keep the compiled model on
//! disk. An entry is a CBOR envelope around the model's canonical TLV
//! form, named after the source digest; a changed schema hashes to a
//! different file, so stale entries are simply never read again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::compile::{compile, CompileError};
use crate::fingerprint::{digest_source, Digest};
use crate::model::{LvsModel, ModelError};

/// Envelope format version.
const FORMAT_VERSION: u32 = 1;

/// On-disk envelope of a cached model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedSchema {
    format_version: u32,
    /// Hex digest of the schema source this model was compiled from.
    source_digest: String,
    /// The model's canonical TLV form.
    model: Vec<u8>,
}

/// Error raised by [`SchemaStore`] operations.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Cbor(serde_cbor::Error),
    Model(ModelError),
    Compile(CompileError),
    /// An entry's recorded digest does not match its file name's digest.
    DigestMismatch { expected: String, found: String },
    /// An entry was written by an incompatible store version.
    FormatVersion(u32),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "store I/O error: {err}"),
            StoreError::Cbor(err) => write!(f, "store envelope error: {err}"),
            StoreError::Model(err) => write!(f, "cached model is invalid: {err}"),
            StoreError::Compile(err) => write!(f, "{err}"),
            StoreError::DigestMismatch { expected, found } => {
                write!(f, "cached entry digest mismatch: expected {expected}, found {found}")
            }
            StoreError::FormatVersion(version) => {
                write!(f, "unsupported store format version {version}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            StoreError::Cbor(err) => Some(err),
            StoreError::Model(err) => Some(err),
            StoreError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_cbor::Error> for StoreError {
    fn from(err: serde_cbor::Error) -> Self {
        StoreError::Cbor(err)
    }
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        StoreError::Model(err)
    }
}

impl From<CompileError> for StoreError {
    fn from(err: CompileError) -> Self {
        StoreError::Compile(err)
    }
}

/// A directory of compiled models keyed by source digest.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    dir: PathBuf,
}

impl SchemaStore {
    /// Opens a store at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The store directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(format!("{}.lvsc", digest.to_hex()))
    }

    /// Loads the cached model for `source`, or `None` on a cache miss.
    pub fn load(&self, source: &str) -> Result<Option<LvsModel>, StoreError> {
        let digest = digest_source(source);
        let path = self.entry_path(&digest);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: CachedSchema = serde_cbor::from_slice(&bytes)?;
        if entry.format_version != FORMAT_VERSION {
            return Err(StoreError::FormatVersion(entry.format_version));
        }
        if entry.source_digest != digest.to_hex() {
            return Err(StoreError::DigestMismatch {
                expected: digest.to_hex(),
                found: entry.source_digest,
            });
        }
        let model = codec::decode(&entry.model)?;
        tracing::debug!(path = %path.display(), "loaded cached LVS model");
        Ok(Some(model))
    }

    /// Persists a compiled model for `source`.
    pub fn store(&self, source: &str, model: &LvsModel) -> Result<(), StoreError> {
        let digest = digest_source(source);
        let entry = CachedSchema {
            format_version: FORMAT_VERSION,
            source_digest: digest.to_hex(),
            model: codec::encode(model),
        };
        let bytes = serde_cbor::to_vec(&entry)?;
        std::fs::write(self.entry_path(&digest), bytes)?;
        Ok(())
    }

    /// Returns the cached model for `source`, compiling and persisting
    /// it on a miss.
    pub fn load_or_compile(&self, source: &str) -> Result<LvsModel, StoreError> {
        if let Some(model) = self.load(source)? {
            return Ok(model);
        }
        let model = compile(source)?;
        self.store(source, &model)?;
        Ok(model)
    }
}
