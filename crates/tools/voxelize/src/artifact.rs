//! Voxelization artifact codec
//!
//! The packing service returns an opaque binary blob that later stages take
//! back as input. Callers may hold it in memory, on disk, or as a path string;
//! [`ArtifactSource::normalize`] is the only place those representations are
//! told apart. The blob's contents are never inspected here.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// File extension conventionally used for persisted artifacts
pub const ARTIFACT_EXTENSION: &str = "vox";

/// Opaque result of the packing stage
///
/// Cloning is cheap and the bytes can never be mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct VoxelizationArtifact {
    bytes: Arc<[u8]>,
}

impl VoxelizationArtifact {
    /// Wrap raw bytes produced by the packing service
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::InvalidArtifact("artifact is empty".to_string()));
        }
        Ok(Self {
            bytes: bytes.into(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Persist the artifact to disk
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &self.bytes).await?;
        Ok(())
    }

    /// Load a previously saved artifact
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = ArtifactSource::from(path.as_ref()).normalize().await?;
        let bytes = payload.read_all().await?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for VoxelizationArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoxelizationArtifact({} bytes)", self.bytes.len())
    }
}

impl AsRef<[u8]> for VoxelizationArtifact {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// The accepted external representations of an artifact
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Raw bytes already in memory
    Bytes(Arc<[u8]>),
    /// Filesystem path to a persisted artifact
    Path(PathBuf),
    /// Path given as a string reference
    Str(String),
}

impl ArtifactSource {
    /// Turn any representation into a transportable payload
    ///
    /// Paths are checked for existence and size but not read; the file is
    /// streamed when the payload is sent.
    pub async fn normalize(self) -> Result<ArtifactPayload> {
        match self {
            ArtifactSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::InvalidArtifact(
                        "artifact byte sequence is empty".to_string(),
                    ));
                }
                Ok(ArtifactPayload::Memory(bytes))
            }
            ArtifactSource::Str(reference) => {
                let reference = reference.trim();
                if reference.is_empty() {
                    return Err(Error::InvalidArtifact(
                        "artifact path reference is empty".to_string(),
                    ));
                }
                file_payload(PathBuf::from(reference)).await
            }
            ArtifactSource::Path(path) => file_payload(path).await,
        }
    }
}

async fn file_payload(path: PathBuf) -> Result<ArtifactPayload> {
    let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
        Error::InvalidArtifact(format!("cannot open {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(Error::InvalidArtifact(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(Error::InvalidArtifact(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(ArtifactPayload::File {
        path,
        len: metadata.len(),
    })
}

impl From<Vec<u8>> for ArtifactSource {
    fn from(bytes: Vec<u8>) -> Self {
        ArtifactSource::Bytes(bytes.into())
    }
}

impl From<&[u8]> for ArtifactSource {
    fn from(bytes: &[u8]) -> Self {
        ArtifactSource::Bytes(bytes.into())
    }
}

impl From<VoxelizationArtifact> for ArtifactSource {
    fn from(artifact: VoxelizationArtifact) -> Self {
        ArtifactSource::Bytes(artifact.bytes)
    }
}

impl From<&VoxelizationArtifact> for ArtifactSource {
    fn from(artifact: &VoxelizationArtifact) -> Self {
        ArtifactSource::Bytes(Arc::clone(&artifact.bytes))
    }
}

impl From<PathBuf> for ArtifactSource {
    fn from(path: PathBuf) -> Self {
        ArtifactSource::Path(path)
    }
}

impl From<&Path> for ArtifactSource {
    fn from(path: &Path) -> Self {
        ArtifactSource::Path(path.to_path_buf())
    }
}

impl From<&PathBuf> for ArtifactSource {
    fn from(path: &PathBuf) -> Self {
        ArtifactSource::Path(path.clone())
    }
}

impl From<String> for ArtifactSource {
    fn from(reference: String) -> Self {
        ArtifactSource::Str(reference)
    }
}

impl From<&str> for ArtifactSource {
    fn from(reference: &str) -> Self {
        ArtifactSource::Str(reference.to_string())
    }
}

/// Canonical transportable form of a binary payload
#[derive(Debug, Clone)]
pub enum ArtifactPayload {
    Memory(Arc<[u8]>),
    /// Streamed from disk when sent
    File { path: PathBuf, len: u64 },
}

impl ArtifactPayload {
    /// Payload size in bytes
    pub fn len(&self) -> u64 {
        match self {
            ArtifactPayload::Memory(bytes) => bytes.len() as u64,
            ArtifactPayload::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole payload into memory
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            ArtifactPayload::Memory(bytes) => Ok(bytes.to_vec()),
            ArtifactPayload::File { path, .. } => Ok(tokio::fs::read(path).await?),
        }
    }

    /// Build a request body, streaming file payloads chunk by chunk
    pub async fn into_body(self) -> Result<reqwest::Body> {
        match self {
            ArtifactPayload::Memory(bytes) => Ok(reqwest::Body::from(bytes.to_vec())),
            ArtifactPayload::File { path, .. } => {
                let file = tokio::fs::File::open(&path).await?;
                Ok(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
        }
    }
}

/// A mesh supplied to the packing stage, by path or by content
#[derive(Debug, Clone)]
pub enum MeshSource {
    Path(PathBuf),
    Bytes { file_name: String, data: Arc<[u8]> },
}

impl MeshSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        MeshSource::Path(path.into())
    }

    pub fn bytes(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        MeshSource::Bytes {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    /// File name reported to the service
    pub fn file_name(&self) -> String {
        match self {
            MeshSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mesh.stl".to_string()),
            MeshSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// Check the mesh reference and turn it into a payload
    ///
    /// Only STL geometry is accepted when a path is given.
    pub async fn normalize(&self) -> Result<ArtifactPayload> {
        match self {
            MeshSource::Path(path) => {
                let is_stl = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("stl"));
                if !is_stl {
                    return Err(Error::invalid_argument(format!(
                        "only STL meshes are supported, got {}",
                        path.display()
                    )));
                }
                file_payload(path.clone())
                    .await
                    .map_err(|e| Error::invalid_argument(format!("mesh reference: {}", e)))
            }
            MeshSource::Bytes { data, .. } => {
                if data.is_empty() {
                    return Err(Error::invalid_argument("mesh data is empty"));
                }
                Ok(ArtifactPayload::Memory(Arc::clone(data)))
            }
        }
    }
}

impl From<PathBuf> for MeshSource {
    fn from(path: PathBuf) -> Self {
        MeshSource::Path(path)
    }
}

impl From<&Path> for MeshSource {
    fn from(path: &Path) -> Self {
        MeshSource::Path(path.to_path_buf())
    }
}

impl From<&str> for MeshSource {
    fn from(path: &str) -> Self {
        MeshSource::Path(PathBuf::from(path))
    }
}
